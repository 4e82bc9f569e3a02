use common::grid::DEFAULT_CAPACITY;

pub struct Config {
    pub valkey_url: String,
    pub listen_addr: String,
    /// Capacity reported when the store has none configured.
    pub default_capacity: u64,
    /// Number of decoded cells kept in memory.
    pub cell_cache_size: usize,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            valkey_url: std::env::var("VALKEY_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".into()),
            listen_addr: std::env::var("LISTEN_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:3000".into()),
            default_capacity: std::env::var("GRID_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_CAPACITY),
            cell_cache_size: std::env::var("CELL_CACHE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(100_000),
        }
    }
}
