use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use common::{Cell, ChunkCoord};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status: {status} body={body}")]
    UnexpectedStatus {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("cell store unavailable: {0}")]
    Unavailable(String),
}

/// Read-only view of the remote cell store.
#[async_trait]
pub trait CellSource: Send + Sync + 'static {
    /// Visible, approved cells with `min_id <= id < max_id`.
    async fn fetch_cells(&self, min_id: u64, max_id: u64) -> Result<Vec<Cell>, SourceError>;

    async fn fetch_capacity(&self) -> Result<u64, SourceError>;

    /// Visible cells owned by `owner`, ordered by id.
    async fn fetch_owned(&self, owner: &str) -> Result<Vec<Cell>, SourceError>;
}

/// Result of one chunk's range query.
#[derive(Debug)]
pub struct FetchOutcome {
    pub coord: ChunkCoord,
    pub result: Result<Vec<Cell>, SourceError>,
}

/// Issues chunk range queries on the tokio runtime and hands the results
/// back through a channel, so they are merged on the caller's thread.
pub struct DataFetcher {
    source: Arc<dyn CellSource>,
    runtime: Option<Handle>,
    in_flight: HashSet<ChunkCoord>,
    tx: mpsc::UnboundedSender<FetchOutcome>,
    rx: mpsc::UnboundedReceiver<FetchOutcome>,
}

impl DataFetcher {
    /// Queries run on the runtime current at construction, if any. Hosts
    /// that drive the viewer from their own event loop pass a handle through
    /// [`DataFetcher::set_runtime`] instead.
    pub fn new(source: Arc<dyn CellSource>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            source,
            runtime: Handle::try_current().ok(),
            in_flight: HashSet::new(),
            tx,
            rx,
        }
    }

    pub fn source(&self) -> &Arc<dyn CellSource> {
        &self.source
    }

    pub fn set_runtime(&mut self, runtime: Handle) {
        self.runtime = Some(runtime);
    }

    pub fn is_in_flight(&self, coord: ChunkCoord) -> bool {
        self.in_flight.contains(&coord)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Start loading `coord` over `[min_id, max_id)` unless its data is
    /// already loaded or a query for it is still running. Returns whether a
    /// query was issued. Without a runtime nothing is issued and the chunk is
    /// retried on a later pass.
    pub fn load(&mut self, coord: ChunkCoord, loaded: bool, (min_id, max_id): (u64, u64)) -> bool {
        if loaded || self.in_flight.contains(&coord) {
            return false;
        }
        let Some(runtime) = self.runtime.clone().or_else(|| Handle::try_current().ok()) else {
            tracing::warn!("No tokio runtime to load chunk {}", coord);
            return false;
        };
        self.in_flight.insert(coord);
        let source = Arc::clone(&self.source);
        let tx = self.tx.clone();
        runtime.spawn(async move {
            let result = source.fetch_cells(min_id, max_id).await;
            // The receiver lives as long as the fetcher; a closed channel
            // means the viewer is gone and the result has nowhere to go.
            let _ = tx.send(FetchOutcome { coord, result });
        });
        tracing::debug!("Loading chunk {} (ids {}..{})", coord, min_id, max_id);
        true
    }

    /// A completed query, if one is ready.
    pub fn try_next(&mut self) -> Option<FetchOutcome> {
        let outcome = self.rx.try_recv().ok()?;
        self.in_flight.remove(&outcome.coord);
        Some(outcome)
    }

    /// Wait for the next completed query. Returns `None` at once when nothing
    /// is in flight.
    pub async fn next(&mut self) -> Option<FetchOutcome> {
        if self.in_flight.is_empty() {
            return None;
        }
        let outcome = self.rx.recv().await?;
        self.in_flight.remove(&outcome.coord);
        Some(outcome)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;

    /// In-memory store that counts range queries and can be made to fail.
    #[derive(Default)]
    pub struct MemorySource {
        pub cells: Mutex<BTreeMap<u64, Cell>>,
        pub capacity: u64,
        pub queries: AtomicUsize,
        pub fail: AtomicBool,
    }

    impl MemorySource {
        pub fn new(capacity: u64, cells: Vec<Cell>) -> Arc<Self> {
            Arc::new(Self {
                cells: Mutex::new(cells.into_iter().map(|c| (c.id, c)).collect()),
                capacity,
                ..Default::default()
            })
        }

        pub fn queries(&self) -> usize {
            self.queries.load(Ordering::SeqCst)
        }

        pub fn set_failing(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }

        pub fn put(&self, cell: Cell) {
            self.cells.lock().unwrap().insert(cell.id, cell);
        }
    }

    #[async_trait]
    impl CellSource for MemorySource {
        async fn fetch_cells(&self, min_id: u64, max_id: u64) -> Result<Vec<Cell>, SourceError> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            if self.fail.load(Ordering::SeqCst) {
                return Err(SourceError::Unavailable("offline".into()));
            }
            let cells = self.cells.lock().unwrap();
            Ok(cells
                .range(min_id..max_id)
                .map(|(_, cell)| cell.clone())
                .filter(|cell| cell.is_visible())
                .collect())
        }

        async fn fetch_capacity(&self) -> Result<u64, SourceError> {
            Ok(self.capacity)
        }

        async fn fetch_owned(&self, owner: &str) -> Result<Vec<Cell>, SourceError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(SourceError::Unavailable("offline".into()));
            }
            let cells = self.cells.lock().unwrap();
            Ok(cells
                .values()
                .filter(|cell| cell.is_visible() && cell.owner.as_deref() == Some(owner))
                .cloned()
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::MemorySource;
    use super::*;

    #[tokio::test]
    async fn test_second_load_while_in_flight_is_suppressed() {
        let source = MemorySource::new(10_000, vec![Cell::claimed(3, "a", "#000000", 0)]);
        let mut fetcher = DataFetcher::new(source.clone());
        let coord = ChunkCoord::new(0, 0);

        assert!(fetcher.load(coord, false, (0, 1_010)));
        assert!(!fetcher.load(coord, false, (0, 1_010)));
        assert!(fetcher.is_in_flight(coord));

        let outcome = fetcher.next().await.unwrap();
        assert_eq!(outcome.coord, coord);
        assert_eq!(outcome.result.unwrap().len(), 1);
        assert_eq!(source.queries(), 1);
        assert!(fetcher.next().await.is_none());
    }

    #[tokio::test]
    async fn test_loaded_chunk_is_not_fetched() {
        let source = MemorySource::new(10_000, Vec::new());
        let mut fetcher = DataFetcher::new(source.clone());
        assert!(!fetcher.load(ChunkCoord::new(0, 0), true, (0, 1_010)));
        assert_eq!(fetcher.in_flight(), 0);
        assert!(fetcher.next().await.is_none());
        assert_eq!(source.queries(), 0);
    }

    #[tokio::test]
    async fn test_failure_clears_in_flight_marker() {
        let source = MemorySource::new(10_000, Vec::new());
        source.set_failing(true);
        let mut fetcher = DataFetcher::new(source.clone());
        let coord = ChunkCoord::new(2, 2);

        fetcher.load(coord, false, (0, 10));
        let outcome = fetcher.next().await.unwrap();
        assert!(matches!(outcome.result, Err(SourceError::Unavailable(_))));
        assert!(!fetcher.is_in_flight(coord));

        // Retried on the next pass.
        source.set_failing(false);
        assert!(fetcher.load(coord, false, (0, 10)));
        assert!(fetcher.next().await.unwrap().result.is_ok());
        assert_eq!(source.queries(), 2);
    }

    #[test]
    fn test_load_spawns_on_captured_runtime() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let source = MemorySource::new(10_000, vec![Cell::claimed(3, "a", "#000000", 0)]);
        let mut fetcher = DataFetcher::new(source.clone());
        fetcher.set_runtime(runtime.handle().clone());

        // Called from a plain thread, outside any runtime context.
        let coord = ChunkCoord::new(0, 0);
        assert!(fetcher.load(coord, false, (0, 1_010)));
        let outcome = runtime.block_on(fetcher.next()).unwrap();
        assert_eq!(outcome.result.unwrap().len(), 1);
    }

    #[test]
    fn test_load_without_runtime_is_deferred() {
        let source = MemorySource::new(10_000, Vec::new());
        let mut fetcher = DataFetcher::new(source.clone());
        let coord = ChunkCoord::new(0, 0);
        assert!(!fetcher.load(coord, false, (0, 1_010)));
        assert!(!fetcher.is_in_flight(coord));
        assert_eq!(source.queries(), 0);
    }
}
