use common::ChunkCoord;

use crate::chunk::ChunkStore;
use crate::graphics::Graphics;
use crate::viewport::ChunkRange;

/// Keeps the number of resident chunks under a cap.
#[derive(Debug, Clone, Copy)]
pub struct LruEvictor {
    max_resident: usize,
}

impl LruEvictor {
    pub fn new(max_resident: usize) -> Self {
        Self { max_resident }
    }

    pub fn max_resident(&self) -> usize {
        self.max_resident
    }

    /// Evict least-recently-accessed chunks until at most `max_resident`
    /// remain. Chunks inside `protected` are never evicted, so the cap can be
    /// exceeded when the visible range alone is larger than it.
    pub fn enforce<G: Graphics>(
        &self,
        store: &mut ChunkStore<G>,
        protected: Option<&ChunkRange>,
        gfx: &mut G,
    ) -> Vec<ChunkCoord> {
        let resident = store.len();
        if resident <= self.max_resident {
            return Vec::new();
        }
        let excess = resident - self.max_resident;

        let victims: Vec<ChunkCoord> = store
            .lru_order()
            .into_iter()
            .filter(|coord| !protected.is_some_and(|range| range.contains(*coord)))
            .take(excess)
            .collect();

        for coord in &victims {
            store.evict(*coord, gfx);
        }

        if victims.len() < excess {
            tracing::warn!(
                "Visible range holds {} chunks, above the cache cap of {}",
                store.len(),
                self.max_resident
            );
        } else {
            tracing::debug!("Evicted {} chunks, {} resident", victims.len(), store.len());
        }
        victims
    }
}
