//! Input handling and the fetch → render → evict cycle.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, RwLock};

use common::{Cell, ChunkCoord, GridLayout};
use serde::Serialize;

use crate::chunk::ChunkStore;
use crate::config::ViewerConfig;
use crate::evict::LruEvictor;
use crate::fetcher::{CellSource, DataFetcher, FetchOutcome, SourceError};
use crate::graphics::{Graphics, Rect};
use crate::lod;
use crate::viewport::{ChunkRange, Viewport};

/// Who is signed in, as far as the purchase flow is concerned.
pub trait SessionProvider {
    fn current_user(&self) -> Option<String>;
}

/// Session whose user is set explicitly by the host.
#[derive(Debug, Default)]
pub struct StaticSession {
    user: RwLock<Option<String>>,
}

impl StaticSession {
    pub fn new(user: Option<String>) -> Self {
        Self {
            user: RwLock::new(user),
        }
    }

    pub fn sign_in(&self, user: impl Into<String>) {
        if let Ok(mut slot) = self.user.write() {
            *slot = Some(user.into());
        }
    }

    pub fn sign_out(&self) {
        if let Ok(mut slot) = self.user.write() {
            *slot = None;
        }
    }
}

impl SessionProvider for StaticSession {
    fn current_user(&self) -> Option<String> {
        self.user.read().ok().and_then(|user| user.clone())
    }
}

/// What the host should do after a cell was clicked.
#[derive(Debug, Clone, PartialEq)]
pub enum CellAction {
    /// Show the owned cell's details.
    OpenDetail(Arc<Cell>),
    /// Start checkout for an empty cell.
    Purchase { cell_id: u64 },
    /// Ask the user to sign in; the claim resumes via `resume_after_auth`.
    Authenticate { cell_id: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// The pointer travelled far enough to count as a pan.
    Drag,
    /// A click, with the cell under it if there is one.
    Click(Option<u64>),
}

/// Work counters, cumulative since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleStats {
    pub cycles: u64,
    pub skipped: u64,
    pub rasterized: u64,
    pub fetches: u64,
    pub evicted: u64,
}

#[derive(Debug, Clone, Copy)]
struct DragState {
    start: (f64, f64),
    last: (f64, f64),
    panning: bool,
}

pub struct ViewportController<G: Graphics> {
    config: ViewerConfig,
    viewport: Viewport,
    store: ChunkStore<G>,
    fetcher: DataFetcher,
    evictor: LruEvictor,
    gfx: G,
    session: Arc<dyn SessionProvider>,
    last_range: Option<ChunkRange>,
    rendered: bool,
    force: bool,
    drag: Option<DragState>,
    pending_click: Option<u64>,
    pending_claim: Option<u64>,
    highlight: Option<u64>,
    actions: VecDeque<CellAction>,
    /// Chunks whose data changed while their query was running.
    refetch: HashSet<ChunkCoord>,
    /// Live updates waiting for their chunk's query to land.
    deferred_updates: HashMap<ChunkCoord, Vec<Cell>>,
    /// The signed-in user's cells, ascending.
    my_cells: Vec<u64>,
    stats: CycleStats,
}

impl<G: Graphics> ViewportController<G> {
    pub fn new(
        config: ViewerConfig,
        source: Arc<dyn CellSource>,
        session: Arc<dyn SessionProvider>,
        gfx: G,
    ) -> Self {
        let viewport = Viewport::new(
            config.viewport_width,
            config.viewport_height,
            config.initial_scale.clamp(config.min_scale, config.max_scale),
        );
        Self {
            viewport,
            store: ChunkStore::new(config.layout),
            fetcher: DataFetcher::new(source),
            evictor: LruEvictor::new(config.max_cached_chunks),
            gfx,
            session,
            last_range: None,
            rendered: false,
            force: false,
            drag: None,
            pending_click: None,
            pending_claim: None,
            highlight: None,
            actions: VecDeque::new(),
            refetch: HashSet::new(),
            deferred_updates: HashMap::new(),
            my_cells: Vec::new(),
            stats: CycleStats::default(),
            config,
        }
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    pub fn layout(&self) -> &GridLayout {
        self.store.layout()
    }

    pub fn store(&self) -> &ChunkStore<G> {
        &self.store
    }

    pub fn graphics(&self) -> &G {
        &self.gfx
    }

    pub fn visible_range(&self) -> Option<ChunkRange> {
        self.last_range
    }

    pub fn stats(&self) -> CycleStats {
        self.stats
    }

    pub fn pending_claim(&self) -> Option<u64> {
        self.pending_claim
    }

    pub fn in_flight(&self) -> usize {
        self.fetcher.in_flight()
    }

    pub fn my_cells(&self) -> &[u64] {
        &self.my_cells
    }

    /// Run chunk queries on `runtime`. Needed when the host drives the viewer
    /// from outside a tokio context.
    pub fn set_runtime(&mut self, runtime: tokio::runtime::Handle) {
        self.fetcher.set_runtime(runtime);
    }

    /// Next action produced by a click, in click order.
    pub fn take_action(&mut self) -> Option<CellAction> {
        self.actions.pop_front()
    }

    /// Ask the store for its capacity and adopt it. A changed capacity drops
    /// every cached chunk.
    pub async fn load_capacity(&mut self) -> Result<u64, SourceError> {
        let capacity = self.fetcher.source().fetch_capacity().await?;
        if capacity != self.store.layout().capacity {
            tracing::info!("Grid capacity is {}", capacity);
            let layout = self.store.layout().with_capacity(capacity);
            self.store.clear(&mut self.gfx);
            self.store.set_layout(layout);
            self.force = true;
        }
        Ok(capacity)
    }

    /// Fetch the signed-in user's cells. Every chunk is redrawn on the next
    /// render so their borders follow.
    pub async fn load_my_cells(&mut self) -> Result<&[u64], SourceError> {
        let capacity = self.store.layout().capacity;
        let mut ids: Vec<u64> = match self.session.current_user() {
            Some(user) => self
                .fetcher
                .source()
                .fetch_owned(&user)
                .await?
                .into_iter()
                .map(|cell| cell.id)
                .filter(|id| *id < capacity)
                .collect(),
            None => Vec::new(),
        };
        ids.sort_unstable();
        ids.dedup();
        tracing::info!("Signed-in user owns {} cells", ids.len());

        self.my_cells = ids;
        self.store.mark_all_dirty();
        self.force = true;
        Ok(&self.my_cells)
    }

    pub fn on_resize(&mut self, width: f64, height: f64) {
        self.viewport.width = width;
        self.viewport.height = height;
        self.force = true;
        self.render();
    }

    /// Zoom about the cursor. Positive `delta_y` zooms out.
    pub fn on_wheel(&mut self, delta_y: f64, mouse_x: f64, mouse_y: f64) {
        let factor = if delta_y > 0.0 {
            1.0 - self.config.zoom_step
        } else {
            1.0 + self.config.zoom_step
        };
        let zoomed = self.viewport.zoom_at(
            mouse_x,
            mouse_y,
            factor,
            self.config.min_scale,
            self.config.max_scale,
        );
        if zoomed {
            self.store.mark_all_dirty();
            self.force = true;
            self.render();
        }
    }

    pub fn on_pointer_down(&mut self, x: f64, y: f64) {
        self.drag = Some(DragState {
            start: (x, y),
            last: (x, y),
            panning: false,
        });
    }

    /// Pans once the pointer has left the click threshold.
    pub fn on_pointer_move(&mut self, x: f64, y: f64) {
        let threshold = self.config.click_threshold;
        let Some(drag) = self.drag.as_mut() else {
            return;
        };
        if !drag.panning {
            let travel = (x - drag.start.0).hypot(y - drag.start.1);
            if travel < threshold {
                return;
            }
            drag.panning = true;
        }
        let (dx, dy) = (x - drag.last.0, y - drag.last.1);
        drag.last = (x, y);
        self.viewport.pan_by(dx, dy);
        self.render();
    }

    pub fn on_pointer_up(&mut self, x: f64, y: f64) -> Release {
        self.on_pointer_move(x, y);
        match self.drag.take() {
            Some(drag) if drag.panning => Release::Drag,
            Some(_) => Release::Click(self.click(x, y)),
            None => Release::Click(None),
        }
    }

    /// Center the view on a cell and highlight it. Ids outside the grid are
    /// ignored.
    pub fn focus_cell(&mut self, cell_id: u64) -> bool {
        let layout = *self.store.layout();
        if cell_id >= layout.capacity {
            return false;
        }
        let (x, y, w, h) = layout.cell_world_rect(cell_id);
        self.viewport.center_on(x + w / 2.0, y + h / 2.0);
        self.highlight = Some(cell_id);
        self.force = true;
        self.render();
        true
    }

    /// Focus the lowest-numbered cell the signed-in user owns.
    pub fn focus_my_cell(&mut self) -> Option<u64> {
        let first = *self.my_cells.first()?;
        self.focus_cell(first).then_some(first)
    }

    /// Replay the claim interrupted by sign-in, if the user is now signed in.
    pub fn resume_after_auth(&mut self) -> Option<CellAction> {
        self.session.current_user()?;
        let cell_id = self.pending_claim.take()?;
        let coord = self.store.layout().chunk_of_id(cell_id);
        let fetch_range = self.store.layout().chunk_fetch_range(coord);
        if self.store.get_or_create(coord).is_loaded() {
            return Some(self.resolve_cell(cell_id));
        }
        // The action is queued once the chunk's data arrives.
        self.pending_click = Some(cell_id);
        if self.fetcher.load(coord, false, fetch_range) {
            self.stats.fetches += 1;
        }
        None
    }

    /// The purchase flow returned: re-fetch the now-owned cell's chunk.
    pub fn on_purchase_complete(&mut self, cell_id: u64) {
        let layout = *self.store.layout();
        if cell_id >= layout.capacity {
            return;
        }
        if self.pending_claim == Some(cell_id) {
            self.pending_claim = None;
        }
        if self.session.current_user().is_some() {
            if let Err(at) = self.my_cells.binary_search(&cell_id) {
                self.my_cells.insert(at, cell_id);
            }
        }
        let coord = layout.chunk_of_id(cell_id);
        self.store.invalidate(coord);
        if self.fetcher.is_in_flight(coord) {
            // The running query may predate the purchase.
            self.refetch.insert(coord);
        } else if self.store.contains(coord)
            && self.fetcher.load(coord, false, layout.chunk_fetch_range(coord))
        {
            self.stats.fetches += 1;
        }
        self.highlight = Some(cell_id);
        self.draw_highlight();
    }

    /// Apply a pushed cell change. Redraws the owning chunk if it is visible.
    /// Changes for a chunk whose query is running are replayed once it lands.
    pub fn apply_cell_update(&mut self, cell: Cell) {
        let layout = *self.store.layout();
        if cell.id >= layout.capacity {
            return;
        }
        self.track_ownership(&cell);
        let coord = layout.chunk_of_id(cell.id);
        if self.fetcher.is_in_flight(coord) {
            self.deferred_updates.entry(coord).or_default().push(cell);
            return;
        }
        if let Some(coord) = self.store.update_cell(cell) {
            if self.in_range(coord) {
                self.draw_chunk(coord);
            }
        }
    }

    /// Run one render cycle. Returns false when the visible range is unchanged
    /// and nothing forced a redraw, in which case no work was done.
    pub fn render(&mut self) -> bool {
        self.gfx.set_transform(
            self.viewport.pan_x as f32,
            self.viewport.pan_y as f32,
            self.viewport.scale as f32,
        );

        let layout = *self.store.layout();
        let range = self
            .viewport
            .visible_chunks(&layout, self.config.buffer_chunks);
        if self.rendered && !self.force && range == self.last_range {
            self.stats.skipped += 1;
            return false;
        }
        self.rendered = true;
        self.force = false;
        self.last_range = range;
        self.stats.cycles += 1;

        let off_screen: Vec<ChunkCoord> = self
            .store
            .coords()
            .filter(|coord| !range.is_some_and(|r| r.contains(*coord)))
            .collect();
        for coord in off_screen {
            if let Some(chunk) = self.store.peek_mut(coord) {
                chunk.resources.detach(&mut self.gfx);
            }
        }

        if let Some(range) = range {
            for coord in range.iter() {
                let loaded = self.store.get_or_create(coord).is_loaded();
                if self
                    .fetcher
                    .load(coord, loaded, layout.chunk_fetch_range(coord))
                {
                    self.stats.fetches += 1;
                }
            }
            for coord in range.iter() {
                self.draw_chunk(coord);
            }
        }

        let evicted = self
            .evictor
            .enforce(&mut self.store, range.as_ref(), &mut self.gfx);
        self.stats.evicted += evicted.len() as u64;

        self.draw_highlight();
        tracing::debug!(
            "Render cycle: {:?}, {} resident, {} in flight",
            range,
            self.store.len(),
            self.fetcher.in_flight()
        );
        true
    }

    /// Apply every fetch that has completed so far without waiting.
    pub fn pump(&mut self) -> usize {
        let mut applied = 0;
        while let Some(outcome) = self.fetcher.try_next() {
            self.apply_outcome(outcome);
            applied += 1;
        }
        applied
    }

    /// Wait for one fetch to complete and apply it. Returns false when nothing
    /// is in flight.
    pub async fn next_fetch(&mut self) -> bool {
        match self.fetcher.next().await {
            Some(outcome) => {
                self.apply_outcome(outcome);
                true
            }
            None => false,
        }
    }

    /// Wait until every in-flight fetch has been applied.
    pub async fn settle(&mut self) {
        while self.next_fetch().await {}
    }

    /// Release every chunk's render resources and forget the view state.
    pub fn teardown(&mut self) {
        self.store.clear(&mut self.gfx);
        self.gfx.set_highlight(None);
        self.last_range = None;
        self.rendered = false;
        self.drag = None;
        self.pending_click = None;
        self.refetch.clear();
        self.deferred_updates.clear();
    }

    fn in_range(&self, coord: ChunkCoord) -> bool {
        self.last_range.is_some_and(|range| range.contains(coord))
    }

    fn apply_outcome(&mut self, outcome: FetchOutcome) {
        let FetchOutcome { coord, result } = outcome;
        let layout = *self.store.layout();

        if self.refetch.remove(&coord)
            && self.store.contains(coord)
            && self.fetcher.load(coord, false, layout.chunk_fetch_range(coord))
        {
            tracing::debug!("Chunk {} changed during its load, fetching again", coord);
            self.stats.fetches += 1;
            return;
        }

        let deferred = self.deferred_updates.remove(&coord).unwrap_or_default();
        let merged = match result {
            Ok(cells) => {
                let count = cells.len();
                let merged = self.store.merge(coord, cells);
                if merged {
                    tracing::debug!("Chunk {} loaded with {} cells", coord, count);
                    for cell in deferred {
                        self.store.update_cell(cell);
                    }
                    if self.in_range(coord) {
                        self.draw_chunk(coord);
                    }
                } else {
                    tracing::debug!("Chunk {} was evicted before its data arrived", coord);
                }
                merged
            }
            Err(e) => {
                tracing::warn!("Failed to load chunk {}: {}", coord, e);
                false
            }
        };

        let Some(cell_id) = self.pending_click else {
            return;
        };
        if layout.chunk_of_id(cell_id) != coord {
            return;
        }
        if merged {
            self.pending_click = None;
            let action = self.resolve_cell(cell_id);
            self.actions.push_back(action);
        } else if !self.store.contains(coord) {
            self.pending_click = None;
        }
        // A failed load keeps the click until the retry lands.
    }

    fn track_ownership(&mut self, cell: &Cell) {
        let Some(user) = self.session.current_user() else {
            return;
        };
        let mine = cell.is_visible() && cell.owner.as_deref() == Some(user.as_str());
        match (self.my_cells.binary_search(&cell.id), mine) {
            (Err(at), true) => self.my_cells.insert(at, cell.id),
            (Ok(at), false) => {
                self.my_cells.remove(at);
            }
            _ => {}
        }
    }

    /// Rasterize a resident chunk if it needs it and put it on screen.
    fn draw_chunk(&mut self, coord: ChunkCoord) {
        let layout = *self.store.layout();
        let current_user = self.session.current_user();
        let Some(chunk) = self.store.peek_mut(coord) else {
            return;
        };
        if chunk.is_dirty() || !chunk.resources().has_texture() {
            lod::rasterize(
                chunk,
                &layout,
                self.viewport.scale,
                &self.config.thresholds,
                current_user.as_deref(),
                &mut self.gfx,
            );
            self.stats.rasterized += 1;
        }
        let (x, y) = layout.chunk_pixel_origin(coord);
        chunk.resources.attach(&mut self.gfx, x as f32, y as f32);
    }

    fn draw_highlight(&mut self) {
        let rect = self.highlight.map(|id| {
            let (x, y, w, h) = self.store.layout().cell_world_rect(id);
            Rect::new(x as f32, y as f32, w as f32, h as f32)
        });
        self.gfx.set_highlight(rect);
    }

    fn click(&mut self, x: f64, y: f64) -> Option<u64> {
        let layout = *self.store.layout();
        let (world_x, world_y) = self.viewport.screen_to_world(x, y);
        let cell_id = layout.cell_at_world(world_x, world_y)?;

        self.highlight = Some(cell_id);
        self.draw_highlight();

        let coord = layout.chunk_of_id(cell_id);
        let loaded = self.store.get_or_create(coord).is_loaded();
        if loaded {
            let action = self.resolve_cell(cell_id);
            self.actions.push_back(action);
        } else {
            self.pending_click = Some(cell_id);
            if self.fetcher.load(coord, false, layout.chunk_fetch_range(coord)) {
                self.stats.fetches += 1;
            }
        }
        Some(cell_id)
    }

    fn resolve_cell(&mut self, cell_id: u64) -> CellAction {
        match self.store.cell(cell_id) {
            Some(cell) if cell.is_owned() => CellAction::OpenDetail(Arc::clone(cell)),
            _ if self.session.current_user().is_some() => CellAction::Purchase { cell_id },
            _ => {
                self.pending_claim = Some(cell_id);
                CellAction::Authenticate { cell_id }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display_list::{DisplayList, DrawOp};
    use crate::fetcher::testing::MemorySource;
    use std::time::Duration;

    fn config() -> ViewerConfig {
        ViewerConfig {
            layout: GridLayout::new(100, 10, 10.0, 10_000),
            max_cached_chunks: 64,
            viewport_width: 200.0,
            viewport_height: 200.0,
            ..ViewerConfig::default()
        }
    }

    fn controller(
        cells: Vec<Cell>,
        user: Option<&str>,
    ) -> (
        ViewportController<DisplayList>,
        Arc<MemorySource>,
        Arc<StaticSession>,
    ) {
        let source = MemorySource::new(10_000, cells);
        let session = Arc::new(StaticSession::new(user.map(String::from)));
        let controller =
            ViewportController::new(config(), source.clone(), session.clone(), DisplayList::new());
        (controller, source, session)
    }

    #[tokio::test]
    async fn test_first_render_fetches_visible_chunks() {
        let (mut viewer, source, _) = controller(Vec::new(), None);
        assert!(viewer.render());

        // 200x200 screen at scale 1 sees chunks 0..1 plus a 2-chunk margin.
        let range = viewer.visible_range().unwrap();
        assert_eq!(range, ChunkRange::new(0, 3, 0, 3));
        assert_eq!(viewer.store().len(), 16);
        assert_eq!(viewer.stats().fetches, 16);
        assert_eq!(viewer.stats().rasterized, 16);
        assert_eq!(viewer.graphics().sprite_count(), 16);

        viewer.settle().await;
        assert_eq!(source.queries(), 16);
        assert!(viewer.store().coords().all(|c| viewer.store().peek(c).unwrap().is_loaded()));
        viewer.teardown();
    }

    #[tokio::test]
    async fn test_unchanged_view_skips_second_render() {
        let (mut viewer, source, _) = controller(Vec::new(), None);
        viewer.render();
        viewer.settle().await;
        let before = viewer.stats();
        let gfx_before = viewer.graphics().stats();

        assert!(!viewer.render());
        viewer.settle().await;
        let after = viewer.stats();
        assert_eq!(after.skipped, before.skipped + 1);
        assert_eq!(after.fetches, before.fetches);
        assert_eq!(after.rasterized, before.rasterized);
        assert_eq!(after.evicted, before.evicted);
        assert_eq!(viewer.graphics().stats(), gfx_before);
        assert_eq!(source.queries(), 16);
        viewer.teardown();
    }

    #[tokio::test]
    async fn test_fetched_data_is_drawn_once_it_arrives() {
        let (mut viewer, _, _) = controller(vec![Cell::claimed(0, "a", "#FF0000", 0)], None);
        viewer.render();
        let rasterized = viewer.stats().rasterized;

        viewer.settle().await;
        // Every visible chunk's data arrived, so each was redrawn once.
        assert_eq!(viewer.stats().rasterized, rasterized + 16);
        let chunk = viewer.store().peek(ChunkCoord::new(0, 0)).unwrap();
        assert!(!chunk.is_dirty());
        assert!(chunk.cell(0).is_some());
        viewer.teardown();
    }

    #[tokio::test]
    async fn test_zoom_marks_every_chunk_dirty() {
        let (mut viewer, _, _) = controller(Vec::new(), None);
        viewer.render();
        viewer.settle().await;
        let rasterized = viewer.stats().rasterized;

        viewer.on_wheel(-1.0, 0.0, 0.0);
        assert!((viewer.viewport().scale - 1.1).abs() < 1e-12);
        // The range is unchanged but every visible chunk is redrawn.
        assert_eq!(viewer.visible_range(), Some(ChunkRange::new(0, 3, 0, 3)));
        assert_eq!(viewer.stats().rasterized, rasterized + 16);
        viewer.teardown();
    }

    #[tokio::test]
    async fn test_pan_moves_range_and_evicts_under_cap() {
        let (mut viewer, _, _) = controller(Vec::new(), None);
        viewer.evictor = LruEvictor::new(24);

        viewer.render();
        viewer.settle().await;

        viewer.on_pointer_down(100.0, 100.0);
        viewer.on_pointer_move(-100.0, 100.0);
        assert_eq!(viewer.on_pointer_up(-300.0, 100.0), Release::Drag);
        viewer.settle().await;

        let range = viewer.visible_range().unwrap();
        assert_eq!(range, ChunkRange::new(0, 3, 2, 7));
        assert!(viewer.store().len() <= 24);
        assert!(range.iter().all(|c| viewer.store().contains(c)));
        assert!(viewer.stats().evicted > 0);
        // Sprites only exist for the visible range.
        assert_eq!(viewer.graphics().sprite_count(), range.chunk_count());
        viewer.teardown();
        assert_eq!(viewer.graphics().live_textures(), 0);
    }

    #[tokio::test]
    async fn test_click_on_owned_cell_opens_detail() {
        let cell = Cell::claimed(102, "a", "#00FF00", 0);
        let (mut viewer, _, _) = controller(vec![cell.clone()], None);
        viewer.render();
        viewer.settle().await;

        viewer.on_pointer_down(25.0, 15.0);
        viewer.on_pointer_move(27.0, 16.0);
        assert_eq!(viewer.on_pointer_up(27.0, 16.0), Release::Click(Some(102)));
        match viewer.take_action() {
            Some(CellAction::OpenDetail(found)) => assert_eq!(*found, cell),
            other => panic!("unexpected action {other:?}"),
        }
        assert_eq!(
            viewer.graphics().highlight(),
            Some(Rect::new(20.0, 10.0, 10.0, 10.0))
        );
        viewer.teardown();
    }

    #[tokio::test]
    async fn test_click_before_load_resolves_when_data_arrives() {
        let (mut viewer, _, _) = controller(Vec::new(), Some("alice"));
        viewer.on_pointer_down(5.0, 5.0);
        assert_eq!(viewer.on_pointer_up(5.0, 5.0), Release::Click(Some(0)));
        assert!(viewer.take_action().is_none());

        viewer.settle().await;
        assert_eq!(
            viewer.take_action(),
            Some(CellAction::Purchase { cell_id: 0 })
        );
        viewer.teardown();
    }

    #[tokio::test]
    async fn test_signed_out_claim_resumes_after_auth() {
        let (mut viewer, _, session) = controller(Vec::new(), None);
        viewer.render();
        viewer.settle().await;

        viewer.on_pointer_down(35.0, 5.0);
        viewer.on_pointer_up(35.0, 5.0);
        assert_eq!(
            viewer.take_action(),
            Some(CellAction::Authenticate { cell_id: 3 })
        );
        assert_eq!(viewer.pending_claim(), Some(3));
        assert_eq!(viewer.resume_after_auth(), None);

        session.sign_in("alice");
        assert_eq!(
            viewer.resume_after_auth(),
            Some(CellAction::Purchase { cell_id: 3 })
        );
        assert_eq!(viewer.pending_claim(), None);
        viewer.teardown();
    }

    #[tokio::test]
    async fn test_out_of_range_click_is_ignored() {
        let (mut viewer, _, _) = controller(Vec::new(), Some("alice"));
        viewer.render();
        viewer.settle().await;
        let fetches = viewer.stats().fetches;

        viewer.on_pointer_down(-5.0, 5.0);
        assert_eq!(viewer.on_pointer_up(-5.0, 5.0), Release::Click(None));
        assert!(viewer.take_action().is_none());
        assert_eq!(viewer.stats().fetches, fetches);
        viewer.teardown();
    }

    #[tokio::test]
    async fn test_failed_fetch_is_retried_on_next_pass() {
        let (mut viewer, source, _) = controller(Vec::new(), None);
        source.set_failing(true);
        viewer.render();
        viewer.settle().await;
        assert!(viewer
            .store()
            .coords()
            .all(|c| !viewer.store().peek(c).unwrap().is_loaded()));

        source.set_failing(false);
        viewer.on_resize(200.0, 200.0);
        viewer.settle().await;
        assert_eq!(source.queries(), 32);
        assert!(viewer
            .store()
            .coords()
            .all(|c| viewer.store().peek(c).unwrap().is_loaded()));
        viewer.teardown();
    }

    #[tokio::test]
    async fn test_purchase_complete_refetches_owned_cell() {
        let (mut viewer, source, _) = controller(Vec::new(), Some("alice"));
        viewer.render();
        viewer.settle().await;
        assert!(viewer.store().cell(7).is_none());

        source.put(Cell::claimed(7, "alice", "#123456", 0));
        viewer.on_purchase_complete(7);
        viewer.settle().await;
        assert_eq!(
            viewer.store().cell(7).and_then(|c| c.owner.as_deref()),
            Some("alice")
        );
        viewer.teardown();
    }

    #[tokio::test]
    async fn test_live_update_redraws_visible_chunk() {
        let (mut viewer, _, _) = controller(vec![Cell::claimed(1, "a", "#FF0000", 0)], None);
        viewer.render();
        viewer.settle().await;
        let rasterized = viewer.stats().rasterized;

        let mut liked = Cell::claimed(1, "a", "#FF0000", 0);
        liked.apply_like(10);
        viewer.apply_cell_update(liked);
        assert_eq!(viewer.stats().rasterized, rasterized + 1);
        assert_eq!(viewer.store().cell(1).map(|c| c.like_count), Some(1));
        viewer.teardown();
    }

    #[tokio::test]
    async fn test_focus_cell_centers_and_highlights() {
        let (mut viewer, _, _) = controller(Vec::new(), None);
        assert!(viewer.focus_cell(5_555));
        let (x, y) = viewer.viewport().world_to_screen(555.0, 555.0);
        assert!((x - 100.0).abs() < 1e-9 && (y - 100.0).abs() < 1e-9);
        assert!(viewer
            .visible_range()
            .unwrap()
            .contains(ChunkCoord::new(5, 5)));
        assert!(viewer.graphics().highlight().is_some());
        assert!(!viewer.focus_cell(10_000));
        viewer.teardown();
    }

    #[tokio::test]
    async fn test_load_capacity_shrinks_grid() {
        let (mut viewer, _, _) = controller(Vec::new(), None);
        let tiny = viewer.layout().with_capacity(1);
        viewer.store.set_layout(tiny);
        assert_eq!(viewer.load_capacity().await.unwrap(), 10_000);
        assert_eq!(viewer.layout().capacity, 10_000);
    }

    #[tokio::test]
    async fn test_visible_strip_fetches_only_new_chunks() {
        let (mut viewer, source, _) = controller(Vec::new(), None);
        viewer.on_resize(1_000.0, 20.0);
        viewer.settle().await;
        assert_eq!(viewer.visible_range(), Some(ChunkRange::new(0, 2, 0, 9)));
        assert_eq!(viewer.stats().fetches, 30);

        // Scroll so the strip shows cell rows 45..46 (ids 4,500..4,699).
        viewer.on_pointer_down(0.0, 0.0);
        viewer.on_pointer_move(0.0, -450.0);
        assert_eq!(viewer.on_pointer_up(0.0, -450.0), Release::Drag);
        viewer.settle().await;

        assert_eq!(viewer.visible_range(), Some(ChunkRange::new(2, 6, 0, 9)));
        // Chunk row 2 was already loaded; rows 3..6 are new.
        assert_eq!(viewer.stats().fetches, 70);
        assert_eq!(source.queries(), 70);
        viewer.teardown();
    }

    #[tokio::test]
    async fn test_purchase_during_first_load_is_fetched_again() {
        let (mut viewer, source, _) = controller(Vec::new(), Some("alice"));
        viewer.render();
        // Every query reads the store now; results wait in the channel.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(source.queries(), 16);

        source.put(Cell::claimed(7, "alice", "#123456", 0));
        viewer.on_purchase_complete(7);
        viewer.settle().await;

        assert_eq!(source.queries(), 17);
        assert_eq!(
            viewer.store().cell(7).and_then(|c| c.owner.as_deref()),
            Some("alice")
        );
        assert_eq!(viewer.my_cells(), &[7]);
        viewer.teardown();
    }

    #[tokio::test]
    async fn test_live_update_during_load_is_replayed() {
        let (mut viewer, source, _) = controller(vec![Cell::claimed(1, "a", "#FF0000", 0)], None);
        viewer.render();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut liked = Cell::claimed(1, "a", "#FF0000", 0);
        liked.apply_like(10);
        viewer.apply_cell_update(liked);
        viewer.settle().await;

        assert_eq!(viewer.store().cell(1).map(|c| c.like_count), Some(1));
        assert_eq!(source.queries(), 16);
        viewer.teardown();
    }

    #[tokio::test]
    async fn test_click_survives_failed_load() {
        let (mut viewer, source, _) = controller(Vec::new(), None);
        source.set_failing(true);
        viewer.on_pointer_down(5.0, 5.0);
        assert_eq!(viewer.on_pointer_up(5.0, 5.0), Release::Click(Some(0)));
        viewer.settle().await;
        assert!(viewer.take_action().is_none());

        source.set_failing(false);
        viewer.on_resize(200.0, 200.0);
        viewer.settle().await;
        assert_eq!(
            viewer.take_action(),
            Some(CellAction::Authenticate { cell_id: 0 })
        );
        viewer.teardown();
    }

    #[tokio::test]
    async fn test_focus_my_cell_and_gold_border() {
        let cells = vec![
            Cell::claimed(3, "bob", "#0000FF", 0),
            Cell::claimed(7_000, "alice", "#00FF00", 0),
            Cell::claimed(5_555, "alice", "#FF0000", 0),
        ];
        let (mut viewer, _, session) = controller(cells, None);
        assert!(viewer.load_my_cells().await.unwrap().is_empty());
        assert_eq!(viewer.focus_my_cell(), None);

        session.sign_in("alice");
        assert_eq!(viewer.load_my_cells().await.unwrap(), &[5_555, 7_000]);
        assert_eq!(viewer.focus_my_cell(), Some(5_555));
        let (x, y) = viewer.viewport().world_to_screen(555.0, 555.0);
        assert!((x - 100.0).abs() < 1e-9 && (y - 100.0).abs() < 1e-9);

        viewer.settle().await;
        let chunk = viewer.store().peek(ChunkCoord::new(5, 5)).unwrap();
        let ops = viewer.graphics().ops(chunk.resources().texture().unwrap());
        let gold = ops
            .iter()
            .filter(|op| matches!(op, DrawOp::Stroke { width, .. } if *width == 2.0))
            .count();
        assert_eq!(gold, 1);
        viewer.teardown();
    }
}
