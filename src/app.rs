use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::components::drag::{DragController, DragOutcome, DragPhase, DragSurface, DropPosition, DropZone};
use crate::components::history::HistoryLog;
use crate::config::StageConfig;
use crate::error::{CollaboratorError, StageError, StageResult};
use crate::geometry::{Point, Rect, Size};
use crate::io::{ImageArtifact, ObjectUrl, ObjectUrlRegistry};
use crate::ops::ai::{Analyzer, Composition, Compositor, Editor};
use crate::product::{Product, ScaleFactor};
use crate::session::{Outcome, PlacementSession, PlacementTicket};

// ============================================================================
// WORKSPACE - root controller owning every piece of session state
// ============================================================================

/// Display reference for the current scene. Minted once per scene state and
/// released when the state changes, never per render.
struct SceneDisplay {
    source: ImageArtifact,
    url: ObjectUrl,
}

/// The application state: scene history, product shelf, drag input and the
/// request session. Hosts forward their input events here and render from
/// the accessors.
pub struct Workspace<S: DragSurface + Clone> {
    config: StageConfig,
    history: HistoryLog,
    session: PlacementSession,
    drag: DragController<S>,
    urls: ObjectUrlRegistry,
    products: Vec<Product>,
    selected: Option<Uuid>,
    scale: ScaleFactor,
    scene_display: Option<SceneDisplay>,
}

impl<S: DragSurface + Clone> Workspace<S> {
    pub fn new(surface: S, config: StageConfig) -> StageResult<Self> {
        config.validate()?;
        let history = HistoryLog::new(config.history_limit)
            .with_memory_limit(config.history_memory_limit_bytes());
        log::info!(
            "Workspace ready: model frame {}px, history limit {}",
            config.model_input_side,
            config.history_limit
        );
        Ok(Self {
            scale: ScaleFactor::new(config.default_scale),
            config,
            history,
            session: PlacementSession::new(),
            drag: DragController::new(surface),
            urls: ObjectUrlRegistry::new(),
            products: Vec::new(),
            selected: None,
            scene_display: None,
        })
    }

    pub fn config(&self) -> &StageConfig {
        &self.config
    }

    pub fn history(&self) -> &HistoryLog {
        &self.history
    }

    pub fn session(&self) -> &PlacementSession {
        &self.session
    }

    pub fn object_urls(&self) -> &ObjectUrlRegistry {
        &self.urls
    }

    pub fn is_busy(&self) -> bool {
        self.session.is_busy()
    }

    // ========================================================================
    // SCENE
    // ========================================================================

    /// Start over with a new scene. Anything still in flight for the old one
    /// will come back stale.
    pub fn upload_scene(&mut self, artifact: ImageArtifact) {
        log::info!("Scene uploaded: {} ({} bytes)", artifact.filename(), artifact.len());
        self.session.reset();
        self.history.reset(Some(artifact));
        self.refresh_scene();
    }

    pub fn upload_scene_from_path(&mut self, path: &Path) -> StageResult<()> {
        let artifact = ImageArtifact::from_path(path).map_err(|e| {
            self.session.record_failure(match e {
                crate::error::CodecError::Io(io) => StageError::Io(io),
                other => StageError::MalformedArtifact(other),
            })
        })?;
        self.upload_scene(artifact);
        Ok(())
    }

    pub fn current_scene(&self) -> Option<&ImageArtifact> {
        self.history.current()
    }

    /// Natural size of the current scene, if its header can be read.
    pub fn scene_size(&self) -> Option<Size> {
        self.history.current().and_then(|scene| {
            scene
                .dimensions()
                .inspect_err(|e| log::warn!("Cannot read scene size: {}", e))
                .ok()
        })
    }

    /// Object reference for displaying the current scene.
    pub fn scene_url(&mut self) -> Option<&str> {
        let current = self.history.current()?;
        let stale = self
            .scene_display
            .as_ref()
            .is_none_or(|display| !display.source.same_payload(current));
        if stale {
            let fresh = SceneDisplay {
                source: current.clone(),
                url: self.urls.create(current),
            };
            if let Some(old) = self.scene_display.replace(fresh) {
                self.urls.release(old.url);
            }
        }
        self.scene_display.as_ref().map(|display| display.url.as_str())
    }

    pub fn undo(&mut self) -> bool {
        if self.session.is_busy() || !self.history.undo() {
            return false;
        }
        self.refresh_scene();
        true
    }

    pub fn redo(&mut self) -> bool {
        if self.session.is_busy() || !self.history.redo() {
            return false;
        }
        self.refresh_scene();
        true
    }

    pub fn can_undo(&self) -> bool {
        !self.session.is_busy() && self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        !self.session.is_busy() && self.history.can_redo()
    }

    /// Re-derive everything that depends on which scene state is current.
    fn refresh_scene(&mut self) {
        if self.history.current().is_none()
            && let Some(old) = self.scene_display.take()
        {
            self.urls.release(old.url);
        }
        if let Some(zone) = self.drag.drop_zone().copied() {
            let natural = self.scene_size();
            self.drag.register_drop_zone(DropZone::new(zone.rect, natural));
        }
    }

    // ========================================================================
    // PRODUCTS
    // ========================================================================

    pub fn add_catalog_product(&mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Uuid {
        let product = Product::from_catalog(name, path);
        let id = product.id;
        self.products.push(product);
        id
    }

    /// Add an uploaded product and select it.
    pub fn add_uploaded_product(&mut self, artifact: &ImageArtifact) -> Uuid {
        let product = Product::from_upload(artifact, &mut self.urls);
        let id = product.id;
        log::info!("Product uploaded: \"{}\"", product.name);
        self.products.push(product);
        self.selected = Some(id);
        id
    }

    pub fn remove_product(&mut self, id: Uuid) -> bool {
        let Some(index) = self.products.iter().position(|p| p.id == id) else {
            return false;
        };
        self.products.remove(index).release(&mut self.urls);
        if self.selected == Some(id) {
            self.selected = None;
        }
        true
    }

    /// Select a product by id, or clear the selection with `None`. Returns
    /// `false` for an unknown id.
    pub fn select_product(&mut self, id: Option<Uuid>) -> bool {
        match id {
            Some(id) if !self.products.iter().any(|p| p.id == id) => false,
            _ => {
                self.selected = id;
                true
            }
        }
    }

    pub fn products(&self) -> &[Product] {
        &self.products
    }

    pub fn selected_product(&self) -> Option<&Product> {
        let id = self.selected?;
        self.products.iter().find(|p| p.id == id)
    }

    pub fn scale(&self) -> ScaleFactor {
        self.scale
    }

    pub fn set_scale(&mut self, value: f64) -> ScaleFactor {
        self.scale = ScaleFactor::new(value);
        self.scale
    }

    // ========================================================================
    // DRAG INPUT
    // ========================================================================

    /// Where the scene is displayed on screen.
    pub fn set_drop_zone_rect(&mut self, rect: Rect) {
        let natural = self.scene_size();
        self.drag.register_drop_zone(DropZone::new(rect, natural));
    }

    pub fn clear_drop_zone(&mut self) {
        self.drag.clear_drop_zone();
    }

    pub fn drag_phase(&self) -> DragPhase {
        self.drag.phase()
    }

    pub fn ghost_position(&self) -> Option<Point> {
        self.drag.ghost_position()
    }

    pub fn touch_start(&mut self, point: Point) -> bool {
        let ready = self.selected_product().is_some() && !self.session.is_busy();
        self.drag.touch_start(point, ready)
    }

    pub fn touch_move(&mut self, point: Point) -> Option<Point> {
        self.drag.touch_move(point)
    }

    pub fn cancel_drag(&mut self) {
        self.drag.cancel();
    }

    pub fn pointer_drag_over(&self, point: Point) -> Option<Point> {
        self.drag.pointer_drag_over(point)
    }

    pub async fn finish_touch_drag<C: Compositor>(
        &mut self,
        point: Point,
        compositor: &C,
    ) -> StageResult<Outcome> {
        match self.drag.touch_end(point) {
            Some(DragOutcome::Dropped(drop)) => self.handle_drop(drop, compositor).await,
            Some(DragOutcome::Cancelled) | None => Ok(Outcome::Ignored),
        }
    }

    pub async fn pointer_drop<C: Compositor>(
        &mut self,
        point: Point,
        compositor: &C,
    ) -> StageResult<Outcome> {
        match self.drag.pointer_drop(point) {
            Some(drop) => self.handle_drop(drop, compositor).await,
            None => Ok(Outcome::Ignored),
        }
    }

    // ========================================================================
    // REQUESTS
    // ========================================================================

    /// Place the selected product where it was dropped.
    ///
    /// Missing inputs fail before the position is looked at; a drop in a
    /// letterbox band is then ignored without a request or a file read.
    pub async fn handle_drop<C: Compositor>(
        &mut self,
        drop: DropPosition,
        compositor: &C,
    ) -> StageResult<Outcome> {
        let index = self.check_drop_inputs()?;
        let Some(position) = drop.relative else {
            log::debug!("Drop outside the scene ignored");
            return Ok(Outcome::Ignored);
        };
        let (product, name) = self.load_product(index)?;
        let outcome = self
            .session
            .place(&mut self.history, compositor, Some(&product), Some(&name), position, self.scale)
            .await;
        self.refresh_scene();
        outcome
    }

    /// First half of [`handle_drop`](Self::handle_drop) for hosts that drive
    /// the compositor future themselves. `Ok(None)` means the drop was ignored.
    pub fn begin_drop(&mut self, drop: DropPosition) -> StageResult<Option<PlacementTicket>> {
        let index = self.check_drop_inputs()?;
        let Some(position) = drop.relative else {
            log::debug!("Drop outside the scene ignored");
            return Ok(None);
        };
        let (product, name) = self.load_product(index)?;
        self.session
            .begin_placement(&self.history, Some(&product), Some(&name), position, self.scale)
            .map(Some)
    }

    pub fn finish_drop(
        &mut self,
        ticket: PlacementTicket,
        result: Result<Composition, CollaboratorError>,
    ) -> StageResult<Outcome> {
        let outcome = self.session.finish_placement(ticket, result, &mut self.history);
        self.refresh_scene();
        outcome
    }

    pub async fn analyze<A: Analyzer>(&mut self, analyzer: &A) -> StageResult<Outcome> {
        self.session.analyze(&self.history, analyzer).await
    }

    pub async fn edit<E: Editor>(&mut self, editor: &E, instruction: &str) -> StageResult<Outcome> {
        let outcome = self.session.edit(&mut self.history, editor, instruction).await;
        self.refresh_scene();
        outcome
    }

    /// Busy, product and scene checks. Returns the selected product's index.
    fn check_drop_inputs(&mut self) -> StageResult<usize> {
        if self.session.is_busy() {
            return Err(StageError::Busy);
        }
        let index = self
            .selected
            .and_then(|id| self.products.iter().position(|p| p.id == id));
        let Some(index) = index else {
            return Err(self.session.record_failure(StageError::IncompleteSelection("product")));
        };
        if self.history.current().is_none() {
            return Err(self.session.record_failure(StageError::IncompleteSelection("scene")));
        }
        Ok(index)
    }

    fn load_product(&mut self, index: usize) -> StageResult<(ImageArtifact, String)> {
        let product = &self.products[index];
        let artifact = product
            .load_artifact(&self.urls)
            .map_err(|e| self.session.record_failure(e))?;
        Ok((artifact, product.name.clone()))
    }

    // ========================================================================
    // RESET / TEARDOWN
    // ========================================================================

    /// Back to a blank workspace: no scene, no uploaded products, no
    /// selection. Catalog products stay on the shelf.
    pub fn reset(&mut self) {
        log::info!("Workspace reset");
        self.drag.cancel();
        self.session.reset();
        self.history.reset(None);
        self.selected = None;
        let (uploaded, catalog): (Vec<_>, Vec<_>) =
            self.products.drain(..).partition(Product::is_blob_backed);
        self.products = catalog;
        for product in uploaded {
            product.release(&mut self.urls);
        }
        self.scale = ScaleFactor::new(self.config.default_scale);
        self.refresh_scene();
    }
}

impl<S: DragSurface + Clone> Drop for Workspace<S> {
    fn drop(&mut self) {
        if let Some(display) = self.scene_display.take() {
            self.urls.release(display.url);
        }
        for product in self.products.drain(..) {
            product.release(&mut self.urls);
        }
        log::debug!("Workspace torn down, {} references live", self.urls.live_count());
    }
}
