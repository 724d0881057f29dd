// ============================================================================
// PLACEMENT SESSION - one request/response cycle at a time
// ============================================================================
//
// Every operation has the same shape:
//   begin_*   check preconditions, mark busy, capture a ticket
//   (await)   the host drives the collaborator future
//   finish_*  apply the result: at most one history commit on success,
//             nothing on failure, busy always cleared
//
// Tickets remember the request id and the history generation they started
// in. A ticket whose session was reset, or whose scene was replaced, is
// stale and its result is dropped on the floor.
//
// The busy slot is shared between the session and its live ticket. Dropping
// a ticket without finishing it (a host task that died, a `place` future
// dropped mid-await) frees the slot, so busy can never outlive its request.
//
// `place`, `analyze` and `edit` wrap begin/await/finish for hosts that just
// want to await.

use std::cell::Cell;
use std::rc::Rc;

use crate::components::history::HistoryLog;
use crate::error::{CollaboratorError, StageError, StageResult};
use crate::geometry::RelativePosition;
use crate::io::{ImageArtifact, decode_data_url};
use crate::ops::ai::{Analyzer, ComposeRequest, Composition, Compositor, EditedImage, Editor};
use crate::product::ScaleFactor;

/// What happened to a finished request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The result was applied (committed, or stored for analysis).
    Applied,
    /// The session or scene was reset while the request was out; the result
    /// was discarded.
    Stale,
    /// Nothing was requested (drop outside the image, cancelled drag).
    Ignored,
}

/// The request currently holding the session.
#[derive(Clone, Copy, Debug)]
struct Pending {
    request_id: u64,
    /// Where the pending product was dropped, shown while busy.
    marker: Option<RelativePosition>,
}

type ActiveSlot = Rc<Cell<Option<Pending>>>;

#[derive(Debug)]
struct TicketStamp {
    request_id: u64,
    generation: u64,
    slot: ActiveSlot,
}

impl Drop for TicketStamp {
    fn drop(&mut self) {
        if self.slot.get().is_some_and(|p| p.request_id == self.request_id) {
            log::warn!("Request #{} abandoned without a result", self.request_id);
            self.slot.set(None);
        }
    }
}

/// A placement request in flight.
#[must_use = "dropping a ticket abandons its request"]
#[derive(Debug)]
pub struct PlacementTicket {
    stamp: TicketStamp,
    product: ImageArtifact,
    product_name: String,
    scene: ImageArtifact,
    position: RelativePosition,
    scale: ScaleFactor,
}

impl PlacementTicket {
    pub fn request(&self) -> ComposeRequest<'_> {
        ComposeRequest {
            product: &self.product,
            product_name: &self.product_name,
            scene: &self.scene,
            scene_name: self.scene.filename(),
            position: self.position,
            scale: self.scale,
        }
    }
}

#[must_use = "dropping a ticket abandons its request"]
#[derive(Debug)]
pub struct AnalysisTicket {
    stamp: TicketStamp,
    scene: ImageArtifact,
}

impl AnalysisTicket {
    pub fn scene(&self) -> &ImageArtifact {
        &self.scene
    }
}

#[must_use = "dropping a ticket abandons its request"]
#[derive(Debug)]
pub struct EditTicket {
    stamp: TicketStamp,
    scene: ImageArtifact,
    instruction: String,
}

impl EditTicket {
    pub fn scene(&self) -> &ImageArtifact {
        &self.scene
    }

    pub fn instruction(&self) -> &str {
        &self.instruction
    }
}

#[derive(Default)]
pub struct PlacementSession {
    /// Request in flight; `Some` means busy. Shared with its ticket.
    active: ActiveSlot,
    next_request_id: u64,
    last_error: Option<String>,
    debug_image: Option<ImageArtifact>,
    prompt: Option<String>,
    analysis: Option<String>,
    /// Number of artifacts this session has committed, used for naming.
    generated: u32,
}

impl PlacementSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_busy(&self) -> bool {
        self.active.get().is_some()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn marker(&self) -> Option<RelativePosition> {
        self.active.get().and_then(|p| p.marker)
    }

    pub fn debug_image(&self) -> Option<&ImageArtifact> {
        self.debug_image.as_ref()
    }

    pub fn prompt(&self) -> Option<&str> {
        self.prompt.as_deref()
    }

    pub fn analysis(&self) -> Option<&str> {
        self.analysis.as_deref()
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    /// Forget everything, including any request in flight. Its ticket will
    /// come back stale.
    pub fn reset(&mut self) {
        if let Some(pending) = self.active.take() {
            log::warn!("Session reset with request #{} still in flight", pending.request_id);
        }
        self.last_error = None;
        self.debug_image = None;
        self.prompt = None;
        self.analysis = None;
        self.generated = 0;
    }

    // ------------------------------------------------------------------
    // Placement
    // ------------------------------------------------------------------

    pub fn begin_placement(
        &mut self,
        history: &HistoryLog,
        product: Option<&ImageArtifact>,
        product_name: Option<&str>,
        position: RelativePosition,
        scale: ScaleFactor,
    ) -> StageResult<PlacementTicket> {
        self.ensure_idle()?;
        let product = self.require(product, "product image")?;
        let product_name = self.require(product_name.filter(|n| !n.trim().is_empty()), "product")?;
        let scene = self.require(history.current(), "scene")?;

        let ticket = PlacementTicket {
            stamp: self.start(history, Some(position)),
            product: product.clone(),
            product_name: product_name.to_string(),
            scene: scene.clone(),
            position,
            scale,
        };
        log::info!(
            "Placement #{}: \"{}\" at ({:.1}%, {:.1}%) scale {:.2}",
            ticket.stamp.request_id,
            ticket.product_name,
            position.x_percent,
            position.y_percent,
            scale.get()
        );
        Ok(ticket)
    }

    pub fn finish_placement(
        &mut self,
        ticket: PlacementTicket,
        result: Result<Composition, CollaboratorError>,
        history: &mut HistoryLog,
    ) -> StageResult<Outcome> {
        if self.settle(&ticket.stamp, history) {
            return Ok(Outcome::Stale);
        }
        let composition = self.check(result)?;
        let artifact = self.materialize(&composition.composite_image, "placement")?;

        self.debug_image = composition.debug_image.as_deref().and_then(|text| {
            decode_data_url(text, "debug")
                .inspect_err(|e| log::warn!("Ignoring unreadable debug image: {}", e))
                .ok()
        });
        self.prompt = composition.prompt;
        history.commit(artifact);
        Ok(Outcome::Applied)
    }

    pub async fn place<C: Compositor>(
        &mut self,
        history: &mut HistoryLog,
        compositor: &C,
        product: Option<&ImageArtifact>,
        product_name: Option<&str>,
        position: RelativePosition,
        scale: ScaleFactor,
    ) -> StageResult<Outcome> {
        let ticket = self.begin_placement(history, product, product_name, position, scale)?;
        let result = compositor.compose(ticket.request()).await;
        self.finish_placement(ticket, result, history)
    }

    // ------------------------------------------------------------------
    // Scene analysis (read-only)
    // ------------------------------------------------------------------

    pub fn begin_analysis(&mut self, history: &HistoryLog) -> StageResult<AnalysisTicket> {
        self.ensure_idle()?;
        let scene = self.require(history.current(), "scene")?.clone();
        let ticket = AnalysisTicket {
            stamp: self.start(history, None),
            scene,
        };
        log::info!("Analysis #{} started", ticket.stamp.request_id);
        Ok(ticket)
    }

    pub fn finish_analysis(
        &mut self,
        ticket: AnalysisTicket,
        result: Result<String, CollaboratorError>,
        history: &HistoryLog,
    ) -> StageResult<Outcome> {
        if self.settle(&ticket.stamp, history) {
            return Ok(Outcome::Stale);
        }
        let description = self.check(result)?;
        self.analysis = Some(description.trim().to_string());
        Ok(Outcome::Applied)
    }

    pub async fn analyze<A: Analyzer>(
        &mut self,
        history: &HistoryLog,
        analyzer: &A,
    ) -> StageResult<Outcome> {
        let ticket = self.begin_analysis(history)?;
        let result = analyzer.analyze(ticket.scene()).await;
        self.finish_analysis(ticket, result, history)
    }

    // ------------------------------------------------------------------
    // Scene edit by prompt
    // ------------------------------------------------------------------

    pub fn begin_edit(&mut self, history: &HistoryLog, instruction: &str) -> StageResult<EditTicket> {
        self.ensure_idle()?;
        let instruction = instruction.trim();
        if instruction.is_empty() {
            return Err(self.record_failure(StageError::IncompleteSelection("edit instruction")));
        }
        let scene = self.require(history.current(), "scene")?.clone();
        let ticket = EditTicket {
            stamp: self.start(history, None),
            scene,
            instruction: instruction.to_string(),
        };
        log::info!("Edit #{}: \"{}\"", ticket.stamp.request_id, ticket.instruction);
        Ok(ticket)
    }

    pub fn finish_edit(
        &mut self,
        ticket: EditTicket,
        result: Result<EditedImage, CollaboratorError>,
        history: &mut HistoryLog,
    ) -> StageResult<Outcome> {
        if self.settle(&ticket.stamp, history) {
            return Ok(Outcome::Stale);
        }
        let edited = self.check(result)?;
        let artifact = self.materialize(&edited.composite_image, "edit")?;
        history.commit(artifact);
        Ok(Outcome::Applied)
    }

    pub async fn edit<E: Editor>(
        &mut self,
        history: &mut HistoryLog,
        editor: &E,
        instruction: &str,
    ) -> StageResult<Outcome> {
        let ticket = self.begin_edit(history, instruction)?;
        let result = editor.edit(ticket.scene(), ticket.instruction()).await;
        self.finish_edit(ticket, result, history)
    }

    // ------------------------------------------------------------------
    // Shared plumbing
    // ------------------------------------------------------------------

    fn ensure_idle(&self) -> StageResult<()> {
        if self.is_busy() {
            log::warn!("Request refused: another request is in flight");
            Err(StageError::Busy)
        } else {
            Ok(())
        }
    }

    fn require<T>(&mut self, value: Option<T>, what: &'static str) -> StageResult<T> {
        value.ok_or_else(|| self.record_failure(StageError::IncompleteSelection(what)))
    }

    fn start(&mut self, history: &HistoryLog, marker: Option<RelativePosition>) -> TicketStamp {
        self.next_request_id += 1;
        let request_id = self.next_request_id;
        self.active.set(Some(Pending { request_id, marker }));
        self.last_error = None;
        TicketStamp {
            request_id,
            generation: history.generation(),
            slot: Rc::clone(&self.active),
        }
    }

    /// Ends the busy period if this ticket owns it. Returns `true` when the
    /// ticket is stale and its result must not be applied.
    fn settle(&mut self, stamp: &TicketStamp, history: &HistoryLog) -> bool {
        if !self.active.get().is_some_and(|p| p.request_id == stamp.request_id) {
            log::warn!("Discarding result of request #{}: session was reset", stamp.request_id);
            return true;
        }
        self.active.set(None);
        if stamp.generation != history.generation() {
            log::warn!("Discarding result of request #{}: scene was replaced", stamp.request_id);
            return true;
        }
        false
    }

    fn check<T>(&mut self, result: Result<T, CollaboratorError>) -> StageResult<T> {
        result.map_err(|e| self.record_failure(StageError::from(e)))
    }

    fn materialize(&mut self, text: &str, kind: &str) -> StageResult<ImageArtifact> {
        let name = format!("{}-{}", kind, self.generated + 1);
        let artifact = decode_data_url(text, name).map_err(|e| self.record_failure(StageError::from(e)))?;
        self.generated += 1;
        Ok(artifact)
    }

    /// Log `err` and keep its user-facing text for the status area.
    pub(crate) fn record_failure(&mut self, err: StageError) -> StageError {
        log::error!("{}", err);
        self.last_error = Some(err.user_message());
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::encode_data_url;
    use std::cell::Cell;

    fn art(name: &str) -> ImageArtifact {
        ImageArtifact::new(name.as_bytes().to_vec(), name, "image/png")
    }

    fn composition(bytes: &[u8]) -> Composition {
        Composition {
            composite_image: encode_data_url(&ImageArtifact::new(bytes.to_vec(), "x", "image/png")),
            debug_image: Some(encode_data_url(&art("dbg"))),
            prompt: Some("place it".into()),
        }
    }

    struct CountingCompositor {
        calls: Cell<u32>,
        reply: Result<Composition, CollaboratorError>,
    }

    impl Compositor for CountingCompositor {
        async fn compose(&self, _request: ComposeRequest<'_>) -> Result<Composition, CollaboratorError> {
            self.calls.set(self.calls.get() + 1);
            self.reply.clone()
        }
    }

    fn scene_history() -> HistoryLog {
        let mut history = HistoryLog::default();
        history.reset(Some(art("S0")));
        history
    }

    fn center() -> RelativePosition {
        RelativePosition::new(50.0, 50.0)
    }

    #[test]
    fn missing_product_fails_before_any_call() {
        let mut session = PlacementSession::new();
        let mut history = scene_history();
        let compositor = CountingCompositor {
            calls: Cell::new(0),
            reply: Ok(composition(b"G1")),
        };
        let res = pollster::block_on(session.place(
            &mut history,
            &compositor,
            None,
            None,
            center(),
            ScaleFactor::default(),
        ));
        assert!(matches!(res, Err(StageError::IncompleteSelection(_))));
        assert_eq!(compositor.calls.get(), 0);
        assert_eq!(history.len(), 1);
        assert!(!session.is_busy());
        assert!(session.last_error().is_some());
    }

    #[test]
    fn missing_scene_fails_before_any_call() {
        let mut session = PlacementSession::new();
        let history = HistoryLog::default();
        let res = session.begin_placement(
            &history,
            Some(&art("chair")),
            Some("Chair"),
            center(),
            ScaleFactor::default(),
        );
        assert!(matches!(res, Err(StageError::IncompleteSelection("scene"))));
        assert!(!session.is_busy());
    }

    #[test]
    fn success_commits_once_and_records_byproducts() {
        let mut session = PlacementSession::new();
        let mut history = scene_history();
        let compositor = CountingCompositor {
            calls: Cell::new(0),
            reply: Ok(composition(b"G1")),
        };
        let outcome = pollster::block_on(session.place(
            &mut history,
            &compositor,
            Some(&art("chair")),
            Some("Chair"),
            center(),
            ScaleFactor::new(1.2),
        ))
        .unwrap();
        assert_eq!(outcome, Outcome::Applied);
        assert_eq!(history.len(), 2);
        assert_eq!(history.current().unwrap().bytes(), b"G1");
        assert_eq!(history.current().unwrap().filename(), "placement-1");
        assert_eq!(session.prompt(), Some("place it"));
        assert_eq!(session.debug_image().unwrap().bytes(), b"dbg");
        assert!(!session.is_busy());
        assert!(session.marker().is_none());
    }

    #[test]
    fn collaborator_failure_leaves_history_untouched() {
        let mut session = PlacementSession::new();
        let mut history = scene_history();
        let before = history.current().cloned();
        let compositor = CountingCompositor {
            calls: Cell::new(0),
            reply: Err(CollaboratorError::Network("timeout".into())),
        };
        let res = pollster::block_on(session.place(
            &mut history,
            &compositor,
            Some(&art("chair")),
            Some("Chair"),
            center(),
            ScaleFactor::default(),
        ));
        assert!(matches!(res, Err(StageError::CollaboratorFailure(_))));
        assert_eq!(history.current().cloned(), before);
        assert_eq!(history.len(), 1);
        assert!(!session.is_busy());
        assert_eq!(session.last_error(), Some("Generation failed: timeout"));
    }

    #[test]
    fn malformed_composite_is_not_committed() {
        let mut session = PlacementSession::new();
        let mut history = scene_history();
        let compositor = CountingCompositor {
            calls: Cell::new(0),
            reply: Ok(Composition {
                composite_image: "garbage".into(),
                debug_image: None,
                prompt: None,
            }),
        };
        let res = pollster::block_on(session.place(
            &mut history,
            &compositor,
            Some(&art("chair")),
            Some("Chair"),
            center(),
            ScaleFactor::default(),
        ));
        assert!(matches!(res, Err(StageError::MalformedArtifact(_))));
        assert_eq!(history.len(), 1);
        assert!(!session.is_busy());
    }

    #[test]
    fn second_request_while_busy_is_refused() {
        let mut session = PlacementSession::new();
        let history = scene_history();
        let ticket = session.begin_analysis(&history).unwrap();
        assert!(session.is_busy());
        assert!(matches!(session.begin_edit(&history, "brighter"), Err(StageError::Busy)));
        session.finish_analysis(ticket, Ok(" cozy room ".into()), &history).unwrap();
        assert_eq!(session.analysis(), Some("cozy room"));
        assert!(!session.is_busy());
    }

    #[test]
    fn result_after_scene_reset_is_stale() {
        let mut session = PlacementSession::new();
        let mut history = scene_history();
        let ticket = session
            .begin_placement(&history, Some(&art("chair")), Some("Chair"), center(), ScaleFactor::default())
            .unwrap();
        history.reset(Some(art("S1")));
        let outcome = session.finish_placement(ticket, Ok(composition(b"late")), &mut history).unwrap();
        assert_eq!(outcome, Outcome::Stale);
        assert_eq!(history.len(), 1);
        assert_eq!(history.current(), Some(&art("S1")));
        assert!(!session.is_busy());
    }

    #[test]
    fn result_after_session_reset_does_not_touch_new_request() {
        let mut session = PlacementSession::new();
        let mut history = scene_history();
        let old = session.begin_analysis(&history).unwrap();
        session.reset();
        history.reset(Some(art("S1")));
        let new = session.begin_analysis(&history).unwrap();
        assert_eq!(session.finish_analysis(old, Ok("old".into()), &history).unwrap(), Outcome::Stale);
        assert!(session.is_busy());
        assert_eq!(session.finish_analysis(new, Ok("new".into()), &history).unwrap(), Outcome::Applied);
        assert_eq!(session.analysis(), Some("new"));
    }

    #[test]
    fn unfinished_ticket_frees_the_session_when_dropped() {
        let mut session = PlacementSession::new();
        let history = scene_history();
        let ticket = session
            .begin_placement(&history, Some(&art("chair")), Some("Chair"), center(), ScaleFactor::default())
            .unwrap();
        assert!(session.is_busy());
        assert_eq!(session.marker(), Some(center()));

        drop(ticket);
        assert!(!session.is_busy());
        assert!(session.marker().is_none());

        let edit = session.begin_edit(&history, "warmer light").unwrap();
        drop(edit);
        let analysis = session.begin_analysis(&history).unwrap();
        drop(analysis);
        assert!(!session.is_busy());
    }

    #[test]
    fn ticket_dropped_after_reset_leaves_newer_request_busy() {
        let mut session = PlacementSession::new();
        let history = scene_history();
        let old = session.begin_analysis(&history).unwrap();
        session.reset();
        let _new = session.begin_analysis(&history).unwrap();
        drop(old);
        assert!(session.is_busy());
    }

    #[test]
    fn finished_ticket_does_not_touch_next_request() {
        let mut session = PlacementSession::new();
        let mut history = scene_history();
        let first = session.begin_edit(&history, "brighter").unwrap();
        session
            .finish_edit(first, Err(CollaboratorError::Model("refused".into())), &mut history)
            .unwrap_err();
        assert!(!session.is_busy());
        let second = session.begin_analysis(&history).unwrap();
        assert!(session.is_busy());
        session.finish_analysis(second, Ok("ok".into()), &history).unwrap();
        assert!(!session.is_busy());
    }

    #[test]
    fn empty_edit_instruction_is_incomplete() {
        let mut session = PlacementSession::new();
        let history = scene_history();
        assert!(matches!(
            session.begin_edit(&history, "   "),
            Err(StageError::IncompleteSelection("edit instruction"))
        ));
    }

    #[test]
    fn dropped_future_clears_busy() {
        use std::future::Future;
        use std::pin::pin;
        use std::task::{Context, Poll, Waker};

        struct NeverCompositor;
        impl Compositor for NeverCompositor {
            fn compose(
                &self,
                _request: ComposeRequest<'_>,
            ) -> impl Future<Output = Result<Composition, CollaboratorError>> {
                std::future::pending()
            }
        }

        let mut session = PlacementSession::new();
        let mut history = scene_history();
        {
            let chair = art("chair");
            let mut fut = pin!(session.place(
                &mut history,
                &NeverCompositor,
                Some(&chair),
                Some("Chair"),
                center(),
                ScaleFactor::default(),
            ));
            let mut cx = Context::from_waker(Waker::noop());
            assert!(matches!(fut.as_mut().poll(&mut cx), Poll::Pending));
        }
        assert!(!session.is_busy());
        assert_eq!(history.len(), 1);
    }
}
