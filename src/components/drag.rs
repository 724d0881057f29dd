//! Drag-and-drop input: turns native pointer drags and synthetic touch drags
//! into a single drop event with a position.
//!
//! Native drag events never fire for touch input, so touch drags are tracked
//! by hand as an explicit state machine:
//!
//! ```text
//! Idle --touch_start--> Dragging --touch_move--> Dragging
//!                           |--touch_end over zone----> Dropped   --> Idle
//!                           |--touch_end elsewhere----> Cancelled --> Idle
//!                           `--cancel-----------------> Cancelled --> Idle
//! ```
//!
//! While dragging, the host's move/end listeners are attached and page
//! scrolling is suppressed. Both are owned by a [`ListenerLease`] stored in
//! the `Dragging` state, so leaving that state by any path releases them
//! exactly once.

use crate::geometry::{Point, Rect, RelativePosition, Size, to_relative};

/// Host-side hooks the touch path needs while a drag is live.
///
/// Methods take `&self`: hosts hand out cheap handles (`Rc`, references)
/// and keep their own interior state.
pub trait DragSurface {
    fn attach_drag_listeners(&self);
    fn detach_drag_listeners(&self);
    fn set_scroll_suppressed(&self, suppressed: bool);
}

impl<T: DragSurface + ?Sized> DragSurface for std::rc::Rc<T> {
    fn attach_drag_listeners(&self) {
        (**self).attach_drag_listeners()
    }
    fn detach_drag_listeners(&self) {
        (**self).detach_drag_listeners()
    }
    fn set_scroll_suppressed(&self, suppressed: bool) {
        (**self).set_scroll_suppressed(suppressed)
    }
}

/// Listeners attached and scroll suppressed for as long as this lives.
struct ListenerLease<S: DragSurface> {
    surface: S,
}

impl<S: DragSurface> ListenerLease<S> {
    fn acquire(surface: S) -> Self {
        surface.attach_drag_listeners();
        surface.set_scroll_suppressed(true);
        Self { surface }
    }
}

impl<S: DragSurface> Drop for ListenerLease<S> {
    fn drop(&mut self) {
        self.surface.detach_drag_listeners();
        self.surface.set_scroll_suppressed(false);
    }
}

/// The registered drop target: where the scene is displayed, and the natural
/// size of the scene shown in it (`None` when no scene is loaded).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DropZone {
    pub rect: Rect,
    pub natural: Option<Size>,
}

impl DropZone {
    pub fn new(rect: Rect, natural: Option<Size>) -> Self {
        Self { rect, natural }
    }

    pub fn hit_test(&self, p: Point) -> bool {
        self.rect.contains(p)
    }

    fn drop_at(&self, p: Point) -> DropPosition {
        DropPosition {
            local: self.rect.to_local(p),
            relative: self.natural.and_then(|n| to_relative(self.rect, n, p).ok()),
        }
    }
}

/// Where something was dropped.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DropPosition {
    /// Relative to the drop zone's top-left corner.
    pub local: Point,
    /// Relative to the rendered, letterbox-corrected scene. `None` when the
    /// drop landed in a letterbox band or no scene is loaded.
    pub relative: Option<RelativePosition>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DragOutcome {
    Dropped(DropPosition),
    Cancelled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DragPhase {
    Idle,
    Dragging,
}

struct TouchDrag<S: DragSurface> {
    ghost: Point,
    /// Zone-local preview position while hovering the drop zone.
    hover: Option<Point>,
    _lease: ListenerLease<S>,
}

enum DragState<S: DragSurface> {
    Idle,
    Dragging(TouchDrag<S>),
}

pub struct DragController<S: DragSurface + Clone> {
    surface: S,
    zone: Option<DropZone>,
    state: DragState<S>,
}

impl<S: DragSurface + Clone> DragController<S> {
    pub fn new(surface: S) -> Self {
        Self {
            surface,
            zone: None,
            state: DragState::Idle,
        }
    }

    pub fn register_drop_zone(&mut self, zone: DropZone) {
        self.zone = Some(zone);
    }

    pub fn clear_drop_zone(&mut self) {
        self.zone = None;
    }

    pub fn drop_zone(&self) -> Option<&DropZone> {
        self.zone.as_ref()
    }

    pub fn phase(&self) -> DragPhase {
        match self.state {
            DragState::Idle => DragPhase::Idle,
            DragState::Dragging(_) => DragPhase::Dragging,
        }
    }

    /// Where the dragged product's ghost image should be drawn.
    pub fn ghost_position(&self) -> Option<Point> {
        match &self.state {
            DragState::Dragging(drag) => Some(drag.ghost),
            DragState::Idle => None,
        }
    }

    /// Zone-local live preview, present only while hovering the zone.
    pub fn preview_position(&self) -> Option<Point> {
        match &self.state {
            DragState::Dragging(drag) => drag.hover,
            DragState::Idle => None,
        }
    }

    // ------------------------------------------------------------------
    // Touch path
    // ------------------------------------------------------------------

    /// Begin a touch drag. Ignored (returns `false`) without a selected
    /// product.
    pub fn touch_start(&mut self, point: Point, product_selected: bool) -> bool {
        if !product_selected {
            return false;
        }
        // A stale drag, if any, releases its lease before the new one attaches
        self.state = DragState::Idle;
        self.state = DragState::Dragging(TouchDrag {
            ghost: point,
            hover: self.hover_at(point),
            _lease: ListenerLease::acquire(self.surface.clone()),
        });
        log::debug!("Touch drag started at ({:.1}, {:.1})", point.x, point.y);
        true
    }

    /// Track the finger. Returns the zone-local preview position while over
    /// the drop zone.
    pub fn touch_move(&mut self, point: Point) -> Option<Point> {
        let hover = self.hover_at(point);
        match &mut self.state {
            DragState::Dragging(drag) => {
                drag.ghost = point;
                drag.hover = hover;
                hover
            }
            DragState::Idle => None,
        }
    }

    /// Finish a touch drag. `None` if no drag was in progress.
    pub fn touch_end(&mut self, point: Point) -> Option<DragOutcome> {
        // Leaving Dragging drops the lease whichever way this goes
        let DragState::Dragging(_) = std::mem::replace(&mut self.state, DragState::Idle) else {
            return None;
        };
        let outcome = match self.zone {
            Some(zone) if zone.hit_test(point) => DragOutcome::Dropped(zone.drop_at(point)),
            _ => DragOutcome::Cancelled,
        };
        log::debug!("Touch drag ended: {:?}", outcome);
        Some(outcome)
    }

    /// Abort an in-progress drag (touch-cancel, focus loss).
    pub fn cancel(&mut self) -> Option<DragOutcome> {
        match std::mem::replace(&mut self.state, DragState::Idle) {
            DragState::Dragging(_) => Some(DragOutcome::Cancelled),
            DragState::Idle => None,
        }
    }

    // ------------------------------------------------------------------
    // Pointer path (native drag and drop)
    // ------------------------------------------------------------------

    /// Hover feedback for a native drag over the page.
    pub fn pointer_drag_over(&self, point: Point) -> Option<Point> {
        self.hover_at(point)
    }

    /// A native drop. `None` when it did not land on the drop zone.
    pub fn pointer_drop(&self, point: Point) -> Option<DropPosition> {
        self.zone
            .filter(|zone| zone.hit_test(point))
            .map(|zone| zone.drop_at(point))
    }

    fn hover_at(&self, point: Point) -> Option<Point> {
        self.zone
            .filter(|zone| zone.hit_test(point))
            .map(|zone| zone.rect.to_local(point))
    }
}
