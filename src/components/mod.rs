// ============================================================================
// COMPONENTS - stateful building blocks owned by the workspace
// ============================================================================
//
//   history.rs - linear undo/redo log of scene artifacts
//   drag.rs    - pointer and touch drag state machine
// ============================================================================

pub mod drag;
pub mod history;

pub use drag::{DragController, DragOutcome, DragPhase, DragSurface, DropPosition, DropZone};
pub use history::HistoryLog;
