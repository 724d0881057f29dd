// ============================================================================
// OPS - image operations and the AI collaborator seam
// ============================================================================
//
//   transform.rs - pad to / crop from the square model frame, debug marker
//   ai.rs        - compositor, analyzer and editor contracts
// ============================================================================

pub mod ai;
pub mod transform;
