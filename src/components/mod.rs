// ============================================================================
// COMPONENTS — editing state machines driven by the session
// ============================================================================
//
//   history.rs — PatchUndoLedger, patch snapshots and expansion
//   stroke.rs  — StrokeController: stamp interpolation over a growing patch
//   gesture.rs — GestureCoordinator: raw contacts → semantic gestures
// ============================================================================

pub mod gesture;
pub mod history;
pub mod stroke;
