// ============================================================================
// ANNOTTY — touch-first raster annotation core
// ============================================================================
//
// Layout:
//   transform.rs  — screen ↔ image ↔ mask coordinate mapping
//   mask/         — MaskStore over a CPU or GPU raster backend
//   gpu/          — wgpu context, WGSL stamp shader, GPU raster backend
//   components/   — gesture recognition, strokes, undo history
//   ops/          — flood fill, display overlay
//   canvas.rs     — AnnotationSession wiring it all together
// ============================================================================

#![allow(clippy::too_many_arguments)]

#[macro_use]
pub mod logger;
pub mod canvas;
pub mod components;
pub mod error;
pub mod geometry;
pub mod gpu;
pub mod io;
pub mod mask;
pub mod ops;
pub mod settings;
pub mod transform;

pub use canvas::{AnnotationSession, MaskEditor};
pub use components::gesture::{Contact, DeviceKind, GestureCoordinator, GestureListener, PointerEvent, PointerPhase, ToolMode};
pub use components::history::PatchUndoLedger;
pub use components::stroke::{BrushSettings, StrokeController};
pub use error::{AnnotError, Result};
pub use geometry::RasterRect;
pub use mask::{MaskGeometry, MaskStore, Readiness};
pub use settings::Tunables;
pub use transform::{CoordinateTransform, TransformError};
