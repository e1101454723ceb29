// ============================================================================
// OPS — whole-raster operations run on CPU snapshots
// ============================================================================

pub mod flood_fill;
pub mod overlay;
