// ============================================================================
// GPU MODULE — wgpu-backed mask rasters
// ============================================================================
//
// Architecture:
//   context.rs — wgpu Device, Queue, adapter init
//   shaders.rs — WGSL shader source (inline strings)
//   raster.rs  — GpuRasterBackend: R32Uint storage textures + stamp pipeline
// ============================================================================

pub mod context;
pub mod raster;
pub mod shaders;

pub use raster::GpuRasterBackend;

use crate::mask::{CpuRasterBackend, RasterBackend, Readiness};
use crate::settings::Tunables;

/// WGPU requires `bytes_per_row` of buffer copies to be a multiple of 256.
pub const COPY_BYTES_PER_ROW_ALIGNMENT: u32 = 256;

/// Round `unpadded` up to the next multiple of `COPY_BYTES_PER_ROW_ALIGNMENT`.
pub fn aligned_bytes_per_row(unpadded: u32) -> u32 {
    unpadded.div_ceil(COPY_BYTES_PER_ROW_ALIGNMENT) * COPY_BYTES_PER_ROW_ALIGNMENT
}

/// Pick the raster backend for a new session.
///
/// GPU first when enabled, then the CPU rasters if fallback is allowed.
/// Returns `None` with `Readiness::Unavailable` semantics when neither works.
pub fn select_backend(tunables: &Tunables) -> (Option<Box<dyn RasterBackend>>, Readiness) {
    if tunables.gpu_acceleration {
        match GpuRasterBackend::create_default(&tunables.preferred_gpu) {
            Ok(backend) => {
                crate::log_info!("[GPU] Mask rasters on '{}'", backend.adapter_name());
                return (Some(Box::new(backend)), Readiness::Gpu);
            }
            Err(e) => {
                crate::log_warn!("[GPU] Raster backend unavailable: {}", e);
            }
        }
    }
    if tunables.allow_cpu_fallback || !tunables.gpu_acceleration {
        crate::log_info!("Mask rasters on CPU");
        return (Some(Box::new(CpuRasterBackend::new())), Readiness::CpuFallback);
    }
    crate::log_err!("No raster backend available; editing disabled");
    (None, Readiness::Unavailable)
}
