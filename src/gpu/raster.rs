// ============================================================================
// GPU RASTER BACKEND — mask rasters as r32uint storage textures
// ============================================================================
//
// Ordering: every stamp batch is submitted immediately, and
// `queue.write_texture` uploads run at the start of the next submission, so
// uploads and stamps execute in the order they were issued.  Reads encode a
// texture→buffer copy, submit it, and block on `map_async`, which makes them
// observe everything submitted before.

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use super::aligned_bytes_per_row;
use super::context::GpuContext;
use crate::error::{AnnotError, Result};
use crate::geometry::RasterRect;
use crate::mask::{RasterBackend, RasterHandle, Stamp};

const MASK_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R32Uint;
/// Bytes per texel of `MASK_FORMAT`.
const TEXEL_BYTES: u32 = 4;
/// Rows uploaded per `write_texture` call when filling a raster.
const FILL_BAND_ROWS: u32 = 256;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct BatchParams {
    origin: [u32; 2],
    size: [u32; 2],
    count: u32,
    _pad: [u32; 3],
}

struct GpuRaster {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
}

// ============================================================================
// STAMP PIPELINE
// ============================================================================

struct StampPipeline {
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
}

impl StampPipeline {
    fn new(device: &wgpu::Device) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("brush_stamp_shader"),
            source: wgpu::ShaderSource::Wgsl(super::shaders::BRUSH_STAMP_SHADER.into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("brush_stamp_bgl"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::StorageTexture {
                        access: wgpu::StorageTextureAccess::WriteOnly,
                        format: MASK_FORMAT,
                        view_dimension: wgpu::TextureViewDimension::D2,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: true },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("brush_stamp_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("brush_stamp_pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: "cs_stamp",
            compilation_options: Default::default(),
        });

        Self {
            pipeline,
            bind_group_layout,
        }
    }
}

// ============================================================================
// BACKEND
// ============================================================================

pub struct GpuRasterBackend {
    ctx: GpuContext,
    stamp: StampPipeline,
    rasters: Vec<Option<GpuRaster>>,
    /// Cached readback buffer and its size in bytes.
    staging: Option<(wgpu::Buffer, u64)>,
}

impl GpuRasterBackend {
    /// Build the stamp pipeline on `ctx`.  Shader or pipeline validation
    /// failures are returned instead of panicking.
    pub fn new(ctx: GpuContext) -> Result<Self> {
        ctx.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let stamp = StampPipeline::new(&ctx.device);
        if let Some(err) = pollster::block_on(ctx.device.pop_error_scope()) {
            return Err(AnnotError::GpuInit(format!("stamp pipeline: {}", err)));
        }
        Ok(Self {
            ctx,
            stamp,
            rasters: Vec::new(),
            staging: None,
        })
    }

    /// Request an adapter and build the backend in one go.
    pub fn create_default(preferred_gpu: &str) -> Result<Self> {
        let ctx = GpuContext::new(preferred_gpu)
            .ok_or_else(|| AnnotError::GpuInit("no suitable adapter".to_string()))?;
        Self::new(ctx)
    }

    pub fn adapter_name(&self) -> &str {
        &self.ctx.adapter_name
    }

    fn raster(&self, handle: RasterHandle) -> Result<&GpuRaster> {
        self.rasters
            .get(handle.index())
            .and_then(|r| r.as_ref())
            .ok_or(AnnotError::UnknownRaster(handle))
    }

    fn check_rect(raster: &GpuRaster, rect: RasterRect) -> Result<()> {
        if rect.fits_within(raster.width, raster.height) {
            Ok(())
        } else {
            Err(AnnotError::RegionOutOfBounds {
                rect,
                width: raster.width,
                height: raster.height,
            })
        }
    }

    fn upload_words(&self, texture: &wgpu::Texture, rect: RasterRect, words: &[u32]) {
        self.ctx.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: rect.x,
                    y: rect.y,
                    z: 0,
                },
                aspect: wgpu::TextureAspect::All,
            },
            bytemuck::cast_slice(words),
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(TEXEL_BYTES * rect.width),
                rows_per_image: Some(rect.height),
            },
            wgpu::Extent3d {
                width: rect.width,
                height: rect.height,
                depth_or_array_layers: 1,
            },
        );
    }

    /// Reuse the cached staging buffer when it is large enough.
    /// Returns the buffer together with its real capacity.
    fn staging_buffer(&mut self, size: u64) -> (wgpu::Buffer, u64) {
        if let Some((buffer, cap)) = self.staging.take()
            && cap >= size
        {
            return (buffer, cap);
        }
        let buffer = self.ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("mask_readback"),
            size,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        (buffer, size)
    }

    #[cfg(test)]
    fn staging_capacity(&self) -> u64 {
        self.staging.as_ref().map_or(0, |s| s.1)
    }
}

impl RasterBackend for GpuRasterBackend {
    fn name(&self) -> &str {
        "GPU"
    }

    fn is_gpu(&self) -> bool {
        true
    }

    fn create(&mut self, width: u32, height: u32, initial: Option<&[u8]>) -> Result<RasterHandle> {
        if width == 0 || height == 0 || !self.ctx.supports_size(width, height) {
            return Err(AnnotError::InvalidDimensions { width, height });
        }
        let len = width as usize * height as usize;
        if let Some(bytes) = initial
            && bytes.len() != len
        {
            return Err(AnnotError::SizeMismatch {
                expected: len,
                actual: bytes.len(),
            });
        }

        let device = &self.ctx.device;
        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("MaskRaster"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: MASK_FORMAT,
            usage: wgpu::TextureUsages::STORAGE_BINDING
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(AnnotError::GpuInit(format!("mask texture {}x{}: {}", width, height, err)));
        }
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let raster = GpuRaster {
            texture,
            view,
            width,
            height,
        };

        // New textures are zero-initialised by wgpu.
        if let Some(bytes) = initial {
            let words: Vec<u32> = bytes.iter().map(|&b| b as u32).collect();
            self.upload_words(&raster.texture, RasterRect::full(width, height), &words);
        }

        if let Some(i) = self.rasters.iter().position(|r| r.is_none()) {
            self.rasters[i] = Some(raster);
            return Ok(RasterHandle(i as u32));
        }
        self.rasters.push(Some(raster));
        Ok(RasterHandle((self.rasters.len() - 1) as u32))
    }

    fn destroy(&mut self, handle: RasterHandle) {
        if let Some(slot) = self.rasters.get_mut(handle.index())
            && let Some(raster) = slot.take()
        {
            raster.texture.destroy();
        }
    }

    fn size(&self, handle: RasterHandle) -> Option<(u32, u32)> {
        self.raster(handle).ok().map(|r| (r.width, r.height))
    }

    fn submit_stamps(&mut self, handle: RasterHandle, stamps: &[Stamp], footprint: RasterRect) -> Result<()> {
        if stamps.is_empty() || footprint.is_empty() {
            return Ok(());
        }
        let raster = self.raster(handle)?;
        Self::check_rect(raster, footprint)?;
        let device = &self.ctx.device;

        let stamp_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("brush_stamps"),
            contents: bytemuck::cast_slice(stamps),
            usage: wgpu::BufferUsages::STORAGE,
        });
        let params = BatchParams {
            origin: [footprint.x, footprint.y],
            size: [footprint.width, footprint.height],
            count: stamps.len() as u32,
            _pad: [0; 3],
        };
        let params_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("brush_stamp_params"),
            contents: bytemuck::bytes_of(&params),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("brush_stamp_bg"),
            layout: &self.stamp.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&raster.view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: stamp_buf.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: params_buf.as_entire_binding(),
                },
            ],
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("brush_stamp_encoder"),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("brush_stamp_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.stamp.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(footprint.width.div_ceil(16), footprint.height.div_ceil(16), 1);
        }
        // Fire-and-forget: no poll here.
        self.ctx.submit_one(encoder);
        Ok(())
    }

    fn read_region(&mut self, handle: RasterHandle, rect: RasterRect) -> Result<Vec<u8>> {
        {
            let raster = self.raster(handle)?;
            Self::check_rect(raster, rect)?;
        }
        if rect.is_empty() {
            return Ok(Vec::new());
        }

        let padded_bpr = aligned_bytes_per_row(rect.width * TEXEL_BYTES);
        let size = padded_bpr as u64 * rect.height as u64;
        let (staging, capacity) = self.staging_buffer(size);
        let raster = self.raster(handle)?;

        let mut encoder = self.ctx.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("mask_readback_encoder"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &raster.texture,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: rect.x,
                    y: rect.y,
                    z: 0,
                },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &staging,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bpr),
                    rows_per_image: Some(rect.height),
                },
            },
            wgpu::Extent3d {
                width: rect.width,
                height: rect.height,
                depth_or_array_layers: 1,
            },
        );
        self.ctx.submit_one(encoder);

        let slice = staging.slice(..size);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.ctx.device.poll(wgpu::Maintain::Wait);
        match rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(AnnotError::Readback(format!("map error: {:?}", e))),
            Err(e) => return Err(AnnotError::Readback(format!("channel error: {}", e))),
        }

        let mut out = Vec::with_capacity(rect.byte_len());
        {
            let mapped = slice.get_mapped_range();
            for row in 0..rect.height as usize {
                let start = row * padded_bpr as usize;
                let texels = &mapped[start..start + (rect.width * TEXEL_BYTES) as usize];
                out.extend(
                    texels
                        .chunks_exact(TEXEL_BYTES as usize)
                        .map(|t| u32::from_ne_bytes([t[0], t[1], t[2], t[3]]) as u8),
                );
            }
        }
        staging.unmap();
        self.staging = Some((staging, capacity));
        Ok(out)
    }

    fn write_region(&mut self, handle: RasterHandle, rect: RasterRect, bytes: &[u8]) -> Result<()> {
        let raster = self.raster(handle)?;
        Self::check_rect(raster, rect)?;
        if bytes.len() != rect.byte_len() {
            return Err(AnnotError::SizeMismatch {
                expected: rect.byte_len(),
                actual: bytes.len(),
            });
        }
        if rect.is_empty() {
            return Ok(());
        }
        let words: Vec<u32> = bytes.iter().map(|&b| b as u32).collect();
        self.upload_words(&raster.texture, rect, &words);
        Ok(())
    }

    fn fill(&mut self, handle: RasterHandle, value: u8) -> Result<()> {
        let raster = self.raster(handle)?;
        let band_rows = FILL_BAND_ROWS.min(raster.height);
        let band = vec![value as u32; (raster.width * band_rows) as usize];
        let mut y = 0;
        while y < raster.height {
            let rows = band_rows.min(raster.height - y);
            let rect = RasterRect::new(0, y, raster.width, rows);
            self.upload_words(&raster.texture, rect, &band[..(raster.width * rows) as usize]);
            y += rows;
        }
        self.ctx.wait_idle();
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.ctx.wait_idle();
        Ok(())
    }
}
