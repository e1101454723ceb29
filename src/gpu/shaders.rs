// ============================================================================
// GPU SHADERS — WGSL kept inline for containment
// ============================================================================

// ============================================================================
// BRUSH STAMP SHADER — rasterizes a batch of circular stamps
// ============================================================================
//
// One invocation per pixel of the batch footprint.  Each invocation walks the
// stamps in submission order and keeps the value of the last stamp covering
// its pixel, so later stamps overwrite earlier ones inside a single dispatch.
// Pixels no stamp covers are left untouched (no store).
//
// The mask is an r32uint storage texture because WebGPU has no writable
// 8-bit integer storage format.  Values are class ids 0..=MAX_CLASSES.
pub const BRUSH_STAMP_SHADER: &str = r#"
struct Stamp {
    center: vec2<f32>,
    radius: f32,
    value: u32,
};

struct BatchParams {
    origin: vec2<u32>,   // footprint top-left in raster pixels
    size: vec2<u32>,     // footprint extent in raster pixels
    count: u32,
    _pad0: u32,
    _pad1: u32,
    _pad2: u32,
};

@group(0) @binding(0) var mask_out: texture_storage_2d<r32uint, write>;
@group(0) @binding(1) var<storage, read> stamps: array<Stamp>;
@group(0) @binding(2) var<uniform> params: BatchParams;

@compute @workgroup_size(16, 16)
fn cs_stamp(@builtin(global_invocation_id) gid: vec3<u32>) {
    if (gid.x >= params.size.x || gid.y >= params.size.y) {
        return;
    }
    let px = params.origin + gid.xy;
    let p = vec2<f32>(f32(px.x), f32(px.y));

    var covered = false;
    var value = 0u;
    for (var i = 0u; i < params.count; i = i + 1u) {
        let s = stamps[i];
        let d = p - s.center;
        if (dot(d, d) <= s.radius * s.radius) {
            covered = true;
            value = s.value;
        }
    }

    if (covered) {
        textureStore(mask_out, vec2<i32>(px), vec4<u32>(value, 0u, 0u, 0u));
    }
}
"#;
