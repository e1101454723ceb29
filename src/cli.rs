// ============================================================================
// Annotty CLI — headless replay of recorded pointer events
// ============================================================================
//
// Usage examples:
//   annotty --image photo.jpg --events strokes.json --output photo_mask.png
//   annotty --image photo.jpg --mask old_mask.png --events fix.json -o new_mask.png
//   annotty --image photo.jpg --events taps.json -o out.png --class 3 --cpu
//
// No window is opened.  Events are fed through the same gesture coordinator
// and mask editor the GUI uses, with timestamps taken from the recording.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::Parser;
use egui::{Pos2, Vec2};
use serde::Deserialize;

use annotty::components::gesture::{Contact, DeviceKind, PointerEvent, PointerPhase};
use annotty::io::{load_source_image, read_mask_png, write_mask_png};
use annotty::{AnnotationSession, Readiness, Tunables};

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// Annotty headless annotation replay.
///
/// Replays a recorded touch/pen session against an image and writes the
/// resulting class mask, no GUI required.
#[derive(Parser, Debug)]
#[command(
    name = "annotty",
    about = "Annotty headless annotation replay",
    long_about = "Replay recorded pointer events (JSON) against an image and write the\n\
                  resulting class mask as a grayscale PNG of raw class ids.\n\n\
                  Example:\n  \
                  annotty --image photo.jpg --events strokes.json --output mask.png"
)]
pub struct CliArgs {
    /// Source image the annotation belongs to.
    #[arg(long, value_name = "FILE")]
    pub image: PathBuf,

    /// JSON array of recorded pointer events.
    #[arg(short, long, value_name = "EVENTS.json")]
    pub events: PathBuf,

    /// Output mask PNG.
    #[arg(short, long, value_name = "FILE")]
    pub output: PathBuf,

    /// Existing mask to resume from.
    #[arg(short, long, value_name = "FILE")]
    pub mask: Option<PathBuf>,

    /// Class painted by strokes and fills (1-8).
    #[arg(short, long, default_value_t = 1)]
    pub class: u8,

    /// Brush radius in image pixels.
    #[arg(long, default_value_t = 10.0)]
    pub brush_radius: f32,

    /// Viewport the events were recorded in, in points (e.g. 1024x768).
    #[arg(long, default_value = "1024x768", value_name = "WxH")]
    pub viewport: String,

    /// Device pixels per point of the recording display.
    #[arg(long, default_value_t = 1.0)]
    pub device_scale: f32,

    /// Start in fill mode instead of draw mode.
    #[arg(long)]
    pub fill: bool,

    /// Force CPU rasters.
    #[arg(long)]
    pub cpu: bool,

    /// Mirror the session log to stderr.
    #[arg(short, long)]
    pub verbose: bool,
}

impl CliArgs {
    /// Returns `true` when the replay flag is present in the real process arguments.
    /// Used by `main()` to route before creating an eframe window.
    pub fn is_cli_mode() -> bool {
        std::env::args().any(|a| a == "--events" || a == "-e")
    }
}

// ============================================================================
// Recorded event format
// ============================================================================

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RecordedPhase {
    Began,
    Moved,
    Ended,
    Cancelled,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RecordedDevice {
    #[default]
    Finger,
    Stylus,
}

#[derive(Deserialize, Debug, Clone)]
pub struct RecordedContact {
    pub id: u64,
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub device: RecordedDevice,
}

#[derive(Deserialize, Debug, Clone)]
pub struct RecordedEvent {
    pub t_ms: u64,
    pub phase: RecordedPhase,
    pub contacts: Vec<RecordedContact>,
}

impl RecordedEvent {
    fn to_pointer_event(&self, origin: Instant) -> PointerEvent {
        PointerEvent {
            phase: match self.phase {
                RecordedPhase::Began => PointerPhase::Began,
                RecordedPhase::Moved => PointerPhase::Moved,
                RecordedPhase::Ended => PointerPhase::Ended,
                RecordedPhase::Cancelled => PointerPhase::Cancelled,
            },
            contacts: self
                .contacts
                .iter()
                .map(|c| Contact {
                    id: c.id,
                    position: Pos2::new(c.x, c.y),
                    device: match c.device {
                        RecordedDevice::Finger => DeviceKind::Finger,
                        RecordedDevice::Stylus => DeviceKind::Stylus,
                    },
                })
                .collect(),
            timestamp: origin + Duration::from_millis(self.t_ms),
        }
    }
}

pub fn parse_events(json: &str) -> Result<Vec<RecordedEvent>, String> {
    let mut events: Vec<RecordedEvent> = serde_json::from_str(json).map_err(|e| format!("bad event file: {}", e))?;
    // Stable: simultaneous events keep their recorded order.
    events.sort_by_key(|e| e.t_ms);
    Ok(events)
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run the replay and return an OS exit code.
pub fn run(args: CliArgs) -> ExitCode {
    annotty::logger::set_echo(args.verbose);
    let start = Instant::now();
    match run_replay(&args) {
        Ok(summary) => {
            println!(
                "{} events, {} painted pixels → {} ({:.0}ms)",
                summary.events,
                summary.painted,
                args.output.display(),
                start.elapsed().as_secs_f64() * 1000.0
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

struct ReplaySummary {
    events: usize,
    painted: usize,
}

fn run_replay(args: &CliArgs) -> Result<ReplaySummary, String> {
    let viewport = parse_viewport(&args.viewport).ok_or_else(|| format!("invalid --viewport '{}'", args.viewport))?;

    let image = load_source_image(&args.image).map_err(|e| format!("load failed: {}", e))?;
    let json = std::fs::read_to_string(&args.events)
        .map_err(|e| format!("could not read events '{}': {}", args.events.display(), e))?;
    let events = parse_events(&json)?;

    let mut tunables = Tunables::load();
    if args.cpu {
        tunables.gpu_acceleration = false;
    }
    let mut session = AnnotationSession::new(image.width, image.height, viewport, args.device_scale, &tunables)
        .map_err(|e| format!("session setup failed: {}", e))?;
    if session.readiness() == Readiness::Unavailable {
        return Err("no raster backend available".to_string());
    }

    let geometry = *session.editor.geometry();
    if let Some(mask) = &args.mask {
        load_seed_mask(&mut session, mask, geometry.width, geometry.height)?;
    }

    session.editor.set_class(args.class);
    session.editor.set_brush_radius(args.brush_radius);
    if args.fill {
        session.set_tool(annotty::ToolMode::Fill);
    }

    let origin = Instant::now();
    for event in &events {
        session.handle_event(&event.to_pointer_event(origin));
    }
    // Let a trailing debounce fire, then drop anything still held.
    if let Some(last) = events.last() {
        session.tick(origin + Duration::from_millis(last.t_ms) + Duration::from_secs(1));
    }
    session.cancel_input();

    let bytes = session.editor.export_mask().map_err(|e| format!("export failed: {}", e))?;
    write_mask_png(&args.output, geometry.width, geometry.height, &bytes).map_err(|e| format!("save failed: {}", e))?;

    Ok(ReplaySummary {
        events: events.len(),
        painted: bytes.iter().filter(|&&v| v != 0).count(),
    })
}

fn load_seed_mask(session: &mut AnnotationSession, path: &Path, width: u32, height: u32) -> Result<(), String> {
    let bytes = read_mask_png(path, width, height).map_err(|e| format!("mask load failed: {}", e))?;
    session.editor.load_mask(&bytes).map_err(|e| format!("mask load failed: {}", e))
}

// ============================================================================
// Helpers
// ============================================================================

/// `"1024x768"` → `Vec2(1024, 768)`.
fn parse_viewport(s: &str) -> Option<Vec2> {
    let (w, h) = s.to_lowercase().split_once('x').map(|(w, h)| (w.trim().to_string(), h.trim().to_string()))?;
    let w: f32 = w.parse().ok()?;
    let h: f32 = h.parse().ok()?;
    (w.is_finite() && h.is_finite() && w > 0.0 && h > 0.0).then_some(Vec2::new(w, h))
}
