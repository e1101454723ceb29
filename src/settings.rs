// ============================================================================
// TUNABLES — timing, memory and raster limits that persist across sessions
// ============================================================================

use std::path::PathBuf;
use std::time::Duration;

/// Highest class id the rasters and overlay palette support.
pub const MAX_CLASSES: u8 = 8;

/// Every tunable constant of the editing core.
#[derive(Clone, Debug, PartialEq)]
pub struct Tunables {
    /// Delay before a lone finger is committed as a draw.
    pub debounce: Duration,
    /// Window after a navigation gesture during which finger draws are ignored.
    pub draw_cooldown: Duration,
    /// Window after a navigation gesture during which undo/redo/fill taps are ignored.
    pub command_cooldown: Duration,
    /// Longest press that still counts as a tap.
    pub tap_max_duration: Duration,
    /// Finger travel (points) that disqualifies a tap.
    pub tap_slop: f32,
    /// Centroid/spread travel (points) before navigation deltas are reported.
    pub navigation_slop: f32,

    pub max_undo_entries: usize,
    pub max_undo_bytes: usize,

    /// Longest mask edge in raster pixels.
    pub max_raster_edge: u32,
    /// Mask pixels per image pixel before the edge clamp.
    pub mask_resolution_factor: f32,
    /// Highest class id; 0 is background.
    pub max_classes: u8,

    /// Stamp spacing as a fraction of the brush radius.
    pub stamp_step_fraction: f32,
    /// Stroke points between proactive patch-growth checks.
    pub expansion_check_interval: u32,
    /// Half side of the patch captured at stroke begin (raster px).
    pub initial_patch_extent: u32,
    /// Extra border added whenever a stroke patch has to grow (raster px).
    pub patch_growth_margin: u32,

    /// Zoom limits relative to the fit-to-viewport scale.
    pub min_zoom: f32,
    pub max_zoom: f32,

    pub gpu_acceleration: bool,
    /// Preferred GPU adapter ("Auto", "low power", "high performance").
    pub preferred_gpu: String,
    /// Fall back to CPU rasters when the GPU cannot be initialised.
    pub allow_cpu_fallback: bool,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(32),
            draw_cooldown: Duration::from_millis(200),
            command_cooldown: Duration::from_millis(300),
            tap_max_duration: Duration::from_millis(350),
            tap_slop: 12.0,
            navigation_slop: 4.0,
            max_undo_entries: 50,
            max_undo_bytes: 100 * 1024 * 1024, // 100 MB
            max_raster_edge: 4096,
            mask_resolution_factor: 2.0,
            max_classes: MAX_CLASSES,
            stamp_step_fraction: 0.3,
            expansion_check_interval: 20,
            initial_patch_extent: 256,
            patch_growth_margin: 64,
            min_zoom: 0.1,
            max_zoom: 50.0,
            gpu_acceleration: true,
            preferred_gpu: "Auto".to_string(),
            allow_cpu_fallback: true,
        }
    }
}

impl Tunables {
    /// Path to the settings file.
    /// On Linux:   ~/.config/annotty/annotty_settings.cfg  (XDG_CONFIG_HOME respected)
    /// On Windows: %APPDATA%\Annotty\annotty_settings.cfg
    /// On macOS:   ~/Library/Application Support/Annotty/annotty_settings.cfg
    pub fn settings_path() -> Option<PathBuf> {
        #[cfg(target_os = "linux")]
        {
            let config_dir = std::env::var("XDG_CONFIG_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| {
                    let home = std::env::var("HOME").unwrap_or_else(|_| "~".to_string());
                    PathBuf::from(home).join(".config")
                })
                .join("annotty");
            let _ = std::fs::create_dir_all(&config_dir);
            return Some(config_dir.join("annotty_settings.cfg"));
        }
        #[cfg(target_os = "windows")]
        {
            let appdata = std::env::var("APPDATA")
                .or_else(|_| std::env::var("USERPROFILE"))
                .ok()?;
            let config_dir = PathBuf::from(appdata).join("Annotty");
            let _ = std::fs::create_dir_all(&config_dir);
            return Some(config_dir.join("annotty_settings.cfg"));
        }
        #[cfg(target_os = "macos")]
        {
            let home = std::env::var("HOME").ok()?;
            let config_dir = PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("Annotty");
            let _ = std::fs::create_dir_all(&config_dir);
            return Some(config_dir.join("annotty_settings.cfg"));
        }
        #[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
        {
            std::env::current_exe()
                .ok()
                .and_then(|p| p.parent().map(|d| d.join("annotty_settings.cfg")))
        }
    }

    /// Serialise as `key=value` lines.
    pub fn to_config_string(&self) -> String {
        format!(
            "debounce_ms={}\n\
             draw_cooldown_ms={}\n\
             command_cooldown_ms={}\n\
             tap_max_duration_ms={}\n\
             tap_slop={}\n\
             navigation_slop={}\n\
             max_undo_entries={}\n\
             max_undo_bytes={}\n\
             max_raster_edge={}\n\
             mask_resolution_factor={}\n\
             max_classes={}\n\
             stamp_step_fraction={}\n\
             expansion_check_interval={}\n\
             initial_patch_extent={}\n\
             patch_growth_margin={}\n\
             min_zoom={}\n\
             max_zoom={}\n\
             gpu_acceleration={}\n\
             preferred_gpu={}\n\
             allow_cpu_fallback={}\n",
            self.debounce.as_millis(),
            self.draw_cooldown.as_millis(),
            self.command_cooldown.as_millis(),
            self.tap_max_duration.as_millis(),
            self.tap_slop,
            self.navigation_slop,
            self.max_undo_entries,
            self.max_undo_bytes,
            self.max_raster_edge,
            self.mask_resolution_factor,
            self.max_classes,
            self.stamp_step_fraction,
            self.expansion_check_interval,
            self.initial_patch_extent,
            self.patch_growth_margin,
            self.min_zoom,
            self.max_zoom,
            self.gpu_acceleration,
            self.preferred_gpu,
            self.allow_cpu_fallback,
        )
    }

    /// Parse `key=value` lines on top of the defaults.  Unknown keys are
    /// skipped and malformed or out-of-range values keep their default.
    pub fn parse(content: &str) -> Self {
        let mut s = Self::default();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, val)) = line.split_once('=') else { continue };
            let key = key.trim();
            let val = val.trim();
            match key {
                "debounce_ms" => set_ms(&mut s.debounce, val),
                "draw_cooldown_ms" => set_ms(&mut s.draw_cooldown, val),
                "command_cooldown_ms" => set_ms(&mut s.command_cooldown, val),
                "tap_max_duration_ms" => set_ms(&mut s.tap_max_duration, val),
                "tap_slop" => set_positive(&mut s.tap_slop, val),
                "navigation_slop" => set_positive(&mut s.navigation_slop, val),
                "max_undo_entries" => {
                    if let Ok(v) = val.parse::<usize>() {
                        s.max_undo_entries = v;
                    }
                }
                "max_undo_bytes" => {
                    if let Ok(v) = val.parse::<usize>() {
                        s.max_undo_bytes = v;
                    }
                }
                "max_raster_edge" => {
                    if let Ok(v) = val.parse::<u32>()
                        && v > 0
                    {
                        s.max_raster_edge = v;
                    }
                }
                "mask_resolution_factor" => set_positive(&mut s.mask_resolution_factor, val),
                "max_classes" => {
                    if let Ok(v) = val.parse::<u8>()
                        && v > 0
                    {
                        s.max_classes = v.min(MAX_CLASSES);
                    }
                }
                "stamp_step_fraction" => set_positive(&mut s.stamp_step_fraction, val),
                "expansion_check_interval" => {
                    if let Ok(v) = val.parse::<u32>()
                        && v > 0
                    {
                        s.expansion_check_interval = v;
                    }
                }
                "initial_patch_extent" => {
                    if let Ok(v) = val.parse::<u32>() {
                        s.initial_patch_extent = v;
                    }
                }
                "patch_growth_margin" => {
                    if let Ok(v) = val.parse::<u32>() {
                        s.patch_growth_margin = v;
                    }
                }
                "min_zoom" => set_positive(&mut s.min_zoom, val),
                "max_zoom" => set_positive(&mut s.max_zoom, val),
                "gpu_acceleration" => s.gpu_acceleration = val == "true",
                "preferred_gpu" => s.preferred_gpu = val.to_string(),
                "allow_cpu_fallback" => s.allow_cpu_fallback = val == "true",
                _ => {}
            }
        }
        if s.min_zoom > s.max_zoom {
            let d = Self::default();
            s.min_zoom = d.min_zoom;
            s.max_zoom = d.max_zoom;
        }
        s
    }

    /// Load settings from disk (defaults if the file is missing).
    pub fn load() -> Self {
        let Some(path) = Self::settings_path() else { return Self::default() };
        let Ok(content) = std::fs::read_to_string(&path) else { return Self::default() };
        Self::parse(&content)
    }

    /// Save settings to disk.
    pub fn save(&self) {
        let Some(path) = Self::settings_path() else { return };
        if let Err(e) = std::fs::write(&path, self.to_config_string()) {
            crate::log_warn!("Failed to save settings to {}: {}", path.display(), e);
        }
    }
}

fn set_ms(slot: &mut Duration, val: &str) {
    if let Ok(ms) = val.parse::<u64>() {
        *slot = Duration::from_millis(ms);
    }
}

fn set_positive(slot: &mut f32, val: &str) {
    if let Ok(v) = val.parse::<f32>()
        && v.is_finite()
        && v > 0.0
    {
        *slot = v;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_tunables() {
        let t = Tunables::default();
        assert_eq!(t.debounce, Duration::from_millis(32));
        assert_eq!(t.draw_cooldown, Duration::from_millis(200));
        assert_eq!(t.command_cooldown, Duration::from_millis(300));
        assert_eq!(t.max_undo_entries, 50);
        assert_eq!(t.max_undo_bytes, 100 * 1024 * 1024);
        assert_eq!(t.max_raster_edge, 4096);
    }

    #[test]
    fn config_string_round_trips() {
        let mut t = Tunables::default();
        t.debounce = Duration::from_millis(48);
        t.max_undo_entries = 10;
        t.preferred_gpu = "low power".to_string();
        t.allow_cpu_fallback = false;
        assert_eq!(Tunables::parse(&t.to_config_string()), t);
    }

    #[test]
    fn malformed_values_keep_defaults() {
        let t = Tunables::parse(
            "debounce_ms=abc\n\
             tap_slop=-3\n\
             max_raster_edge=0\n\
             stamp_step_fraction=NaN\n\
             unknown_key=7\n\
             no equals sign here\n",
        );
        assert_eq!(t, Tunables::default());
    }

    #[test]
    fn class_count_is_capped_at_the_palette_size() {
        assert_eq!(Tunables::parse("max_classes=200\n").max_classes, MAX_CLASSES);
        assert_eq!(Tunables::parse("max_classes=5\n").max_classes, 5);
        assert_eq!(Tunables::parse("max_classes=0\n").max_classes, MAX_CLASSES);
    }

    #[test]
    fn inverted_zoom_limits_are_reset() {
        let t = Tunables::parse("min_zoom=10\nmax_zoom=2\n");
        assert_eq!(t.min_zoom, 0.1);
        assert_eq!(t.max_zoom, 50.0);
    }
}
