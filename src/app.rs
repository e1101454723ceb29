use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::Instant;

use annotty::components::gesture::{Contact, DeviceKind, GestureListener, PointerEvent, PointerPhase, ToolMode};
use annotty::geometry::RasterRect;
use annotty::io::{FileHandler, SourceImage, load_source_image, read_mask_png, write_mask_png};
use annotty::ops::overlay::{OverlayStyle, compose_region};
use annotty::{AnnotationSession, Readiness, Tunables, log_err, log_warn};
use egui::{Color32, ColorImage, Pos2, Rect, Sense, Stroke, TextureHandle, TextureOptions, Vec2};

/// Contact id used for the mouse, which behaves like a pen.
const MOUSE_CONTACT: u64 = u64::MAX;

// ============================================================================
// ASYNC IO PIPELINE — background image decoding
// ============================================================================

/// Result delivered from a background IO thread.
pub enum IoResult {
    ImageLoaded { image: SourceImage, path: PathBuf },
    LoadFailed(String),
}

/// One open image with its annotation session and display texture.
struct Document {
    path: PathBuf,
    image: SourceImage,
    session: AnnotationSession,
    overlay: Option<TextureHandle>,
}

pub struct AnnottyApp {
    tunables: Tunables,
    file_handler: FileHandler,
    style: OverlayStyle,
    document: Option<Document>,

    // Tool state mirrored into the session on change
    tool: ToolMode,
    class: u8,
    eraser: bool,
    brush_radius: f32,

    // Input bookkeeping
    active_touches: HashSet<u64>,
    mouse_down: bool,
    hover: Option<Pos2>,
    viewport: Vec2,

    io_sender: mpsc::Sender<IoResult>,
    io_receiver: mpsc::Receiver<IoResult>,
    pending_io_ops: usize,
    status: String,
}

impl AnnottyApp {
    pub fn new(_cc: &eframe::CreationContext<'_>) -> Self {
        let tunables = Tunables::load();
        let (io_sender, io_receiver) = mpsc::channel();
        Self {
            tunables,
            file_handler: FileHandler::new(),
            style: OverlayStyle::default(),
            document: None,
            tool: ToolMode::Draw,
            class: 1,
            eraser: false,
            brush_radius: 10.0,
            active_touches: HashSet::new(),
            mouse_down: false,
            hover: None,
            viewport: Vec2::new(1024.0, 768.0),
            io_sender,
            io_receiver,
            pending_io_ops: 0,
            status: "Open an image to start annotating".to_string(),
        }
    }

    // ------------------------------------------------------------------
    // Files
    // ------------------------------------------------------------------

    fn open_image(&mut self) {
        let Some(path) = self.file_handler.pick_image() else { return };
        let sender = self.io_sender.clone();
        self.pending_io_ops += 1;
        self.status = format!("Loading {}…", path.display());
        rayon::spawn(move || match load_source_image(&path) {
            Ok(image) => {
                let _ = sender.send(IoResult::ImageLoaded { image, path });
            }
            Err(e) => {
                let _ = sender.send(IoResult::LoadFailed(format!("Failed to open {}: {}", path.display(), e)));
            }
        });
    }

    fn poll_io(&mut self, ctx: &egui::Context) {
        while let Ok(result) = self.io_receiver.try_recv() {
            self.pending_io_ops = self.pending_io_ops.saturating_sub(1);
            match result {
                IoResult::ImageLoaded { image, path } => self.start_document(ctx, image, path),
                IoResult::LoadFailed(msg) => {
                    log_err!("{}", msg);
                    self.status = msg;
                }
            }
        }
    }

    fn start_document(&mut self, ctx: &egui::Context, image: SourceImage, path: PathBuf) {
        let session = match AnnotationSession::new(
            image.width,
            image.height,
            self.viewport,
            ctx.pixels_per_point(),
            &self.tunables,
        ) {
            Ok(s) => s,
            Err(e) => {
                self.status = format!("Cannot annotate {}: {}", path.display(), e);
                log_err!("{}", self.status);
                return;
            }
        };
        self.status = match session.readiness() {
            Readiness::Gpu => format!("{} (GPU: {})", path.display(), session.editor.backend_name()),
            Readiness::CpuFallback => format!("{} (CPU rasters)", path.display()),
            Readiness::Unavailable => "Mask rasters unavailable; view only".to_string(),
        };
        self.active_touches.clear();
        self.mouse_down = false;
        self.document = Some(Document {
            path,
            image,
            session,
            overlay: None,
        });
        self.apply_tool_state();
    }

    fn load_mask(&mut self) {
        let Some(path) = self.file_handler.pick_mask_to_load() else { return };
        let Some(doc) = self.document.as_mut() else { return };
        let g = *doc.session.editor.geometry();
        let result = read_mask_png(&path, g.width, g.height).and_then(|bytes| doc.session.editor.load_mask(&bytes));
        self.status = match result {
            Ok(()) => format!("Loaded mask {}", path.display()),
            Err(e) => format!("Mask load failed: {}", e),
        };
    }

    fn export_mask(&mut self) {
        let Some(doc) = self.document.as_mut() else { return };
        let Some(path) = self.file_handler.pick_mask_to_save() else { return };
        let g = *doc.session.editor.geometry();
        let result = doc
            .session
            .editor
            .export_mask()
            .and_then(|bytes| write_mask_png(&path, g.width, g.height, &bytes));
        self.status = match result {
            Ok(()) => format!("Exported {}", path.display()),
            Err(e) => format!("Export failed: {}", e),
        };
    }

    fn apply_tool_state(&mut self) {
        let Some(doc) = self.document.as_mut() else { return };
        doc.session.set_tool(self.tool);
        doc.session.editor.set_class(self.class);
        doc.session.editor.set_eraser(self.eraser);
        doc.session.editor.set_brush_radius(self.brush_radius);
    }

    // ------------------------------------------------------------------
    // Input
    // ------------------------------------------------------------------

    /// Translate egui events over `rect` into pointer events for the session.
    fn feed_input(&mut self, ctx: &egui::Context, rect: Rect) {
        let Some(doc) = self.document.as_mut() else { return };
        let events = ctx.input(|i| i.events.clone());
        let now = Instant::now();
        let local = |p: Pos2| (p - rect.min).to_pos2();

        for event in events {
            match event {
                egui::Event::Touch { id, phase, pos, .. } => {
                    let contact = Contact {
                        id: id.0,
                        position: local(pos),
                        device: DeviceKind::Finger,
                    };
                    let phase = match phase {
                        egui::TouchPhase::Start => {
                            if !rect.contains(pos) {
                                continue;
                            }
                            self.active_touches.insert(id.0);
                            PointerPhase::Began
                        }
                        egui::TouchPhase::Move => PointerPhase::Moved,
                        egui::TouchPhase::End => {
                            self.active_touches.remove(&id.0);
                            PointerPhase::Ended
                        }
                        egui::TouchPhase::Cancel => {
                            self.active_touches.remove(&id.0);
                            PointerPhase::Cancelled
                        }
                    };
                    doc.session.handle_event(&PointerEvent {
                        phase,
                        contacts: vec![contact],
                        timestamp: now,
                    });
                }
                // Touches are mirrored as pointer events; only real mice get here.
                egui::Event::PointerButton {
                    pos,
                    button: egui::PointerButton::Primary,
                    pressed,
                    ..
                } if self.active_touches.is_empty() => {
                    if pressed && !rect.contains(pos) {
                        continue;
                    }
                    if pressed == self.mouse_down {
                        continue;
                    }
                    self.mouse_down = pressed;
                    doc.session.handle_event(&PointerEvent {
                        phase: if pressed { PointerPhase::Began } else { PointerPhase::Ended },
                        contacts: vec![mouse_contact(local(pos))],
                        timestamp: now,
                    });
                }
                egui::Event::PointerMoved(pos) if self.active_touches.is_empty() => {
                    self.hover = rect.contains(pos).then_some(pos);
                    if self.mouse_down {
                        doc.session.handle_event(&PointerEvent {
                            phase: PointerPhase::Moved,
                            contacts: vec![mouse_contact(local(pos))],
                            timestamp: now,
                        });
                    }
                }
                egui::Event::PointerGone => self.hover = None,
                egui::Event::Scroll(delta) => {
                    if ctx.input(|i| i.pointer.hover_pos()).is_some_and(|p| rect.contains(p)) {
                        doc.session.editor.pan(delta);
                    }
                }
                egui::Event::Zoom(factor) => {
                    let center = ctx
                        .input(|i| i.pointer.hover_pos())
                        .filter(|p| rect.contains(*p))
                        .unwrap_or(rect.center());
                    doc.session.editor.pinch(factor, local(center));
                }
                egui::Event::WindowFocused(false) => {
                    self.mouse_down = false;
                    self.active_touches.clear();
                    doc.session.cancel_input();
                }
                _ => {}
            }
        }

        doc.session.tick(now);
        if let Some(deadline) = doc.session.next_deadline() {
            ctx.request_repaint_after(deadline.saturating_duration_since(Instant::now()));
        }
    }

    fn handle_shortcuts(&mut self, ctx: &egui::Context) {
        let (redo, undo) = ctx.input_mut(|i| {
            let redo = i.consume_key(egui::Modifiers::COMMAND | egui::Modifiers::SHIFT, egui::Key::Z);
            let undo = i.consume_key(egui::Modifiers::COMMAND, egui::Key::Z);
            (redo, undo)
        });
        let Some(doc) = self.document.as_mut() else { return };
        if redo {
            GestureListener::redo(&mut doc.session.editor);
        } else if undo {
            GestureListener::undo(&mut doc.session.editor);
        }
    }

    // ------------------------------------------------------------------
    // Display
    // ------------------------------------------------------------------

    /// Upload the part of the overlay that changed since last frame.
    fn refresh_overlay(&mut self, ctx: &egui::Context) {
        let Some(doc) = self.document.as_mut() else { return };
        if !doc.session.readiness().is_ready() {
            return;
        }
        let g = *doc.session.editor.geometry();
        let full = RasterRect::full(g.width, g.height);
        let dirty = match (&doc.overlay, doc.session.editor.take_dirty()) {
            (None, _) => full,
            (Some(_), Some(d)) => d,
            (Some(_), None) => return,
        };
        // Edge pixels depend on neighbours, so recompose one pixel beyond the write.
        let region = dirty.inflate(1, g.width, g.height);
        let context = region.inflate(1, g.width, g.height);
        let context_bytes = match doc.session.editor.read_region(context) {
            Ok(bytes) => bytes,
            Err(e) => {
                log_warn!("Overlay refresh skipped: {}", e);
                return;
            }
        };
        let rgba = compose_region(&self.style, &doc.image, g.mask_scale, context, &context_bytes, region);
        let image = ColorImage::from_rgba_unmultiplied([region.width as usize, region.height as usize], &rgba);
        match doc.overlay.as_mut() {
            Some(tex) => tex.set_partial([region.x as usize, region.y as usize], image, TextureOptions::NEAREST),
            None => doc.overlay = Some(ctx.load_texture("mask_overlay", image, TextureOptions::NEAREST)),
        }
    }

    fn paint_canvas(&self, painter: &egui::Painter, rect: Rect) {
        painter.rect_filled(rect, 0.0, Color32::from_gray(32));
        let Some(doc) = self.document.as_ref() else { return };
        let Some(tex) = doc.overlay.as_ref() else { return };
        let corners = match doc.session.editor.transform().image_corners_on_screen() {
            Ok(c) => c,
            Err(e) => {
                log_warn!("Canvas draw skipped: {}", e);
                return;
            }
        };
        let uv = [Pos2::new(0.0, 0.0), Pos2::new(1.0, 0.0), Pos2::new(1.0, 1.0), Pos2::new(0.0, 1.0)];
        let mut mesh = egui::Mesh::with_texture(tex.id());
        for (corner, uv) in corners.iter().zip(uv) {
            mesh.vertices.push(egui::epaint::Vertex {
                pos: rect.min + corner.to_vec2(),
                uv,
                color: Color32::WHITE,
            });
        }
        mesh.indices = vec![0, 1, 2, 0, 2, 3];
        painter.with_clip_rect(rect).add(egui::Shape::mesh(mesh));

        // Brush outline under the mouse
        if let Some(hover) = self.hover
            && self.tool == ToolMode::Draw
        {
            let radius = doc.session.editor.brush_preview_size() * 0.5;
            painter.circle_stroke(hover, radius, Stroke::new(1.0, Color32::WHITE));
        }
    }

    // ------------------------------------------------------------------
    // Panels
    // ------------------------------------------------------------------

    fn show_toolbar(&mut self, ctx: &egui::Context) {
        let mut tool_changed = false;
        egui::TopBottomPanel::top("toolbar").show(ctx, |ui| {
            ui.horizontal_wrapped(|ui| {
                if ui.button("Open Image").clicked() {
                    self.open_image();
                }
                let has_doc = self.document.is_some();
                if ui.add_enabled(has_doc, egui::Button::new("Load Mask")).clicked() {
                    self.load_mask();
                }
                if ui.add_enabled(has_doc, egui::Button::new("Export Mask")).clicked() {
                    self.export_mask();
                }
                ui.separator();

                tool_changed |= ui.selectable_value(&mut self.tool, ToolMode::Draw, "Brush").changed();
                tool_changed |= ui.selectable_value(&mut self.tool, ToolMode::Fill, "Fill").changed();
                tool_changed |= ui.checkbox(&mut self.eraser, "Eraser").changed();
                ui.separator();

                for class in 1..=self.tunables.max_classes {
                    let [r, g, b] = self.style.class_color(class);
                    let text = egui::RichText::new(format!("{}", class)).color(Color32::from_rgb(r, g, b)).strong();
                    if ui.selectable_label(self.class == class, text).clicked() {
                        self.class = class;
                        tool_changed = true;
                    }
                }
                ui.separator();
                tool_changed |= ui
                    .add(egui::Slider::new(&mut self.brush_radius, 1.0..=200.0).logarithmic(true).text("Brush"))
                    .changed();
                ui.separator();

                let (can_undo, can_redo) = self
                    .document
                    .as_ref()
                    .map_or((false, false), |d| (d.session.editor.can_undo(), d.session.editor.can_redo()));
                if ui.add_enabled(can_undo, egui::Button::new("Undo")).clicked()
                    && let Some(doc) = self.document.as_mut()
                {
                    GestureListener::undo(&mut doc.session.editor);
                }
                if ui.add_enabled(can_redo, egui::Button::new("Redo")).clicked()
                    && let Some(doc) = self.document.as_mut()
                {
                    GestureListener::redo(&mut doc.session.editor);
                }
                if ui.add_enabled(has_doc, egui::Button::new("Clear")).clicked()
                    && let Some(doc) = self.document.as_mut()
                    && let Err(e) = doc.session.editor.clear_all()
                {
                    self.status = format!("Clear failed: {}", e);
                }
                if ui.add_enabled(has_doc, egui::Button::new("Reset View")).clicked()
                    && let Some(doc) = self.document.as_mut()
                {
                    doc.session.editor.reset_view();
                }
                ui.separator();

                ui.menu_button("Settings", |ui| {
                    let mut changed = ui.checkbox(&mut self.tunables.gpu_acceleration, "GPU rasters").changed();
                    changed |= ui
                        .checkbox(&mut self.tunables.allow_cpu_fallback, "Fall back to CPU")
                        .changed();
                    changed |= ui
                        .add(egui::Slider::new(&mut self.style.mask_fill_alpha, 0.0..=1.0).text("Fill opacity"))
                        .changed();
                    ui.add(egui::Slider::new(&mut self.style.image_brightness, -1.0..=1.0).text("Brightness"));
                    ui.add(egui::Slider::new(&mut self.style.image_contrast, 0.0..=2.0).text("Contrast"));
                    if ui.button("Redraw overlay").clicked()
                        && let Some(doc) = self.document.as_mut()
                    {
                        doc.overlay = None;
                    }
                    if changed {
                        self.tunables.save();
                    }
                    ui.label("Raster options apply to the next image.");
                });
            });
        });
        if tool_changed {
            self.apply_tool_state();
        }
    }

    fn show_status_bar(&self, ctx: &egui::Context) {
        egui::TopBottomPanel::bottom("status").show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.label(self.status.as_str());
                if self.pending_io_ops > 0 {
                    ui.spinner();
                }
                if let Some(doc) = &self.document {
                    ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                        let editor = &doc.session.editor;
                        ui.label(format!(
                            "{} | {:.0}% | undo {:.1} MiB",
                            doc.path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default(),
                            editor.transform().zoom_level() * 100.0,
                            editor.undo_memory_usage() as f64 / (1024.0 * 1024.0)
                        ));
                    });
                }
            });
        });
    }
}

fn mouse_contact(position: Pos2) -> Contact {
    Contact {
        id: MOUSE_CONTACT,
        position,
        device: DeviceKind::Stylus,
    }
}

impl eframe::App for AnnottyApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.poll_io(ctx);
        self.show_toolbar(ctx);
        self.show_status_bar(ctx);
        self.handle_shortcuts(ctx);

        egui::CentralPanel::default()
            .frame(egui::Frame::none())
            .show(ctx, |ui| {
                let (rect, _response) = ui.allocate_exact_size(ui.available_size(), Sense::click_and_drag());
                if rect.size() != self.viewport && rect.width() > 0.0 && rect.height() > 0.0 {
                    self.viewport = rect.size();
                    if let Some(doc) = self.document.as_mut() {
                        doc.session.editor.set_viewport_size(rect.size());
                    }
                }
                if let Some(doc) = self.document.as_mut() {
                    doc.session.editor.set_device_scale(ctx.pixels_per_point());
                }
                self.feed_input(ctx, rect);
                self.refresh_overlay(ctx);
                self.paint_canvas(ui.painter(), rect);
            });

        if self.pending_io_ops > 0 {
            ctx.request_repaint();
        }
    }
}
