use std::collections::BTreeMap;
use std::f32::consts::{PI, TAU};
use std::time::{Duration, Instant};

use egui::{Pos2, Vec2};

use crate::settings::Tunables;

// ============================================================================
// INPUT TYPES
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    /// Pen or mouse: draw-only, never navigates.
    Stylus,
    Finger,
}

/// One touch point in screen points.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Contact {
    pub id: u64,
    pub position: Pos2,
    pub device: DeviceKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PointerPhase {
    Began,
    Moved,
    Ended,
    /// The platform took the contacts away (e.g. system gesture).
    Cancelled,
}

/// A lifecycle change of one or more contacts.  `contacts` lists only the
/// contacts this phase applies to.
#[derive(Clone, Debug)]
pub struct PointerEvent {
    pub phase: PointerPhase,
    pub contacts: Vec<Contact>,
    pub timestamp: Instant,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ToolMode {
    #[default]
    Draw,
    Fill,
}

// ============================================================================
// LISTENER
// ============================================================================

/// Receiver of the semantic actions recognised by `GestureCoordinator`.
/// Every method defaults to a no-op.
pub trait GestureListener {
    fn stroke_begin(&mut self, _point: Pos2) {}
    fn stroke_continue(&mut self, _point: Pos2) {}
    fn stroke_end(&mut self, _point: Pos2) {}
    /// The stroke must be rolled back, not committed.
    fn stroke_cancel(&mut self) {}
    fn pan(&mut self, _delta: Vec2) {}
    fn pinch(&mut self, _scale_ratio: f32, _center: Pos2) {}
    fn rotate(&mut self, _angle_delta: f32, _center: Pos2) {}
    fn undo(&mut self) {}
    fn redo(&mut self) {}
    fn fill_tap(&mut self, _point: Pos2) {}
}

// ============================================================================
// NAVIGATION TRACKER - pan / pinch / rotate from the two lowest-id fingers
// ============================================================================

/// Below this finger spread (points) pinch ratios are not reported.
const MIN_PINCH_SPREAD: f32 = 1.0;

#[derive(Clone, Copy, Debug, PartialEq)]
struct NavFrame {
    ids: [u64; 2],
    centroid: Pos2,
    spread: f32,
    angle: f32,
}

impl NavFrame {
    fn from_fingers(fingers: &[Contact]) -> Option<Self> {
        let (a, b) = (fingers.first()?, fingers.get(1)?);
        let d = b.position - a.position;
        Some(Self {
            ids: [a.id, b.id],
            centroid: a.position + d * 0.5,
            spread: d.length(),
            angle: d.y.atan2(d.x),
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct NavigationTracker {
    /// Frame navigation started from; used for the slop test.
    origin: Option<NavFrame>,
    /// Frame deltas are measured against.
    baseline: Option<NavFrame>,
    engaged: bool,
    slop: f32,
}

impl NavigationTracker {
    fn new(slop: f32, fingers: &[Contact]) -> Self {
        let frame = NavFrame::from_fingers(fingers);
        Self {
            origin: frame,
            baseline: frame,
            engaged: false,
            slop,
        }
    }

    /// Restart delta measurement after the finger set changed.
    fn rebaseline(&mut self, fingers: &[Contact]) {
        let frame = NavFrame::from_fingers(fingers);
        self.baseline = frame;
        if !self.engaged {
            self.origin = frame;
        }
    }

    fn update(&mut self, fingers: &[Contact], listener: &mut dyn GestureListener) {
        let Some(frame) = NavFrame::from_fingers(fingers) else {
            self.baseline = None;
            return;
        };
        let Some(base) = self.baseline.filter(|b| b.ids == frame.ids) else {
            self.rebaseline(fingers);
            return;
        };

        if !self.engaged {
            let origin = self.origin.unwrap_or(base);
            let travel = (frame.centroid - origin.centroid).length();
            let spread = (frame.spread - origin.spread).abs();
            let arc = wrap_angle(frame.angle - origin.angle).abs() * origin.spread * 0.5;
            if travel <= self.slop && spread <= self.slop && arc <= self.slop {
                return;
            }
            self.engaged = true;
        }

        let pan = frame.centroid - base.centroid;
        if pan != Vec2::ZERO {
            listener.pan(pan);
        }
        if base.spread >= MIN_PINCH_SPREAD && frame.spread >= MIN_PINCH_SPREAD && frame.spread != base.spread {
            listener.pinch(frame.spread / base.spread, frame.centroid);
        }
        let rotation = wrap_angle(frame.angle - base.angle);
        if rotation != 0.0 && base.spread >= MIN_PINCH_SPREAD {
            listener.rotate(rotation, frame.centroid);
        }
        self.baseline = Some(frame);
    }
}

/// Wrap to `(-PI, PI]`.
fn wrap_angle(a: f32) -> f32 {
    let a = (a + PI).rem_euclid(TAU) - PI;
    if a == -PI { PI } else { a }
}

// ============================================================================
// TAP CANDIDATE
// ============================================================================

/// Multi-finger tap being tracked from the first finger down to the last up.
#[derive(Clone, Debug)]
struct TapCandidate {
    started: Instant,
    start_positions: BTreeMap<u64, Pos2>,
    max_fingers: usize,
    disqualified: bool,
}

impl TapCandidate {
    fn new(started: Instant) -> Self {
        Self {
            started,
            start_positions: BTreeMap::new(),
            max_fingers: 0,
            disqualified: false,
        }
    }
}

// ============================================================================
// GESTURE COORDINATOR
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq)]
enum GestureState {
    Idle,
    /// Lone finger waiting out the debounce before it becomes a stroke.
    Pending { contact: u64, point: Pos2, deadline: Instant },
    Drawing { contact: u64, point: Pos2 },
    /// Fill tool: lone contact that fills on release.
    FillPending { contact: u64, point: Pos2 },
    Navigating(NavigationTracker),
    /// Contacts are down but ignored until they all lift.
    Suppressed,
}

/// Splits raw pointer events into drawing, navigation and command gestures.
///
/// Timers are deadlines: every event first runs `tick` with its own
/// timestamp, and hosts call `tick` between events (see `next_deadline`).
pub struct GestureCoordinator {
    state: GestureState,
    contacts: BTreeMap<u64, Contact>,
    tool: ToolMode,
    tap: Option<TapCandidate>,
    last_navigation_end: Option<Instant>,
    debounce: Duration,
    draw_cooldown: Duration,
    command_cooldown: Duration,
    tap_max_duration: Duration,
    tap_slop: f32,
    navigation_slop: f32,
}

impl Default for GestureCoordinator {
    fn default() -> Self {
        Self::new(&Tunables::default())
    }
}

impl GestureCoordinator {
    pub fn new(tunables: &Tunables) -> Self {
        Self {
            state: GestureState::Idle,
            contacts: BTreeMap::new(),
            tool: ToolMode::Draw,
            tap: None,
            last_navigation_end: None,
            debounce: tunables.debounce,
            draw_cooldown: tunables.draw_cooldown,
            command_cooldown: tunables.command_cooldown,
            tap_max_duration: tunables.tap_max_duration,
            tap_slop: tunables.tap_slop,
            navigation_slop: tunables.navigation_slop,
        }
    }

    pub fn tool(&self) -> ToolMode {
        self.tool
    }

    /// Takes effect with the next contact.
    pub fn set_tool(&mut self, tool: ToolMode) {
        self.tool = tool;
    }

    pub fn is_drawing(&self) -> bool {
        matches!(self.state, GestureState::Drawing { .. })
    }

    pub fn is_navigating(&self) -> bool {
        matches!(self.state, GestureState::Navigating(_))
    }

    /// When the host must call `tick` next, if a timer is armed.
    pub fn next_deadline(&self) -> Option<Instant> {
        match self.state {
            GestureState::Pending { deadline, .. } => Some(deadline),
            _ => None,
        }
    }

    pub fn last_navigation_end(&self) -> Option<Instant> {
        self.last_navigation_end
    }

    /// Feed one pointer event.  Events with no contacts are ignored.
    pub fn handle_event(&mut self, event: &PointerEvent, listener: &mut dyn GestureListener) {
        if event.contacts.is_empty() {
            return;
        }
        let now = event.timestamp;
        self.tick(now, listener);
        match event.phase {
            PointerPhase::Began => self.on_began(&event.contacts, now, listener),
            PointerPhase::Moved => self.on_moved(&event.contacts, listener),
            PointerPhase::Ended => self.on_lifted(&event.contacts, now, false, listener),
            PointerPhase::Cancelled => self.on_lifted(&event.contacts, now, true, listener),
        }
    }

    /// Fire the debounce timer if its deadline has passed.  Calling this
    /// again, or with no timer armed, does nothing.
    pub fn tick(&mut self, now: Instant, listener: &mut dyn GestureListener) {
        let GestureState::Pending { contact, point, deadline } = self.state else {
            return;
        };
        if now < deadline {
            return;
        }
        // The situation may have changed since the timer was armed.
        let still_single = self.finger_count() == 1 && self.contacts.contains_key(&contact);
        if still_single && !self.in_cooldown(now, self.draw_cooldown) {
            listener.stroke_begin(point);
            self.state = GestureState::Drawing { contact, point };
        } else {
            self.state = self.after_release();
        }
    }

    /// Drop every contact, rolling back a stroke in progress.
    pub fn cancel_all(&mut self, listener: &mut dyn GestureListener) {
        if self.is_drawing() {
            listener.stroke_cancel();
        }
        self.contacts.clear();
        self.tap = None;
        self.state = GestureState::Idle;
    }

    // ------------------------------------------------------------------
    // Phase handlers
    // ------------------------------------------------------------------

    fn on_began(&mut self, contacts: &[Contact], now: Instant, listener: &mut dyn GestureListener) {
        let had_fingers = self.finger_count() > 0;
        for c in contacts {
            self.contacts.insert(c.id, *c);
        }
        let fingers = self.fingers();

        if !fingers.is_empty() {
            if !had_fingers || self.tap.is_none() {
                self.tap = Some(TapCandidate::new(now));
            }
            if let Some(tap) = self.tap.as_mut() {
                for f in &fingers {
                    tap.start_positions.entry(f.id).or_insert(f.position);
                }
                tap.max_fingers = tap.max_fingers.max(fingers.len());
            }
        }

        // Two fingers always mean navigation; a stroke in progress is rolled back.
        if fingers.len() >= 2 {
            match self.state {
                GestureState::Navigating(mut tracker) => {
                    tracker.rebaseline(&fingers);
                    self.state = GestureState::Navigating(tracker);
                }
                state => {
                    if matches!(state, GestureState::Drawing { .. }) {
                        listener.stroke_cancel();
                    }
                    self.state = GestureState::Navigating(NavigationTracker::new(self.navigation_slop, &fingers));
                }
            }
            return;
        }

        let stylus = contacts.iter().find(|c| c.device == DeviceKind::Stylus).copied();
        match self.state {
            GestureState::Idle => {
                if let Some(first) = stylus.or_else(|| contacts.first().copied()) {
                    self.state = self.arm_single(first, now, listener);
                }
            }
            // A pen may start over a resting palm or a suppressed finger.
            GestureState::Pending { .. } | GestureState::Suppressed => {
                if let Some(pen) = stylus
                    && self.tool == ToolMode::Draw
                {
                    self.state = self.arm_single(pen, now, listener);
                }
            }
            _ => {}
        }
    }

    fn on_moved(&mut self, contacts: &[Contact], listener: &mut dyn GestureListener) {
        for c in contacts {
            if let Some(known) = self.contacts.get_mut(&c.id) {
                known.position = c.position;
            }
        }

        if let Some(tap) = self.tap.as_mut() {
            let slop = self.tap_slop;
            let moved_far = contacts.iter().any(|c| {
                tap.start_positions
                    .get(&c.id)
                    .is_some_and(|start| (c.position - *start).length() > slop)
            });
            if moved_far {
                tap.disqualified = true;
            }
        }

        let moved = |id: u64| contacts.iter().find(|c| c.id == id).map(|c| c.position);
        match self.state {
            GestureState::Pending { contact, deadline, .. } => {
                if let Some(point) = moved(contact) {
                    self.state = GestureState::Pending { contact, point, deadline };
                }
            }
            GestureState::FillPending { contact, .. } => {
                if let Some(point) = moved(contact) {
                    self.state = GestureState::FillPending { contact, point };
                }
            }
            GestureState::Drawing { contact, .. } => {
                if let Some(point) = moved(contact) {
                    listener.stroke_continue(point);
                    self.state = GestureState::Drawing { contact, point };
                }
            }
            GestureState::Navigating(mut tracker) => {
                tracker.update(&self.fingers(), listener);
                if tracker.engaged
                    && let Some(tap) = self.tap.as_mut()
                {
                    tap.disqualified = true;
                }
                self.state = GestureState::Navigating(tracker);
            }
            GestureState::Idle | GestureState::Suppressed => {}
        }
    }

    fn on_lifted(&mut self, contacts: &[Contact], now: Instant, cancelled: bool, listener: &mut dyn GestureListener) {
        let lifted: Vec<Contact> = contacts
            .iter()
            .filter_map(|c| {
                self.contacts.remove(&c.id).map(|mut known| {
                    known.position = c.position;
                    known
                })
            })
            .collect();
        if lifted.is_empty() {
            return;
        }
        let released = |id: u64| lifted.iter().find(|c| c.id == id).map(|c| c.position);

        match self.state {
            GestureState::Pending { contact, .. } => {
                if let Some(point) = released(contact) {
                    // Lifted before the debounce: still a deliberate dot.
                    if !cancelled && !self.in_cooldown(now, self.draw_cooldown) {
                        listener.stroke_begin(point);
                        listener.stroke_end(point);
                    }
                    self.state = self.after_release();
                }
            }
            GestureState::FillPending { contact, .. } => {
                if let Some(point) = released(contact) {
                    if !cancelled && !self.in_cooldown(now, self.command_cooldown) {
                        listener.fill_tap(point);
                    }
                    self.state = self.after_release();
                }
            }
            GestureState::Drawing { contact, .. } => {
                if let Some(point) = released(contact) {
                    if cancelled {
                        listener.stroke_cancel();
                    } else {
                        listener.stroke_end(point);
                    }
                    self.state = self.after_release();
                }
            }
            GestureState::Navigating(mut tracker) => {
                let fingers = self.fingers();
                if tracker.engaged && fingers.len() < 2 {
                    self.last_navigation_end = Some(now);
                }
                tracker.rebaseline(&fingers);
                self.state = if self.contacts.is_empty() {
                    GestureState::Idle
                } else {
                    GestureState::Navigating(tracker)
                };
            }
            GestureState::Suppressed => {
                self.state = self.after_release();
            }
            GestureState::Idle => {}
        }

        let finger_lifted = lifted.iter().any(|c| c.device == DeviceKind::Finger);
        if finger_lifted
            && self.finger_count() == 0
            && let Some(tap) = self.tap.take()
            && !cancelled
        {
            self.finish_tap(tap, now, listener);
        }
    }

    fn finish_tap(&mut self, tap: TapCandidate, now: Instant, listener: &mut dyn GestureListener) {
        if tap.disqualified || now.saturating_duration_since(tap.started) > self.tap_max_duration {
            return;
        }
        if self.in_cooldown(now, self.command_cooldown) {
            crate::log_info!("{}-finger tap ignored inside navigation cooldown", tap.max_fingers);
            return;
        }
        match tap.max_fingers {
            2 => listener.undo(),
            3 => listener.redo(),
            _ => {}
        }
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    /// State for a single contact landing with nothing else going on.
    fn arm_single(&mut self, contact: Contact, now: Instant, listener: &mut dyn GestureListener) -> GestureState {
        match (self.tool, contact.device) {
            (ToolMode::Fill, _) => GestureState::FillPending {
                contact: contact.id,
                point: contact.position,
            },
            // Pens are unambiguous: no debounce, no cooldown.
            (ToolMode::Draw, DeviceKind::Stylus) => {
                listener.stroke_begin(contact.position);
                GestureState::Drawing {
                    contact: contact.id,
                    point: contact.position,
                }
            }
            (ToolMode::Draw, DeviceKind::Finger) => {
                if self.in_cooldown(now, self.draw_cooldown) {
                    GestureState::Suppressed
                } else {
                    GestureState::Pending {
                        contact: contact.id,
                        point: contact.position,
                        deadline: now + self.debounce,
                    }
                }
            }
        }
    }

    fn after_release(&self) -> GestureState {
        if self.contacts.is_empty() {
            GestureState::Idle
        } else {
            GestureState::Suppressed
        }
    }

    fn in_cooldown(&self, now: Instant, window: Duration) -> bool {
        self.last_navigation_end
            .is_some_and(|end| now.saturating_duration_since(end) < window)
    }

    /// Finger contacts ordered by id.
    fn fingers(&self) -> Vec<Contact> {
        self.contacts
            .values()
            .filter(|c| c.device == DeviceKind::Finger)
            .copied()
            .collect()
    }

    fn finger_count(&self) -> usize {
        self.contacts
            .values()
            .filter(|c| c.device == DeviceKind::Finger)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Begin(Pos2),
        Continue(Pos2),
        End(Pos2),
        Cancel,
        Pan(Vec2),
        Pinch(f32, Pos2),
        Rotate(f32),
        Undo,
        Redo,
        Fill(Pos2),
    }

    #[derive(Default)]
    struct Recorder {
        calls: Vec<Call>,
    }

    impl GestureListener for Recorder {
        fn stroke_begin(&mut self, point: Pos2) {
            self.calls.push(Call::Begin(point));
        }
        fn stroke_continue(&mut self, point: Pos2) {
            self.calls.push(Call::Continue(point));
        }
        fn stroke_end(&mut self, point: Pos2) {
            self.calls.push(Call::End(point));
        }
        fn stroke_cancel(&mut self) {
            self.calls.push(Call::Cancel);
        }
        fn pan(&mut self, delta: Vec2) {
            self.calls.push(Call::Pan(delta));
        }
        fn pinch(&mut self, scale_ratio: f32, center: Pos2) {
            self.calls.push(Call::Pinch(scale_ratio, center));
        }
        fn rotate(&mut self, angle_delta: f32, _center: Pos2) {
            self.calls.push(Call::Rotate(angle_delta));
        }
        fn undo(&mut self) {
            self.calls.push(Call::Undo);
        }
        fn redo(&mut self) {
            self.calls.push(Call::Redo);
        }
        fn fill_tap(&mut self, point: Pos2) {
            self.calls.push(Call::Fill(point));
        }
    }

    struct Harness {
        coordinator: GestureCoordinator,
        recorder: Recorder,
        t0: Instant,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                coordinator: GestureCoordinator::default(),
                recorder: Recorder::default(),
                t0: Instant::now(),
            }
        }

        fn at(&self, ms: u64) -> Instant {
            self.t0 + Duration::from_millis(ms)
        }

        fn send(&mut self, ms: u64, phase: PointerPhase, contacts: &[Contact]) {
            let event = PointerEvent {
                phase,
                contacts: contacts.to_vec(),
                timestamp: self.at(ms),
            };
            self.coordinator.handle_event(&event, &mut self.recorder);
        }

        fn tick(&mut self, ms: u64) {
            let now = self.at(ms);
            self.coordinator.tick(now, &mut self.recorder);
        }

        fn begins(&self) -> usize {
            self.recorder
                .calls
                .iter()
                .filter(|c| matches!(c, Call::Begin(_)))
                .count()
        }

        /// Two-finger pan that engages navigation, lifting both at `end_ms`.
        fn pan_gesture(&mut self, start_ms: u64, end_ms: u64) {
            self.send(start_ms, PointerPhase::Began, &[finger(10, 10.0, 10.0), finger(11, 50.0, 10.0)]);
            self.send(
                start_ms + 20,
                PointerPhase::Moved,
                &[finger(10, 40.0, 10.0), finger(11, 80.0, 10.0)],
            );
            self.send(end_ms, PointerPhase::Ended, &[finger(10, 40.0, 10.0), finger(11, 80.0, 10.0)]);
        }
    }

    fn finger(id: u64, x: f32, y: f32) -> Contact {
        Contact {
            id,
            position: Pos2::new(x, y),
            device: DeviceKind::Finger,
        }
    }

    fn pen(id: u64, x: f32, y: f32) -> Contact {
        Contact {
            id,
            position: Pos2::new(x, y),
            device: DeviceKind::Stylus,
        }
    }

    #[test]
    fn second_finger_inside_debounce_never_draws() {
        let mut h = Harness::new();
        h.send(0, PointerPhase::Began, &[finger(1, 10.0, 10.0)]);
        h.send(10, PointerPhase::Began, &[finger(2, 60.0, 10.0)]);
        h.tick(100);
        h.send(500, PointerPhase::Ended, &[finger(1, 10.0, 10.0), finger(2, 60.0, 10.0)]);
        assert_eq!(h.begins(), 0);
        assert!(h.coordinator.next_deadline().is_none());
    }

    #[test]
    fn held_finger_draws_once_from_latest_point() {
        let mut h = Harness::new();
        h.send(0, PointerPhase::Began, &[finger(1, 10.0, 10.0)]);
        h.send(10, PointerPhase::Moved, &[finger(1, 12.0, 11.0)]);
        h.send(20, PointerPhase::Moved, &[finger(1, 14.0, 12.0)]);
        h.tick(31);
        assert_eq!(h.begins(), 0);
        assert_eq!(h.coordinator.next_deadline(), Some(h.at(32)));

        h.tick(40);
        h.tick(90);
        assert_eq!(h.recorder.calls, vec![Call::Begin(Pos2::new(14.0, 12.0))]);

        h.send(100, PointerPhase::Moved, &[finger(1, 20.0, 12.0)]);
        h.send(110, PointerPhase::Ended, &[finger(1, 22.0, 12.0)]);
        assert_eq!(
            h.recorder.calls,
            vec![
                Call::Begin(Pos2::new(14.0, 12.0)),
                Call::Continue(Pos2::new(20.0, 12.0)),
                Call::End(Pos2::new(22.0, 12.0)),
            ]
        );
        assert!(!h.coordinator.is_drawing());
    }

    #[test]
    fn stylus_begins_immediately() {
        let mut h = Harness::new();
        h.send(0, PointerPhase::Began, &[pen(1, 5.0, 5.0)]);
        assert_eq!(h.recorder.calls, vec![Call::Begin(Pos2::new(5.0, 5.0))]);
        assert!(h.coordinator.is_drawing());
        assert!(h.coordinator.next_deadline().is_none());
    }

    #[test]
    fn cooldown_blocks_new_finger_strokes_until_it_expires() {
        let mut h = Harness::new();
        h.pan_gesture(0, 100);
        assert_eq!(h.coordinator.last_navigation_end(), Some(h.at(100)));
        assert!(h.recorder.calls.iter().any(|c| matches!(c, Call::Pan(_))));

        h.send(150, PointerPhase::Began, &[finger(1, 30.0, 30.0)]);
        h.tick(250);
        h.send(260, PointerPhase::Ended, &[finger(1, 30.0, 30.0)]);
        assert_eq!(h.begins(), 0);

        h.send(320, PointerPhase::Began, &[finger(2, 30.0, 30.0)]);
        h.tick(360);
        assert_eq!(h.begins(), 1);
    }

    #[test]
    fn stylus_ignores_cooldown() {
        let mut h = Harness::new();
        h.pan_gesture(0, 100);
        h.send(110, PointerPhase::Began, &[pen(5, 30.0, 30.0)]);
        assert_eq!(h.begins(), 1);
    }

    #[test]
    fn second_finger_cancels_finger_stroke() {
        let mut h = Harness::new();
        h.send(0, PointerPhase::Began, &[finger(1, 10.0, 10.0)]);
        h.tick(40);
        h.send(50, PointerPhase::Moved, &[finger(1, 15.0, 10.0)]);
        h.send(60, PointerPhase::Began, &[finger(2, 80.0, 10.0)]);
        assert!(h.coordinator.is_navigating());
        assert_eq!(h.recorder.calls.last(), Some(&Call::Cancel));
        assert!(!h.recorder.calls.iter().any(|c| matches!(c, Call::End(_))));
    }

    #[test]
    fn resting_palm_does_not_cancel_pen_but_two_fingers_do() {
        let mut h = Harness::new();
        h.send(0, PointerPhase::Began, &[pen(1, 10.0, 10.0)]);
        h.send(5, PointerPhase::Began, &[finger(2, 200.0, 200.0)]);
        h.send(10, PointerPhase::Moved, &[pen(1, 20.0, 10.0)]);
        assert!(h.coordinator.is_drawing());
        assert_eq!(h.recorder.calls.last(), Some(&Call::Continue(Pos2::new(20.0, 10.0))));

        h.send(20, PointerPhase::Began, &[finger(3, 250.0, 200.0)]);
        assert_eq!(h.recorder.calls.last(), Some(&Call::Cancel));
        assert!(h.coordinator.is_navigating());
    }

    #[test]
    fn pen_contacts_never_navigate() {
        let mut h = Harness::new();
        h.send(0, PointerPhase::Began, &[pen(1, 10.0, 10.0), finger(2, 50.0, 50.0)]);
        h.send(10, PointerPhase::Moved, &[pen(1, 60.0, 10.0), finger(2, 90.0, 90.0)]);
        assert!(h.coordinator.is_drawing());
        assert!(
            !h.recorder
                .calls
                .iter()
                .any(|c| matches!(c, Call::Pan(_) | Call::Pinch(..) | Call::Rotate(_)))
        );
    }

    #[test]
    fn two_and_three_finger_taps_map_to_undo_and_redo() {
        let mut h = Harness::new();
        h.send(0, PointerPhase::Began, &[finger(1, 10.0, 10.0), finger(2, 40.0, 10.0)]);
        h.send(80, PointerPhase::Ended, &[finger(1, 11.0, 10.0)]);
        h.send(90, PointerPhase::Ended, &[finger(2, 40.0, 11.0)]);
        assert_eq!(h.recorder.calls, vec![Call::Undo]);

        h.send(1000, PointerPhase::Began, &[finger(3, 10.0, 10.0)]);
        h.send(1010, PointerPhase::Began, &[finger(4, 40.0, 10.0), finger(5, 70.0, 10.0)]);
        h.send(
            1100,
            PointerPhase::Ended,
            &[finger(3, 10.0, 10.0), finger(4, 40.0, 10.0), finger(5, 70.0, 10.0)],
        );
        assert_eq!(h.recorder.calls, vec![Call::Undo, Call::Redo]);
        assert_eq!(h.begins(), 0);
    }

    #[test]
    fn slow_or_moving_taps_are_not_commands() {
        let mut h = Harness::new();
        h.send(0, PointerPhase::Began, &[finger(1, 10.0, 10.0), finger(2, 40.0, 10.0)]);
        h.send(400, PointerPhase::Ended, &[finger(1, 10.0, 10.0), finger(2, 40.0, 10.0)]);

        h.send(1000, PointerPhase::Began, &[finger(3, 10.0, 10.0), finger(4, 40.0, 10.0)]);
        h.send(1050, PointerPhase::Moved, &[finger(3, 10.0, 30.0), finger(4, 40.0, 30.0)]);
        h.send(1100, PointerPhase::Ended, &[finger(3, 10.0, 30.0), finger(4, 40.0, 30.0)]);
        assert!(!h.recorder.calls.iter().any(|c| matches!(c, Call::Undo | Call::Redo)));
    }

    #[test]
    fn taps_inside_command_cooldown_are_ignored() {
        let mut h = Harness::new();
        h.pan_gesture(0, 100);
        h.send(150, PointerPhase::Began, &[finger(1, 10.0, 10.0), finger(2, 40.0, 10.0)]);
        h.send(250, PointerPhase::Ended, &[finger(1, 10.0, 10.0), finger(2, 40.0, 10.0)]);
        assert!(!h.recorder.calls.contains(&Call::Undo));

        h.send(500, PointerPhase::Began, &[finger(1, 10.0, 10.0), finger(2, 40.0, 10.0)]);
        h.send(600, PointerPhase::Ended, &[finger(1, 10.0, 10.0), finger(2, 40.0, 10.0)]);
        assert_eq!(h.recorder.calls.last(), Some(&Call::Undo));
    }

    #[test]
    fn quick_finger_tap_commits_a_dot() {
        let mut h = Harness::new();
        h.send(0, PointerPhase::Began, &[finger(1, 10.0, 10.0)]);
        h.send(20, PointerPhase::Ended, &[finger(1, 11.0, 10.0)]);
        assert_eq!(
            h.recorder.calls,
            vec![Call::Begin(Pos2::new(11.0, 10.0)), Call::End(Pos2::new(11.0, 10.0))]
        );
        assert!(h.coordinator.next_deadline().is_none());
    }

    #[test]
    fn cancelled_pending_touch_draws_nothing() {
        let mut h = Harness::new();
        h.send(0, PointerPhase::Began, &[finger(1, 10.0, 10.0)]);
        h.send(20, PointerPhase::Cancelled, &[finger(1, 10.0, 10.0)]);
        h.tick(100);
        assert!(h.recorder.calls.is_empty());
    }

    #[test]
    fn fill_tool_fills_on_release() {
        let mut h = Harness::new();
        h.coordinator.set_tool(ToolMode::Fill);
        h.send(0, PointerPhase::Began, &[finger(1, 10.0, 10.0)]);
        h.tick(100);
        h.send(120, PointerPhase::Ended, &[finger(1, 12.0, 10.0)]);
        assert_eq!(h.recorder.calls, vec![Call::Fill(Pos2::new(12.0, 10.0))]);

        // Becoming navigation drops the fill.
        h.send(1000, PointerPhase::Began, &[finger(2, 10.0, 10.0)]);
        h.send(1010, PointerPhase::Began, &[finger(3, 50.0, 10.0)]);
        h.send(2000, PointerPhase::Ended, &[finger(2, 10.0, 10.0), finger(3, 50.0, 10.0)]);
        assert_eq!(h.recorder.calls.len(), 1);
    }

    #[test]
    fn pinch_scales_about_the_finger_centroid() {
        let mut h = Harness::new();
        h.send(0, PointerPhase::Began, &[finger(1, 0.0, 0.0), finger(2, 100.0, 0.0)]);
        h.send(10, PointerPhase::Moved, &[finger(1, -50.0, 0.0), finger(2, 150.0, 0.0)]);
        assert_eq!(h.recorder.calls, vec![Call::Pinch(2.0, Pos2::new(50.0, 0.0))]);
    }

    #[test]
    fn rotation_reports_angle_delta() {
        let mut h = Harness::new();
        h.send(0, PointerPhase::Began, &[finger(1, -50.0, 0.0), finger(2, 50.0, 0.0)]);
        h.send(10, PointerPhase::Moved, &[finger(1, 0.0, -50.0), finger(2, 0.0, 50.0)]);
        let rotations: Vec<f32> = h
            .recorder
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Rotate(a) => Some(*a),
                _ => None,
            })
            .collect();
        assert_eq!(rotations.len(), 1);
        assert!((rotations[0] - PI / 2.0).abs() < 1e-4);
    }

    #[test]
    fn small_jitter_stays_below_navigation_slop() {
        let mut h = Harness::new();
        h.send(0, PointerPhase::Began, &[finger(1, 10.0, 10.0), finger(2, 60.0, 10.0)]);
        h.send(10, PointerPhase::Moved, &[finger(1, 11.0, 11.0), finger(2, 61.0, 11.0)]);
        assert!(h.recorder.calls.is_empty());
    }

    #[test]
    fn empty_and_unknown_events_are_no_ops() {
        let mut h = Harness::new();
        h.send(0, PointerPhase::Began, &[]);
        h.send(5, PointerPhase::Moved, &[finger(9, 1.0, 1.0)]);
        h.send(6, PointerPhase::Ended, &[finger(9, 1.0, 1.0)]);
        h.tick(1000);
        h.tick(1000);
        assert!(h.recorder.calls.is_empty());
        assert!(h.coordinator.next_deadline().is_none());
    }

    #[test]
    fn wrap_angle_stays_in_half_open_range() {
        assert!((wrap_angle(3.0 * PI / 2.0) + PI / 2.0).abs() < 1e-5);
        assert!((wrap_angle(-PI) - PI).abs() < 1e-5);
        assert!((wrap_angle(0.25) - 0.25).abs() < 1e-5);
    }
}
