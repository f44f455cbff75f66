// orbit.rs - longitude/latitude orbit camera driven by mouse and single-touch drags
//
// The controller is the only writer of `OrbitState`. Window handlers feed it
// pointer events; the render step calls `update()` once per frame and reads the
// look-at target back.

use glam::{Mat4, Vec2, Vec3};
use std::time::{Duration, Instant};

/// Degrees of lon/lat per pixel of drag.
pub const SENSITIVITY: f32 = 0.1;
pub const LAT_LIMIT: f32 = 85.0;
/// Press-to-release time under which a release counts as a tap.
pub const TAP_THRESHOLD: Duration = Duration::from_millis(300);
/// Pixels the pointer may wander from the press point before the press counts
/// as a drag.
pub const DRAG_SLOP: f32 = 3.0;
pub const TARGET_RADIUS: f32 = 500.0;
/// Factor 1: the target jumps straight to the new point every frame.
pub const TARGET_LERP: f32 = 1.0;

pub const DEFAULT_LON: f32 = 90.0;
pub const DEFAULT_FOV: f32 = 70.0;
pub const MIN_FOV: f32 = 40.0;
pub const MAX_FOV: f32 = 80.0;
/// FOV degrees per unit of DOM-style wheel delta (120 per notch).
pub const WHEEL_ZOOM: f32 = 0.05;
pub const NEAR: f32 = 1.0;
pub const FAR: f32 = 3100.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: f32,
    pub height: f32,
}

impl Viewport {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    pub fn aspect(&self) -> f32 {
        if self.height > 0.0 {
            self.width / self.height
        } else {
            1.0
        }
    }

    /// Window pixels -> normalized device coordinates, y up.
    pub fn ndc(&self, p: Vec2) -> Vec2 {
        if self.width <= 0.0 || self.height <= 0.0 {
            return Vec2::ZERO;
        }
        Vec2::new(p.x / self.width * 2.0 - 1.0, -(p.y / self.height) * 2.0 + 1.0)
    }
}

/// Orbit angles. `phi`/`theta` are derived in `OrbitController::update`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrbitState {
    pub lon: f32,
    pub lat: f32,
    pub phi: f32,
    pub theta: f32,
}

impl Default for OrbitState {
    fn default() -> Self {
        Self {
            lon: DEFAULT_LON,
            lat: 0.0,
            phi: 0.0,
            theta: 0.0,
        }
    }
}

/// Snapshot taken when a drag starts; moves are measured against it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerDragSession {
    pub start: Vec2,
    pub start_lon: f32,
    pub start_lat: f32,
    pub started_at: Instant,
    /// Set once the pointer has moved more than `DRAG_SLOP` from `start`.
    pub dragging: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Mode {
    Idle,
    Dragging(PointerDragSession),
}

/// A tap asks the scene what lies under this point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PickQuery {
    pub ndc: Vec2,
}

#[derive(Debug, Clone)]
pub struct OrbitController {
    state: OrbitState,
    mode: Mode,
    pointer_ndc: Vec2,
    target: Vec3,
    fov: f32,
    viewport: Viewport,
}

fn clamp_lat(lat: f32) -> f32 {
    lat.clamp(-LAT_LIMIT, LAT_LIMIT)
}

impl OrbitController {
    pub fn new(viewport: Viewport) -> Self {
        let mut c = Self {
            state: OrbitState::default(),
            mode: Mode::Idle,
            pointer_ndc: Vec2::ZERO,
            target: Vec3::ZERO,
            fov: DEFAULT_FOV,
            viewport,
        };
        c.update();
        c
    }

    pub fn state(&self) -> OrbitState {
        self.state
    }

    pub fn target(&self) -> Vec3 {
        self.target
    }

    pub fn fov(&self) -> f32 {
        self.fov
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn pointer_ndc(&self) -> Vec2 {
        self.pointer_ndc
    }

    pub fn is_dragging(&self) -> bool {
        matches!(self.mode, Mode::Dragging(s) if s.dragging)
    }

    pub fn drag_session(&self) -> Option<PointerDragSession> {
        match self.mode {
            Mode::Dragging(s) => Some(s),
            Mode::Idle => None,
        }
    }

    pub fn resize(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    /// Back to the initial heading and zoom. Drops any drag in progress.
    pub fn reset(&mut self) {
        self.state = OrbitState::default();
        self.mode = Mode::Idle;
        self.fov = DEFAULT_FOV;
        self.update();
    }

    fn begin_drag(&mut self, pos: Vec2, now: Instant) {
        self.mode = Mode::Dragging(PointerDragSession {
            start: pos,
            start_lon: self.state.lon,
            start_lat: self.state.lat,
            started_at: now,
            dragging: false,
        });
        self.pointer_ndc = self.viewport.ndc(pos);
    }

    fn drag_to(&mut self, pos: Vec2) {
        if let Mode::Dragging(s) = &mut self.mode {
            s.dragging |= pos.distance(s.start) > DRAG_SLOP;
            self.state.lon = (s.start.x - pos.x) * SENSITIVITY + s.start_lon;
            self.state.lat = clamp_lat((pos.y - s.start.y) * SENSITIVITY + s.start_lat);
        }
    }

    fn finish_drag(&mut self, now: Instant) -> Option<PickQuery> {
        let Mode::Dragging(s) = std::mem::replace(&mut self.mode, Mode::Idle) else {
            return None;
        };
        if now.saturating_duration_since(s.started_at) < TAP_THRESHOLD {
            Some(PickQuery {
                ndc: self.pointer_ndc,
            })
        } else {
            None
        }
    }

    pub fn pointer_down(&mut self, pos: Vec2, now: Instant) {
        self.begin_drag(pos, now);
    }

    /// Tracks the pointer always; rotates only while dragging.
    pub fn pointer_move(&mut self, pos: Vec2) {
        self.drag_to(pos);
        self.pointer_ndc = self.viewport.ndc(pos);
    }

    pub fn pointer_up(&mut self, now: Instant) -> Option<PickQuery> {
        self.finish_drag(now)
    }

    /// `touches` holds every finger currently down. Anything but exactly one
    /// is ignored.
    pub fn touch_start(&mut self, touches: &[Vec2], now: Instant) {
        if let [pos] = touches {
            self.begin_drag(*pos, now);
        }
    }

    pub fn touch_move(&mut self, touches: &[Vec2]) {
        if let [pos] = touches {
            self.drag_to(*pos);
            self.pointer_ndc = self.viewport.ndc(*pos);
        }
    }

    pub fn touch_end(&mut self, now: Instant) -> Option<PickQuery> {
        self.finish_drag(now)
    }

    /// `delta_y` in DOM wheel units, positive = scroll up = zoom in.
    pub fn wheel(&mut self, delta_y: f32) {
        self.fov = (self.fov - delta_y * WHEEL_ZOOM).clamp(MIN_FOV, MAX_FOV);
    }

    /// Per-frame step: clamp latitude, derive phi/theta, move the target.
    pub fn update(&mut self) -> Vec3 {
        let s = &mut self.state;
        s.lat = clamp_lat(s.lat);
        s.phi = (90.0 - s.lat).to_radians();
        s.theta = s.lon.to_radians();

        let updated = TARGET_RADIUS
            * Vec3::new(
                s.phi.sin() * s.theta.cos(),
                s.phi.cos(),
                s.phi.sin() * s.theta.sin(),
            );
        self.target = self.target.lerp(updated, TARGET_LERP);
        self.target
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(Vec3::ZERO, self.target, Vec3::Y)
    }

    pub fn projection(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov.to_radians(), self.viewport.aspect(), NEAR, FAR)
    }

    pub fn view_proj(&self) -> Mat4 {
        self.projection() * self.view()
    }

    /// Unit direction from the camera through an NDC point.
    pub fn pick_ray(&self, ndc: Vec2) -> Vec3 {
        let inv = self.view_proj().inverse();
        let near = inv.project_point3(Vec3::new(ndc.x, ndc.y, 0.0));
        let far = inv.project_point3(Vec3::new(ndc.x, ndc.y, 1.0));
        (far - near).normalize_or_zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> OrbitController {
        OrbitController::new(Viewport::new(800.0, 600.0))
    }

    #[test]
    fn initial_target_looks_down_z() {
        let c = controller();
        let t = c.target();
        assert!(t.x.abs() < 1e-3, "{t:?}");
        assert!(t.y.abs() < 1e-3, "{t:?}");
        assert!((t.z - TARGET_RADIUS).abs() < 1e-3, "{t:?}");
    }

    #[test]
    fn drag_is_relative_to_drag_start() {
        let mut c = controller();
        let t0 = Instant::now();
        c.pointer_down(Vec2::new(400.0, 300.0), t0);
        c.pointer_move(Vec2::new(450.0, 300.0));
        c.pointer_move(Vec2::new(500.0, 320.0));

        let s = c.state();
        assert!((s.lon - (DEFAULT_LON - 10.0)).abs() < 1e-4);
        assert!((s.lat - 2.0).abs() < 1e-4);

        // moving back to the press point restores the snapshot exactly
        c.pointer_move(Vec2::new(400.0, 300.0));
        assert_eq!(c.state().lon, DEFAULT_LON);
        assert_eq!(c.state().lat, 0.0);
    }

    #[test]
    fn move_without_press_does_not_rotate() {
        let mut c = controller();
        c.pointer_move(Vec2::new(10.0, 10.0));
        assert_eq!(c.state().lon, DEFAULT_LON);
        assert!(!c.is_dragging());
        assert!(c.pointer_ndc().x < -0.9);
    }

    #[test]
    fn press_becomes_a_drag_only_after_moving_past_the_slop() {
        let mut c = controller();
        let t0 = Instant::now();
        c.pointer_down(Vec2::new(100.0, 100.0), t0);
        assert!(c.drag_session().is_some());
        assert!(!c.is_dragging());

        c.pointer_move(Vec2::new(102.0, 101.0));
        assert!(!c.is_dragging());

        c.pointer_move(Vec2::new(110.0, 100.0));
        assert!(c.is_dragging());
        // back near the press point it stays a drag
        c.pointer_move(Vec2::new(100.0, 100.0));
        assert!(c.is_dragging());

        c.pointer_up(t0 + Duration::from_secs(1));
        assert!(!c.is_dragging());
        assert!(c.drag_session().is_none());
    }

    #[test]
    fn latitude_stays_clamped() {
        let mut c = controller();
        let t0 = Instant::now();
        c.pointer_down(Vec2::new(0.0, 0.0), t0);
        for y in [1.0e6, -1.0e7, 849.0, 851.0, -2.0e9] {
            c.pointer_move(Vec2::new(0.0, y));
            assert!(c.state().lat.abs() <= LAT_LIMIT);
            c.update();
            assert!(c.state().lat.abs() <= LAT_LIMIT);
        }
        assert_eq!(c.state().lat, -LAT_LIMIT);
    }

    #[test]
    fn quick_release_is_a_tap() {
        let mut c = controller();
        let t0 = Instant::now();
        c.pointer_down(Vec2::new(600.0, 150.0), t0);
        let pick = c.pointer_up(t0 + Duration::from_millis(120));

        let pick = pick.expect("tap");
        assert!((pick.ndc.x - 0.5).abs() < 1e-5);
        assert!((pick.ndc.y - 0.5).abs() < 1e-5);
        assert!(!c.is_dragging());
    }

    #[test]
    fn held_release_is_not_a_tap() {
        let mut c = controller();
        let t0 = Instant::now();
        c.pointer_down(Vec2::new(10.0, 10.0), t0);
        assert!(c.pointer_up(t0 + TAP_THRESHOLD).is_none());
        assert!(c.pointer_up(t0 + Duration::from_millis(10)).is_none());
    }

    #[test]
    fn multi_touch_is_ignored() {
        let mut c = controller();
        let before = c.state();
        let t0 = Instant::now();
        c.touch_start(&[Vec2::new(1.0, 1.0), Vec2::new(50.0, 50.0)], t0);
        assert!(c.drag_session().is_none());
        c.touch_move(&[Vec2::new(300.0, 300.0), Vec2::new(90.0, 90.0)]);
        assert_eq!(c.state(), before);
        assert!(c.touch_end(t0).is_none());
    }

    #[test]
    fn single_touch_drags_and_taps() {
        let mut c = controller();
        let t0 = Instant::now();
        c.touch_start(&[Vec2::new(100.0, 100.0)], t0);
        c.touch_move(&[Vec2::new(80.0, 130.0)]);
        assert!((c.state().lon - (DEFAULT_LON + 2.0)).abs() < 1e-4);
        assert!((c.state().lat - 3.0).abs() < 1e-4);
        assert!(c.touch_end(t0 + Duration::from_millis(50)).is_some());
    }

    #[test]
    fn wheel_zoom_is_bounded() {
        let mut c = controller();
        c.wheel(120.0);
        assert!((c.fov() - (DEFAULT_FOV - 6.0)).abs() < 1e-4);
        c.wheel(10_000.0);
        assert_eq!(c.fov(), MIN_FOV);
        c.wheel(-10_000.0);
        assert_eq!(c.fov(), MAX_FOV);
    }

    #[test]
    fn center_pick_ray_follows_target() {
        let mut c = controller();
        c.update();
        let ray = c.pick_ray(Vec2::ZERO);
        let dir = c.target().normalize();
        assert!(ray.dot(dir) > 0.999, "{ray:?} vs {dir:?}");
    }
}
