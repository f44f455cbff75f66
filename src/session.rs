// session.rs - one visit to one panorama
//
// A session owns the camera, the current texture set, the placed decorative
// models and the navigation markers. Load results come in as `LoadMessage`s
// tagged with the session id; anything for another session, anything after
// `end()`, and anything out of stage order is dropped.

use crate::backdrop::{ground_repeat, GROUND_REPEAT_DEPTH};
use crate::brick::{render_close_pixels, BrickPattern, GROUND_BRICKS};
use crate::depth::{build_textures, DecodedTexture, RawDepthBuffer};
use crate::nav::Nav;
use crate::orbit::{OrbitController, PickQuery, Viewport};
use crate::placement::{place, DecorativeScene, ItemOutcome};
use crate::source::{Location, PanoLink, PanoramaData, SourceError};
use glam::{Vec2, Vec3};
use image::RgbaImage;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        SessionId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    AwaitingPanorama,
    AwaitingDepth,
    LoadingModels,
    Ready,
    Ended,
}

#[derive(Debug)]
pub enum LoadEvent {
    Panorama(Result<PanoramaData, SourceError>),
    Depth(Result<RawDepthBuffer, SourceError>),
    Model(ItemOutcome),
    ModelsDone,
}

#[derive(Debug)]
pub struct LoadMessage {
    pub session: SessionId,
    pub event: LoadEvent,
}

/// Outbound notifications, drained by the host each frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    Progress(f32),
    LoadComplete,
    LinkClicked { pano: String, description: String },
}

/// The textures the renderer should be showing. Replaced as a whole.
#[derive(Debug, Clone)]
pub struct TextureSet {
    pub diffuse: Option<RgbaImage>,
    pub normal: Option<DecodedTexture>,
    pub depth: Option<DecodedTexture>,
    /// Brick layers already drawn into `diffuse`.
    pub pattern: Vec<BrickPattern>,
    /// Tiles per side of the backdrop floor.
    pub ground_repeat: f32,
    generation: u64,
}

impl Default for TextureSet {
    fn default() -> Self {
        Self {
            diffuse: None,
            normal: None,
            depth: None,
            pattern: Vec::new(),
            ground_repeat: GROUND_REPEAT_DEPTH,
            generation: 0,
        }
    }
}

impl TextureSet {
    /// Bumped on every replacement; the renderer re-uploads when it changes.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

const PROGRESS_PANORAMA: f32 = 0.25;
const PROGRESS_DEPTH: f32 = 0.5;

pub struct Session {
    id: SessionId,
    location: Location,
    stage: Stage,
    orbit: OrbitController,
    textures: TextureSet,
    scene: DecorativeScene,
    nav: Nav,
    pano_id: Option<String>,
    center_heading: f32,
    links: Vec<PanoLink>,
    pending_diffuse: Option<RgbaImage>,
    model_total: usize,
    models_seen: usize,
    cancel: Arc<AtomicBool>,
    signals: Vec<Signal>,
    started: Instant,
}

impl Session {
    pub fn new(location: Location, viewport: Viewport, model_total: usize) -> Self {
        let id = SessionId::next();
        log::info!("session {} started for {}", id, location);
        Self {
            id,
            location,
            stage: Stage::AwaitingPanorama,
            orbit: OrbitController::new(viewport),
            textures: TextureSet::default(),
            scene: DecorativeScene::default(),
            nav: Nav::default(),
            pano_id: None,
            center_heading: 0.0,
            links: Vec::new(),
            pending_diffuse: None,
            model_total,
            models_seen: 0,
            cancel: Arc::new(AtomicBool::new(false)),
            signals: Vec::new(),
            started: Instant::now(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn is_ready(&self) -> bool {
        self.stage == Stage::Ready
    }

    pub fn pano_id(&self) -> Option<&str> {
        self.pano_id.as_deref()
    }

    pub fn links(&self) -> &[PanoLink] {
        &self.links
    }

    pub fn orbit(&self) -> &OrbitController {
        &self.orbit
    }

    pub fn textures(&self) -> &TextureSet {
        &self.textures
    }

    pub fn scene(&self) -> &DecorativeScene {
        &self.scene
    }

    pub fn nav(&self) -> &Nav {
        &self.nav
    }

    /// Shared with the load worker; set once the session is over.
    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn progress(&self) -> f32 {
        match self.stage {
            Stage::AwaitingPanorama => 0.0,
            Stage::AwaitingDepth => PROGRESS_PANORAMA,
            Stage::LoadingModels => self.model_progress(),
            Stage::Ready | Stage::Ended => 1.0,
        }
    }

    fn model_progress(&self) -> f32 {
        if self.model_total == 0 {
            return PROGRESS_DEPTH;
        }
        let done = self.models_seen.min(self.model_total) as f32 / self.model_total as f32;
        PROGRESS_DEPTH + (1.0 - PROGRESS_DEPTH) * done
    }

    pub fn drain_signals(&mut self) -> Vec<Signal> {
        std::mem::take(&mut self.signals)
    }

    /// Applies a load result. Returns whether it was accepted.
    pub fn handle(&mut self, msg: LoadMessage) -> bool {
        if msg.session != self.id {
            log::debug!("session {}: dropping message for {}", self.id, msg.session);
            return false;
        }
        if self.stage == Stage::Ended {
            log::debug!("session {}: dropping message after end", self.id);
            return false;
        }

        match (self.stage, msg.event) {
            (Stage::AwaitingPanorama, LoadEvent::Panorama(Ok(pano))) => {
                self.on_panorama(pano);
            }
            (Stage::AwaitingPanorama, LoadEvent::Panorama(Err(e))) => {
                log::error!("session {}: panorama load failed: {}", self.id, e);
                self.finish();
            }
            (Stage::AwaitingDepth, LoadEvent::Depth(Ok(buffers))) => {
                self.on_depth(&buffers);
            }
            (Stage::AwaitingDepth, LoadEvent::Depth(Err(e))) => {
                log::warn!("session {}: depth load failed: {}", self.id, e);
                self.on_depth_error();
            }
            (Stage::LoadingModels, LoadEvent::Model(item)) => {
                self.on_model(item);
            }
            (Stage::LoadingModels, LoadEvent::ModelsDone) => {
                log::info!(
                    "session {}: {} decorative models placed",
                    self.id,
                    self.scene.placed().len()
                );
                self.nav.set_links(&self.links, self.center_heading);
                self.finish();
            }
            (stage, event) => {
                log::warn!(
                    "session {}: ignoring {} while {:?}",
                    self.id,
                    event_name(&event),
                    stage
                );
                return false;
            }
        }
        true
    }

    fn on_panorama(&mut self, pano: PanoramaData) {
        self.pano_id = Some(pano.pano_id);
        self.center_heading = pano.center_heading;
        self.links = pano.links;
        self.pending_diffuse = Some(pano.diffuse);
        self.stage = Stage::AwaitingDepth;
        self.signals.push(Signal::Progress(PROGRESS_PANORAMA));
    }

    fn on_depth(&mut self, buffers: &RawDepthBuffer) {
        let mut decoded = match build_textures(buffers) {
            Ok(t) => t,
            Err(e) => {
                log::warn!("session {}: unusable depth data: {}", self.id, e);
                self.on_depth_error();
                return;
            }
        };

        let mut diffuse = self.pending_diffuse.take().unwrap_or_default();
        render_close_pixels(&mut diffuse, Some(&mut decoded.normal), &[GROUND_BRICKS]);
        self.publish(diffuse, Some(decoded.normal), Some(decoded.depth));

        log::info!(
            "session {}: panorama ready in {:?}",
            self.id,
            self.started.elapsed()
        );
        self.stage = Stage::LoadingModels;
        self.signals.push(Signal::Progress(PROGRESS_DEPTH));
    }

    /// No depth: brick the diffuse image alone and call it done.
    fn on_depth_error(&mut self) {
        let mut diffuse = self.pending_diffuse.take().unwrap_or_default();
        render_close_pixels(&mut diffuse, None, &[GROUND_BRICKS]);
        self.publish(diffuse, None, None);
        self.finish();
    }

    fn publish(
        &mut self,
        diffuse: RgbaImage,
        normal: Option<DecodedTexture>,
        depth: Option<DecodedTexture>,
    ) {
        self.textures = TextureSet {
            ground_repeat: ground_repeat(depth.is_some()),
            diffuse: Some(diffuse),
            normal,
            depth,
            pattern: vec![GROUND_BRICKS],
            generation: self.textures.generation + 1,
        };
    }

    fn on_model(&mut self, item: ItemOutcome) {
        match item {
            ItemOutcome::Loaded { entry, mesh } => {
                log::debug!("session {}: placing {}", self.id, entry.name);
                self.scene.add(place(&entry, mesh));
            }
            ItemOutcome::Failed { name, error } => {
                log::warn!("session {}: skipping model {}: {}", self.id, name, error);
            }
        }
        self.models_seen += 1;
        self.signals.push(Signal::Progress(self.model_progress()));
    }

    fn finish(&mut self) {
        self.stage = Stage::Ready;
        self.signals.push(Signal::Progress(1.0));
        self.signals.push(Signal::LoadComplete);
        log::info!(
            "session {}: load complete in {:?}",
            self.id,
            self.started.elapsed()
        );
    }

    /// Per-frame camera step. Returns the look-at target.
    pub fn frame(&mut self) -> Vec3 {
        self.orbit.update()
    }

    pub fn resize(&mut self, viewport: Viewport) {
        self.orbit.resize(viewport);
    }

    pub fn reset_view(&mut self) {
        self.orbit.reset();
    }

    pub fn pointer_down(&mut self, pos: Vec2, now: Instant) {
        if self.stage != Stage::Ended {
            self.orbit.pointer_down(pos, now);
        }
    }

    pub fn pointer_move(&mut self, pos: Vec2) {
        if self.stage != Stage::Ended {
            self.orbit.pointer_move(pos);
        }
    }

    pub fn pointer_up(&mut self, now: Instant) {
        if let Some(q) = self.orbit.pointer_up(now) {
            self.pick(q);
        }
    }

    pub fn touch_start(&mut self, touches: &[Vec2], now: Instant) {
        if self.stage != Stage::Ended {
            self.orbit.touch_start(touches, now);
        }
    }

    pub fn touch_move(&mut self, touches: &[Vec2]) {
        if self.stage != Stage::Ended {
            self.orbit.touch_move(touches);
        }
    }

    pub fn touch_end(&mut self, now: Instant) {
        if let Some(q) = self.orbit.touch_end(now) {
            self.pick(q);
        }
    }

    pub fn wheel(&mut self, delta_y: f32) {
        self.orbit.wheel(delta_y);
    }

    /// Scene pick for a tap. Only navigation markers react.
    pub fn pick(&mut self, query: PickQuery) {
        if self.stage == Stage::Ended {
            return;
        }
        let ray = self.orbit.pick_ray(query.ndc);
        if let Some(marker) = self.nav.pick(ray) {
            log::info!("session {}: link to {} clicked", self.id, marker.pano);
            self.signals.push(Signal::LinkClicked {
                pano: marker.pano.clone(),
                description: marker.description.clone(),
            });
        }
    }

    /// Ends the session: cancels the load worker, tears down placed models.
    /// Later messages for this session are no-ops.
    pub fn end(&mut self) {
        if self.stage == Stage::Ended {
            return;
        }
        self.cancel.store(true, Ordering::Relaxed);
        let removed = self.scene.teardown();
        self.nav.clear();
        self.pending_diffuse = None;
        self.stage = Stage::Ended;
        log::info!("session {} ended, {} models released", self.id, removed);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
    }
}

fn event_name(event: &LoadEvent) -> &'static str {
    match event {
        LoadEvent::Panorama(_) => "panorama",
        LoadEvent::Depth(_) => "depth",
        LoadEvent::Model(_) => "model",
        LoadEvent::ModelsDone => "models-done",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::placement::{CatalogEntry, Layout, ModelMesh, TREE_COLOR, TREE_MODEL};
    use image::Rgba;

    fn viewport() -> Viewport {
        Viewport::new(800.0, 600.0)
    }

    fn pano(links: Vec<PanoLink>) -> PanoramaData {
        PanoramaData {
            pano_id: "p1".into(),
            diffuse: RgbaImage::from_fn(64, 32, |x, y| Rgba([x as u8, y as u8, 0, 255])),
            center_heading: 0.0,
            links,
        }
    }

    fn depth() -> RawDepthBuffer {
        RawDepthBuffer {
            width: 8,
            height: 4,
            depth_map: vec![5.0; 32],
            normal_map: vec![0.0; 96],
        }
    }

    fn tree() -> ItemOutcome {
        ItemOutcome::Loaded {
            entry: CatalogEntry {
                name: TREE_MODEL.into(),
                color: TREE_COLOR,
                layout: Layout::TreeRow,
            },
            mesh: ModelMesh {
                positions: vec![[0.0; 3]; 3],
                indices: vec![0, 1, 2],
            },
        }
    }

    fn msg(s: &Session, event: LoadEvent) -> LoadMessage {
        LoadMessage {
            session: s.id(),
            event,
        }
    }

    fn completions(signals: &[Signal]) -> usize {
        signals
            .iter()
            .filter(|s| **s == Signal::LoadComplete)
            .count()
    }

    #[test]
    fn full_load_in_order() {
        let mut s = Session::new(Location::PanoId("p1".into()), viewport(), 1);
        assert!(s.handle(msg(&s, LoadEvent::Panorama(Ok(pano(vec![]))))));
        assert_eq!(s.stage(), Stage::AwaitingDepth);
        assert!(s.textures().diffuse.is_none());

        assert!(s.handle(msg(&s, LoadEvent::Depth(Ok(depth())))));
        assert_eq!(s.stage(), Stage::LoadingModels);
        let t = s.textures();
        assert_eq!(t.generation(), 1);
        assert_eq!(t.depth.as_ref().unwrap().dimensions(), (8, 4));
        assert!(t.normal.is_some());
        assert_eq!(t.pattern, [GROUND_BRICKS]);
        assert_eq!(t.ground_repeat, GROUND_REPEAT_DEPTH);

        assert!(s.handle(msg(&s, LoadEvent::Model(tree()))));
        assert!(s.handle(msg(&s, LoadEvent::ModelsDone)));
        assert!(s.is_ready());
        assert_eq!(s.scene().placed().len(), 8);

        let signals = s.drain_signals();
        assert_eq!(completions(&signals), 1);
        assert_eq!(signals.first(), Some(&Signal::Progress(PROGRESS_PANORAMA)));
        assert!(s.drain_signals().is_empty());
    }

    #[test]
    fn depth_failure_still_completes_once() {
        let mut s = Session::new(Location::PanoId("p1".into()), viewport(), 3);
        s.handle(msg(&s, LoadEvent::Panorama(Ok(pano(vec![])))));
        s.handle(msg(
            &s,
            LoadEvent::Depth(Err(SourceError::NotFound("p1".into()))),
        ));

        assert!(s.is_ready());
        let t = s.textures();
        assert!(t.diffuse.is_some());
        assert!(t.normal.is_none() && t.depth.is_none());
        assert_eq!(t.pattern[0].resolution_x, 8);
        assert_eq!(t.pattern[0].resolution_y, 18);
        assert_eq!(t.ground_repeat, crate::backdrop::GROUND_REPEAT_FLAT);

        // nothing after completion moves it again
        assert!(!s.handle(msg(&s, LoadEvent::ModelsDone)));
        assert_eq!(completions(&s.drain_signals()), 1);
    }

    #[test]
    fn malformed_depth_takes_fallback() {
        let mut s = Session::new(Location::PanoId("p1".into()), viewport(), 0);
        s.handle(msg(&s, LoadEvent::Panorama(Ok(pano(vec![])))));
        let mut bad = depth();
        bad.depth_map.truncate(3);
        s.handle(msg(&s, LoadEvent::Depth(Ok(bad))));
        assert!(s.is_ready());
        assert!(s.textures().normal.is_none());
    }

    #[test]
    fn out_of_order_messages_are_rejected() {
        let mut s = Session::new(Location::PanoId("p1".into()), viewport(), 1);
        assert!(!s.handle(msg(&s, LoadEvent::Depth(Ok(depth())))));
        assert!(!s.handle(msg(&s, LoadEvent::Model(tree()))));
        assert_eq!(s.stage(), Stage::AwaitingPanorama);
        assert!(s.textures().diffuse.is_none());
    }

    #[test]
    fn stale_session_messages_are_no_ops() {
        let old = Session::new(Location::PanoId("p0".into()), viewport(), 1);
        let mut s = Session::new(Location::PanoId("p1".into()), viewport(), 1);
        assert_ne!(old.id(), s.id());

        assert!(!s.handle(msg(&old, LoadEvent::Panorama(Ok(pano(vec![]))))));
        assert_eq!(s.stage(), Stage::AwaitingPanorama);
        assert!(s.pano_id().is_none());
    }

    #[test]
    fn end_cancels_and_tears_down() {
        let mut s = Session::new(Location::PanoId("p1".into()), viewport(), 1);
        let token = s.cancel_token();
        s.handle(msg(&s, LoadEvent::Panorama(Ok(pano(vec![])))));
        s.handle(msg(&s, LoadEvent::Depth(Ok(depth()))));
        s.handle(msg(&s, LoadEvent::Model(tree())));
        assert_eq!(s.scene().placed().len(), 8);

        s.end();
        assert!(token.load(Ordering::Relaxed));
        assert_eq!(s.stage(), Stage::Ended);
        assert!(s.scene().placed().is_empty());
        assert!(!s.handle(msg(&s, LoadEvent::ModelsDone)));
        assert_eq!(completions(&s.drain_signals()), 0);
    }

    #[test]
    fn progress_advances_through_models() {
        let mut s = Session::new(Location::PanoId("p1".into()), viewport(), 2);
        assert_eq!(s.progress(), 0.0);
        s.handle(msg(&s, LoadEvent::Panorama(Ok(pano(vec![])))));
        s.handle(msg(&s, LoadEvent::Depth(Ok(depth()))));
        assert_eq!(s.progress(), 0.5);
        s.handle(msg(&s, LoadEvent::Model(tree())));
        assert_eq!(s.progress(), 0.75);
    }

    #[test]
    fn tapping_a_marker_signals_the_link() {
        // 20 degrees off the opening view direction
        let link = PanoLink {
            heading: -70.0,
            pano: "next".into(),
            description: "Broadway".into(),
        };
        let mut s = Session::new(Location::PanoId("p1".into()), viewport(), 0);
        s.handle(msg(&s, LoadEvent::Panorama(Ok(pano(vec![link])))));
        s.handle(msg(&s, LoadEvent::Depth(Ok(depth()))));
        s.handle(msg(&s, LoadEvent::ModelsDone));
        s.drain_signals();
        s.frame();

        let marker = s.nav().markers()[0].position;
        let ndc = s.orbit().view_proj().project_point3(marker);
        let px = Vec2::new((ndc.x + 1.0) * 400.0, (1.0 - ndc.y) * 300.0);

        let t0 = Instant::now();
        s.pointer_down(px, t0);
        s.pointer_up(t0 + std::time::Duration::from_millis(100));

        assert_eq!(
            s.drain_signals(),
            [Signal::LinkClicked {
                pano: "next".into(),
                description: "Broadway".into()
            }]
        );
    }
}
