// loader.rs - background load worker for a session
//
// One thread per session runs panorama -> depth -> models in order and sends
// every result back over a channel, tagged with the session id. The UI thread
// drains the channel each frame; nothing here touches session state.

use crate::orbit::Viewport;
use crate::placement::{catalog, load_sequentially, CarSelector, CatalogEntry, ModelLoader};
use crate::session::{LoadEvent, LoadMessage, Session, SessionId};
use crate::source::{DepthSource, LocalPack, Location, PanoramaSource};
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

/// The three providers a load needs, moved onto the worker thread.
pub struct Sources {
    pub panorama: Box<dyn PanoramaSource>,
    pub depth: Box<dyn DepthSource>,
    pub models: Box<dyn ModelLoader>,
}

impl Sources {
    pub fn local(pack: LocalPack) -> Self {
        Self {
            panorama: Box::new(pack.clone()),
            depth: Box::new(pack.clone()),
            models: Box::new(pack),
        }
    }
}

/// Starts a session for `location` together with its load worker.
pub fn start(
    location: Location,
    viewport: Viewport,
    cars: &mut CarSelector,
    sources: Sources,
) -> (Session, Receiver<LoadMessage>) {
    let items = catalog(cars);
    let session = Session::new(location.clone(), viewport, items.len());
    let rx = spawn_load(session.id(), session.cancel_token(), location, items, sources);
    (session, rx)
}

pub fn spawn_load(
    session: SessionId,
    cancel: Arc<AtomicBool>,
    location: Location,
    items: Vec<CatalogEntry>,
    sources: Sources,
) -> Receiver<LoadMessage> {
    let (tx, rx) = channel();
    thread::spawn(move || run(session, &cancel, &location, items, sources, &tx));
    rx
}

fn run(
    session: SessionId,
    cancel: &AtomicBool,
    location: &Location,
    items: Vec<CatalogEntry>,
    mut sources: Sources,
    tx: &Sender<LoadMessage>,
) {
    let live = || !cancel.load(Ordering::Relaxed);
    let send = |event: LoadEvent| {
        if tx.send(LoadMessage { session, event }).is_err() {
            log::debug!("session {}: receiver gone", session);
            return false;
        }
        true
    };

    let t = Instant::now();
    let pano = sources.panorama.load(location);
    log::info!("session {}: panorama fetched in {:?}", session, t.elapsed());
    let Some(pano_id) = pano.as_ref().ok().map(|p| p.pano_id.clone()) else {
        send(LoadEvent::Panorama(pano));
        return;
    };
    if !live() || !send(LoadEvent::Panorama(pano)) {
        return;
    }

    let t = Instant::now();
    let depth = sources.depth.load_depth(&pano_id);
    log::info!("session {}: depth fetched in {:?}", session, t.elapsed());
    let depth_ok = depth.is_ok();
    if !live() || !send(LoadEvent::Depth(depth)) || !depth_ok {
        return;
    }

    let t = Instant::now();
    let connected = Cell::new(true);
    load_sequentially(
        sources.models.as_mut(),
        items,
        || connected.get() && live(),
        |item| connected.set(send(LoadEvent::Model(item))),
    );
    if connected.get() && live() {
        send(LoadEvent::ModelsDone);
        log::info!("session {}: models fetched in {:?}", session, t.elapsed());
    }
}
