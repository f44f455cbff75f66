// main.rs - window, event loop, menu and status bar

#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

mod fonts;
mod i18n;
mod renderer;

use glam::Vec2;
use renderer::Renderer;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::Instant;
use streetview_bricks::backdrop::BackdropTiles;
use streetview_bricks::config::ViewerConfig;
use streetview_bricks::loader::{self, Sources};
use streetview_bricks::placement::CarSelector;
use streetview_bricks::source::{LocalPack, Location};
use streetview_bricks::{LoadMessage, Session, Signal, Viewport};
use winit::{
    dpi::LogicalSize,
    event::*,
    event_loop::{ControlFlow, EventLoop},
    window::{Fullscreen, Window, WindowBuilder},
};

const DEFAULT_LOG_FILTER: &str = "info,wgpu_core=warn,wgpu_hal=warn,naga=warn";
/// DOM wheel units per winit line notch.
const WHEEL_LINE: f32 = 120.0;

enum UiAction {
    OpenPack(PathBuf),
    Reload,
    ResetView,
    Follow(String),
}

/// The active session plus what is needed to start the next one.
struct App {
    config: ViewerConfig,
    cars: CarSelector,
    session: Session,
    rx: Receiver<LoadMessage>,
    progress: f32,
}

impl App {
    fn new(config: ViewerConfig, viewport: Viewport) -> Self {
        let mut cars = CarSelector::new();
        let (session, rx) = loader::start(
            config.location(),
            viewport,
            &mut cars,
            Sources::local(LocalPack::new(&config.data_dir)),
        );
        Self {
            config,
            cars,
            session,
            rx,
            progress: 0.0,
        }
    }

    /// Ends the current session and starts loading `location`.
    fn open(&mut self, location: Location) {
        let viewport = self.session.orbit().viewport();
        self.session.end();
        let (session, rx) = loader::start(
            location,
            viewport,
            &mut self.cars,
            Sources::local(LocalPack::new(&self.config.data_dir)),
        );
        self.session = session;
        self.rx = rx;
        self.progress = 0.0;
    }

    fn reload(&mut self) {
        let location = match self.session.pano_id() {
            Some(id) => Location::PanoId(id.to_string()),
            None => self.session.location().clone(),
        };
        self.open(location);
    }

    /// Applies pending load results and reacts to the session's signals.
    fn pump(&mut self) {
        while let Ok(msg) = self.rx.try_recv() {
            self.session.handle(msg);
        }

        let mut follow = None;
        for signal in self.session.drain_signals() {
            match signal {
                Signal::Progress(p) => self.progress = p,
                Signal::LoadComplete => {
                    log::info!("{} ready", self.session.location());
                }
                Signal::LinkClicked { pano, description } => {
                    log::info!("following link to {} ({})", pano, description);
                    follow = Some(pano);
                }
            }
        }
        if let Some(pano) = follow {
            self.open(Location::PanoId(pano));
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(DEFAULT_LOG_FILTER))
        .init();

    let config = ViewerConfig::from_env();
    log::info!("panorama pack: {}", config.data_dir.display());
    let mut current_lang = config.lang.clone();
    i18n::init(current_lang.clone());

    let event_loop = EventLoop::new();
    let window = match WindowBuilder::new()
        .with_title(i18n::tr("app.title"))
        .with_inner_size(LogicalSize::new(1280, 720))
        .build(&event_loop)
    {
        Ok(w) => Arc::new(w),
        Err(e) => {
            log::error!("cannot create window: {}", e);
            return;
        }
    };

    let mut renderer = match pollster::block_on(Renderer::new(window.clone())) {
        Ok(r) => r,
        Err(e) => {
            log::error!("{}", e);
            return;
        }
    };

    renderer.set_backdrop(&BackdropTiles::from_pack(&config.data_dir));
    let mut app = App::new(config, viewport_of(renderer.size));
    let mut cursor = Vec2::ZERO;
    let mut touches: HashMap<u64, Vec2> = HashMap::new();

    event_loop.run(move |event, _, control_flow| {
        *control_flow = ControlFlow::Poll;

        match event {
            Event::WindowEvent { event, .. } => {
                let response = renderer.egui_state.on_event(&renderer.egui_ctx, &event);
                if response.consumed {
                    return;
                }

                match event {
                    WindowEvent::CloseRequested => {
                        *control_flow = ControlFlow::Exit;
                    }

                    WindowEvent::Resized(new_size) => {
                        renderer.resize(new_size);
                        app.session.resize(viewport_of(renderer.size));
                    }

                    WindowEvent::KeyboardInput { input, .. } => {
                        if input.state == ElementState::Pressed {
                            match input.virtual_keycode {
                                Some(VirtualKeyCode::O) => {
                                    if let Some(dir) = pick_pack_folder() {
                                        apply(&mut app, &mut renderer, UiAction::OpenPack(dir));
                                    }
                                }
                                Some(VirtualKeyCode::R) => {
                                    apply(&mut app, &mut renderer, UiAction::ResetView)
                                }
                                Some(VirtualKeyCode::F5) => {
                                    apply(&mut app, &mut renderer, UiAction::Reload)
                                }
                                Some(VirtualKeyCode::F11) => toggle_fullscreen(&window),
                                _ => {}
                            }
                        }
                    }

                    WindowEvent::CursorMoved { position, .. } => {
                        cursor = Vec2::new(position.x as f32, position.y as f32);
                        app.session.pointer_move(cursor);
                    }

                    WindowEvent::MouseInput {
                        state,
                        button: MouseButton::Left,
                        ..
                    } => match state {
                        ElementState::Pressed => app.session.pointer_down(cursor, Instant::now()),
                        ElementState::Released => app.session.pointer_up(Instant::now()),
                    },

                    WindowEvent::Touch(touch) => {
                        let pos = Vec2::new(touch.location.x as f32, touch.location.y as f32);
                        let now = Instant::now();
                        match touch.phase {
                            TouchPhase::Started => {
                                touches.insert(touch.id, pos);
                                app.session.touch_start(&active(&touches), now);
                            }
                            TouchPhase::Moved => {
                                touches.insert(touch.id, pos);
                                app.session.touch_move(&active(&touches));
                            }
                            TouchPhase::Ended | TouchPhase::Cancelled => {
                                touches.remove(&touch.id);
                                app.session.touch_end(now);
                            }
                        }
                    }

                    WindowEvent::MouseWheel { delta, .. } => {
                        let delta_y = match delta {
                            MouseScrollDelta::LineDelta(_, y) => y * WHEEL_LINE,
                            MouseScrollDelta::PixelDelta(pos) => pos.y as f32,
                        };
                        app.session.wheel(delta_y);
                    }

                    WindowEvent::DroppedFile(path) if path.is_dir() => {
                        apply(&mut app, &mut renderer, UiAction::OpenPack(path));
                    }

                    _ => {}
                }
            }

            Event::RedrawRequested(_) => {
                app.pump();
                app.session.frame();
                renderer.sync(&app.session);

                let mut action = None;
                let render_result = renderer.render_with_ui(&window, |ctx| {
                    draw_ui(ctx, &app, &mut action, &window, &mut current_lang);
                });
                if let Some(action) = action {
                    apply(&mut app, &mut renderer, action);
                }

                match render_result {
                    Ok(_) => {}
                    Err(wgpu::SurfaceError::Lost) => renderer.resize(renderer.size),
                    Err(wgpu::SurfaceError::OutOfMemory) => *control_flow = ControlFlow::Exit,
                    Err(e) => log::warn!("render error: {:?}", e),
                }
            }

            Event::MainEventsCleared => {
                window.request_redraw();
            }

            _ => {}
        }
    });
}

fn viewport_of(size: winit::dpi::PhysicalSize<u32>) -> Viewport {
    Viewport::new(size.width as f32, size.height as f32)
}

/// Current touch points in a stable order.
fn active(touches: &HashMap<u64, Vec2>) -> Vec<Vec2> {
    let mut ids: Vec<_> = touches.iter().collect();
    ids.sort_by_key(|(id, _)| **id);
    ids.into_iter().map(|(_, p)| *p).collect()
}

fn apply(app: &mut App, renderer: &mut Renderer, action: UiAction) {
    match action {
        UiAction::OpenPack(dir) => {
            log::info!("opening panorama pack {}", dir.display());
            renderer.set_backdrop(&BackdropTiles::from_pack(&dir));
            app.config.data_dir = dir;
            let location = app.config.location();
            app.open(location);
        }
        UiAction::Reload => app.reload(),
        UiAction::ResetView => app.session.reset_view(),
        UiAction::Follow(pano) => app.open(Location::PanoId(pano)),
    }
}

fn pick_pack_folder() -> Option<PathBuf> {
    rfd::FileDialog::new()
        .set_title(&i18n::tr("menu.open_pack"))
        .pick_folder()
}

fn toggle_fullscreen(window: &Window) {
    if window.fullscreen().is_some() {
        window.set_fullscreen(None);
    } else {
        window.set_fullscreen(Some(Fullscreen::Borderless(None)));
    }
}

fn draw_ui(
    ctx: &egui::Context,
    app: &App,
    action: &mut Option<UiAction>,
    window: &Window,
    current_lang: &mut String,
) {
    egui::TopBottomPanel::top("menu_bar").show(ctx, |ui| {
        egui::menu::bar(ui, |ui| {
            ui.menu_button(i18n::tr("menu.file"), |ui| {
                if ui.button(i18n::tr("menu.open_pack")).clicked() {
                    ui.close_menu();
                    if let Some(dir) = pick_pack_folder() {
                        *action = Some(UiAction::OpenPack(dir));
                    }
                }
                if ui.button(i18n::tr("menu.reload")).clicked() {
                    ui.close_menu();
                    *action = Some(UiAction::Reload);
                }
                if ui.button(i18n::tr("menu.exit")).clicked() {
                    std::process::exit(0);
                }
            });

            ui.menu_button(i18n::tr("menu.view"), |ui| {
                if ui.button(i18n::tr("view.reset")).clicked() {
                    ui.close_menu();
                    *action = Some(UiAction::ResetView);
                }
            });

            ui.menu_button(i18n::tr("menu.language"), |ui| {
                for (code, name) in i18n::LANGUAGES {
                    if ui.radio_value(current_lang, code.to_string(), name).clicked() {
                        i18n::init(current_lang.clone());
                        window.set_title(&i18n::tr("app.title"));
                        ui.close_menu();
                    }
                }
            });
        });
    });

    let session = &app.session;
    egui::TopBottomPanel::bottom("status_bar").show(ctx, |ui| {
        ui.horizontal(|ui| {
            if session.is_ready() {
                ui.label(i18n::tr("status.ready"));
            } else {
                ui.label(
                    egui::RichText::new(i18n::tr_with(
                        "status.loading",
                        &[("percent", format!("{:.0}", app.progress * 100.0))],
                    ))
                    .color(egui::Color32::YELLOW),
                );
            }
            ui.label("|");

            match session.pano_id() {
                Some(id) => ui.label(format!("{} {}", i18n::tr("status.pano_prefix"), id)),
                None => ui.label(i18n::tr("status.no_panorama")),
            };
            ui.label("|");

            let orbit = session.orbit();
            let state = orbit.state();
            ui.label(format!("Lon: {:.1}°", state.lon));
            ui.label("|");
            ui.label(format!("Lat: {:.1}°", state.lat));
            ui.label("|");
            ui.label(format!("FOV: {:.1}°", orbit.fov()));
            ui.label("|");
            ui.label(i18n::tr_with(
                "status.models",
                &[("count", session.scene().placed().len().to_string())],
            ));
        });
    });

    if session.is_ready() && !session.links().is_empty() {
        egui::Window::new(i18n::tr("status.links"))
            .anchor(egui::Align2::RIGHT_TOP, [-8.0, 32.0])
            .resizable(false)
            .collapsible(true)
            .show(ctx, |ui| {
                for link in session.links() {
                    let label = if link.description.is_empty() {
                        link.pano.clone()
                    } else {
                        link.description.clone()
                    };
                    if ui
                        .button(i18n::tr_with("status.link", &[("description", label)]))
                        .clicked()
                    {
                        *action = Some(UiAction::Follow(link.pano.clone()));
                    }
                }
            });
    }
}
