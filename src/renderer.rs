// renderer.rs - sky box, panorama sphere, decorative models and the egui overlay

use glam::{Mat4, Vec3};
use image::RgbaImage;
use std::sync::Arc;
use streetview_bricks::backdrop::{build_backdrop, BackdropTiles, SKY_REPEAT, WALL_REPEAT};
use streetview_bricks::mesh::{build_sphere, PANORAMA_BAND, PANORAMA_OFFSET_Y};
use streetview_bricks::nav::Nav;
use streetview_bricks::placement::DecorativeScene;
use streetview_bricks::session::TextureSet;
use streetview_bricks::{Session, SessionId};
use wgpu::util::DeviceExt;
use winit::window::Window;

const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
const MARKER_SIZE: f32 = 12.0;
const MARKER_COLOR: [f32; 4] = [1.0, 0.82, 0.1, 1.0];

#[derive(Debug, thiserror::Error)]
pub enum RendererError {
    #[error("cannot create surface: {0}")]
    Surface(#[from] wgpu::CreateSurfaceError),
    #[error("no compatible GPU adapter")]
    NoAdapter,
    #[error("cannot open GPU device: {0}")]
    Device(#[from] wgpu::RequestDeviceError),
}

#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct CameraUniform {
    view_proj: [[f32; 4]; 4],
    flags: [u32; 4],
    // wall u, wall v, sky, ground
    tiling: [f32; 4],
}

#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct SphereVertex {
    position: [f32; 3],
    uv: [f32; 2],
}

impl SphereVertex {
    const ATTRIBS: [wgpu::VertexAttribute; 2] =
        wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x2];

    fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Self>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBS,
        }
    }
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct BackdropVertex {
    pub position: [f32; 3],
    pub uv: [f32; 2],
    pub face: u32,
}

impl BackdropVertex {
    const ATTRIBS: [wgpu::VertexAttribute; 3] =
        wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x2, 2 => Uint32];

    fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Self>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBS,
        }
    }
}

pub fn backdrop_vertices() -> (Vec<BackdropVertex>, Vec<u32>) {
    let mesh = build_backdrop();
    let vertices = mesh
        .positions
        .iter()
        .zip(&mesh.uvs)
        .zip(&mesh.faces)
        .map(|((p, uv), face)| BackdropVertex {
            position: *p,
            uv: *uv,
            face: face.code(),
        })
        .collect();
    (vertices, mesh.indices)
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ModelVertex {
    pub position: [f32; 3],
    pub color: [f32; 4],
}

impl ModelVertex {
    const ATTRIBS: [wgpu::VertexAttribute; 2] =
        wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x4];

    fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Self>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBS,
        }
    }
}

/// LDraw color codes used by the catalog; anything else draws light gray.
pub fn ldraw_color(code: u32) -> [f32; 4] {
    match code {
        0 => [0.13, 0.13, 0.13, 1.0],
        1 => [0.0, 0.33, 0.75, 1.0],
        2 => [0.0, 0.52, 0.16, 1.0],
        4 => [0.79, 0.1, 0.04, 1.0],
        14 => [0.95, 0.8, 0.18, 1.0],
        15 => [0.96, 0.96, 0.96, 1.0],
        _ => [0.63, 0.65, 0.64, 1.0],
    }
}

fn push_triangle(out: &mut Vec<ModelVertex>, tri: [Vec3; 3], color: [f32; 4]) {
    let n = (tri[1] - tri[0]).cross(tri[2] - tri[0]).normalize_or_zero();
    let shade = 0.6 + 0.4 * n.dot(Vec3::new(0.3, 0.8, 0.5).normalize()).abs();
    let color = [color[0] * shade, color[1] * shade, color[2] * shade, color[3]];
    out.extend(tri.iter().map(|p| ModelVertex {
        position: p.to_array(),
        color,
    }));
}

/// Flattens placed models and link markers into one world-space triangle list.
pub fn model_vertices(scene: &DecorativeScene, nav: &Nav) -> Vec<ModelVertex> {
    let mut out = Vec::new();

    for placed in scene.placed() {
        let m = placed.transform.matrix();
        let color = ldraw_color(placed.color);
        let mesh = &placed.geometry;
        for face in mesh.indices.chunks_exact(3) {
            let corner = |i: u32| {
                mesh.positions
                    .get(i as usize)
                    .map(|p| m.transform_point3(Vec3::from_array(*p)))
            };
            if let (Some(a), Some(b), Some(c)) = (corner(face[0]), corner(face[1]), corner(face[2])) {
                push_triangle(&mut out, [a, b, c], color);
            }
        }
    }

    // octahedron per marker
    let axes = [Vec3::X, Vec3::Y, Vec3::Z];
    for marker in nav.markers() {
        let c = marker.position;
        for sx in [-1.0, 1.0] {
            for sy in [-1.0, 1.0] {
                for sz in [-1.0, 1.0] {
                    let tri = [
                        c + axes[0] * sx * MARKER_SIZE,
                        c + axes[1] * sy * MARKER_SIZE,
                        c + axes[2] * sz * MARKER_SIZE,
                    ];
                    push_triangle(&mut out, tri, MARKER_COLOR);
                }
            }
        }
    }
    out
}

struct GpuTexture {
    _texture: wgpu::Texture,
    view: wgpu::TextureView,
}

/// What is currently uploaded, so `sync` only touches the GPU on change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Uploaded {
    session: SessionId,
    generation: u64,
}

pub struct Renderer {
    surface: wgpu::Surface,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    pub size: winit::dpi::PhysicalSize<u32>,

    backdrop_pipeline: wgpu::RenderPipeline,
    sphere_pipeline: wgpu::RenderPipeline,
    model_pipeline: wgpu::RenderPipeline,
    depth_view: wgpu::TextureView,

    backdrop_vertices: wgpu::Buffer,
    backdrop_indices: wgpu::Buffer,
    backdrop_index_count: u32,
    backdrop_layout: wgpu::BindGroupLayout,
    backdrop_bind_group: wgpu::BindGroup,
    tile_sampler: wgpu::Sampler,
    sky: GpuTexture,
    ground: GpuTexture,

    sphere_vertices: wgpu::Buffer,
    sphere_indices: wgpu::Buffer,
    sphere_index_count: u32,
    model_buffer: Option<(wgpu::Buffer, u32)>,

    bind_group_layout: wgpu::BindGroupLayout,
    bind_group: wgpu::BindGroup,
    sampler: wgpu::Sampler,
    diffuse: GpuTexture,
    normal: GpuTexture,
    depth: GpuTexture,

    camera_uniform: CameraUniform,
    camera_buffer: wgpu::Buffer,

    textures_uploaded: Option<Uploaded>,
    models_uploaded: Option<(Uploaded, usize)>,

    pub egui_ctx: egui::Context,
    pub egui_state: egui_winit::State,
    egui_renderer: egui_wgpu::Renderer,
}

impl Renderer {
    pub async fn new(window: Arc<Window>) -> Result<Self, RendererError> {
        let size = window.inner_size();
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let surface = unsafe { instance.create_surface(window.as_ref()) }?;
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or(RendererError::NoAdapter)?;
        log::info!("using adapter {:?}", adapter.get_info().name);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    features: wgpu::Features::empty(),
                    limits: if cfg!(target_arch = "wasm32") {
                        wgpu::Limits::downlevel_webgl2_defaults()
                    } else {
                        wgpu::Limits::default().using_resolution(adapter.limits())
                    },
                    label: None,
                },
                None,
            )
            .await?;

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .or_else(|| surface_caps.formats.first().copied())
            .unwrap_or(wgpu::TextureFormat::Bgra8UnormSrgb);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode: surface_caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
        };
        surface.configure(&device, &config);
        let depth_view = create_depth_view(&device, &config);

        // --- Sphere geometry ---
        let sphere = build_sphere(&PANORAMA_BAND, PANORAMA_OFFSET_Y);
        let vertices: Vec<SphereVertex> = sphere
            .positions
            .iter()
            .zip(&sphere.uvs)
            .map(|(p, uv)| SphereVertex {
                position: *p,
                uv: *uv,
            })
            .collect();
        let sphere_vertices = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Sphere Vertices"),
            contents: bytemuck::cast_slice(&vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let sphere_indices = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Sphere Indices"),
            contents: bytemuck::cast_slice(&sphere.indices),
            usage: wgpu::BufferUsages::INDEX,
        });

        let (backdrop, backdrop_index_list) = backdrop_vertices();
        let backdrop_vertices = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Backdrop Vertices"),
            contents: bytemuck::cast_slice(&backdrop),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let backdrop_indices = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Backdrop Indices"),
            contents: bytemuck::cast_slice(&backdrop_index_list),
            usage: wgpu::BufferUsages::INDEX,
        });

        // --- Textures: neutral 1x1 placeholders until a panorama arrives ---
        let diffuse = upload_texture(
            &device,
            &queue,
            &RgbaImage::from_pixel(1, 1, image::Rgba([40, 40, 40, 255])),
            wgpu::TextureFormat::Rgba8UnormSrgb,
            "diffuse_texture",
        );
        let normal = placeholder(&device, &queue, [128, 128, 255, 255], "normal_texture");
        let depth = placeholder(&device, &queue, [0, 0, 0, 255], "depth_texture");

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        // --- Uniforms ---
        let camera_uniform = CameraUniform {
            view_proj: Mat4::IDENTITY.to_cols_array_2d(),
            flags: [0; 4],
            tiling: tiling(TextureSet::default().ground_repeat),
        };
        let camera_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Camera Buffer"),
            contents: bytemuck::cast_slice(&[camera_uniform]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let texture_entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                multisampled: false,
                view_dimension: wgpu::TextureViewDimension::D2,
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
            },
            count: None,
        };
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                texture_entry(1),
                texture_entry(2),
                texture_entry(3),
                wgpu::BindGroupLayoutEntry {
                    binding: 4,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
            label: Some("scene_bind_group_layout"),
        });
        let bind_group = create_bind_group(
            &device,
            &bind_group_layout,
            &camera_buffer,
            [&diffuse.view, &normal.view, &depth.view],
            &sampler,
        );

        // --- Backdrop tiles: built-in until a pack provides its own ---
        let tile_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            address_mode_w: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });
        let backdrop_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            entries: &[
                texture_entry(0),
                texture_entry(1),
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
            label: Some("backdrop_bind_group_layout"),
        });
        let tiles = BackdropTiles::default();
        let sky = upload_texture(
            &device,
            &queue,
            &tiles.sky,
            wgpu::TextureFormat::Rgba8UnormSrgb,
            "sky_tile",
        );
        let ground = upload_texture(
            &device,
            &queue,
            &tiles.ground,
            wgpu::TextureFormat::Rgba8UnormSrgb,
            "ground_tile",
        );
        let backdrop_bind_group = create_backdrop_bind_group(
            &device,
            &backdrop_layout,
            [&sky.view, &ground.view],
            &tile_sampler,
        );

        // --- Pipelines ---
        let shader = device.create_shader_module(wgpu::include_wgsl!("shader_streetview.wgsl"));
        let scene_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Scene Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        let backdrop_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Backdrop Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout, &backdrop_layout],
            push_constant_ranges: &[],
        });
        let pipeline = |label: &str,
                        layout: &wgpu::PipelineLayout,
                        (vs, fs): (&str, &str),
                        buffer: wgpu::VertexBufferLayout<'static>,
                        depth_write: bool| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(layout),
                vertex: wgpu::VertexState {
                    module: &shader,
                    entry_point: vs,
                    buffers: &[buffer],
                },
                fragment: Some(wgpu::FragmentState {
                    module: &shader,
                    entry_point: fs,
                    targets: &[Some(wgpu::ColorTargetState {
                        format: config.format,
                        blend: Some(wgpu::BlendState::REPLACE),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    strip_index_format: None,
                    front_face: wgpu::FrontFace::Ccw,
                    // seen from inside, and models are not guaranteed closed
                    cull_mode: None,
                    polygon_mode: wgpu::PolygonMode::Fill,
                    unclipped_depth: false,
                    conservative: false,
                },
                // the backdrop is drawn first and never occludes
                depth_stencil: Some(wgpu::DepthStencilState {
                    format: DEPTH_FORMAT,
                    depth_write_enabled: depth_write,
                    depth_compare: if depth_write {
                        wgpu::CompareFunction::Less
                    } else {
                        wgpu::CompareFunction::Always
                    },
                    stencil: wgpu::StencilState::default(),
                    bias: wgpu::DepthBiasState::default(),
                }),
                multisample: wgpu::MultisampleState {
                    count: 1,
                    mask: !0,
                    alpha_to_coverage_enabled: false,
                },
                multiview: None,
            })
        };
        let backdrop_pipeline = pipeline(
            "Backdrop Pipeline",
            &backdrop_pipeline_layout,
            ("vs_backdrop", "fs_backdrop"),
            BackdropVertex::layout(),
            false,
        );
        let sphere_pipeline = pipeline(
            "Sphere Pipeline",
            &scene_layout,
            ("vs_sphere", "fs_sphere"),
            SphereVertex::layout(),
            true,
        );
        let model_pipeline = pipeline(
            "Model Pipeline",
            &scene_layout,
            ("vs_model", "fs_model"),
            ModelVertex::layout(),
            true,
        );

        // --- Egui ---
        let egui_ctx = egui::Context::default();
        crate::fonts::install(&egui_ctx);
        let mut egui_state = egui_winit::State::new(window.as_ref());
        egui_state.set_pixels_per_point(window.scale_factor() as f32);
        let egui_renderer = egui_wgpu::Renderer::new(&device, config.format, None, 1);

        Ok(Self {
            surface,
            device,
            queue,
            config,
            size,
            backdrop_pipeline,
            sphere_pipeline,
            model_pipeline,
            depth_view,
            backdrop_vertices,
            backdrop_indices,
            backdrop_index_count: backdrop_index_list.len() as u32,
            backdrop_layout,
            backdrop_bind_group,
            tile_sampler,
            sky,
            ground,
            sphere_vertices,
            sphere_indices,
            sphere_index_count: sphere.indices.len() as u32,
            model_buffer: None,
            bind_group_layout,
            bind_group,
            sampler,
            diffuse,
            normal,
            depth,
            camera_uniform,
            camera_buffer,
            textures_uploaded: None,
            models_uploaded: None,
            egui_ctx,
            egui_state,
            egui_renderer,
        })
    }

    pub fn resize(&mut self, new_size: winit::dpi::PhysicalSize<u32>) {
        if new_size.width > 0 && new_size.height > 0 {
            self.size = new_size;
            self.config.width = new_size.width;
            self.config.height = new_size.height;
            self.surface.configure(&self.device, &self.config);
            self.depth_view = create_depth_view(&self.device, &self.config);
        }
    }

    /// Replaces the sky and ground tiles, e.g. after switching packs.
    pub fn set_backdrop(&mut self, tiles: &BackdropTiles) {
        self.sky = upload_texture(
            &self.device,
            &self.queue,
            &tiles.sky,
            wgpu::TextureFormat::Rgba8UnormSrgb,
            "sky_tile",
        );
        self.ground = upload_texture(
            &self.device,
            &self.queue,
            &tiles.ground,
            wgpu::TextureFormat::Rgba8UnormSrgb,
            "ground_tile",
        );
        self.backdrop_bind_group = create_backdrop_bind_group(
            &self.device,
            &self.backdrop_layout,
            [&self.sky.view, &self.ground.view],
            &self.tile_sampler,
        );
    }

    /// Pulls camera, textures and models from the session onto the GPU.
    pub fn sync(&mut self, session: &Session) {
        let textures = session.textures();
        let key = Uploaded {
            session: session.id(),
            generation: textures.generation(),
        };
        if self.textures_uploaded != Some(key) {
            self.upload_textures(textures);
            self.textures_uploaded = Some(key);
        }

        let key = (
            Uploaded {
                session: session.id(),
                generation: session.scene().generation(),
            },
            session.nav().markers().len(),
        );
        if self.models_uploaded != Some(key) {
            let vertices = model_vertices(session.scene(), session.nav());
            log::debug!("uploading {} model vertices", vertices.len());
            self.model_buffer = (!vertices.is_empty()).then(|| {
                let buffer = self
                    .device
                    .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                        label: Some("Model Vertices"),
                        contents: bytemuck::cast_slice(&vertices),
                        usage: wgpu::BufferUsages::VERTEX,
                    });
                (buffer, vertices.len() as u32)
            });
            self.models_uploaded = Some(key);
        }

        self.camera_uniform.view_proj = session.orbit().view_proj().to_cols_array_2d();
        self.queue.write_buffer(
            &self.camera_buffer,
            0,
            bytemuck::cast_slice(&[self.camera_uniform]),
        );
    }

    fn upload_textures(&mut self, set: &TextureSet) {
        self.diffuse = match &set.diffuse {
            Some(img) => {
                let img = self.fit_to_limits(img);
                upload_texture(
                    &self.device,
                    &self.queue,
                    &img,
                    wgpu::TextureFormat::Rgba8UnormSrgb,
                    "panorama_texture",
                )
            }
            None => upload_texture(
                &self.device,
                &self.queue,
                &RgbaImage::from_pixel(1, 1, image::Rgba([40, 40, 40, 255])),
                wgpu::TextureFormat::Rgba8UnormSrgb,
                "diffuse_texture",
            ),
        };
        self.normal = match &set.normal {
            Some(img) => upload_texture(
                &self.device,
                &self.queue,
                img,
                wgpu::TextureFormat::Rgba8Unorm,
                "normal_texture",
            ),
            None => placeholder(&self.device, &self.queue, [128, 128, 255, 255], "normal_texture"),
        };
        self.depth = match &set.depth {
            Some(img) => upload_texture(
                &self.device,
                &self.queue,
                img,
                wgpu::TextureFormat::Rgba8Unorm,
                "depth_texture",
            ),
            None => placeholder(&self.device, &self.queue, [0, 0, 0, 255], "depth_texture"),
        };
        self.camera_uniform.flags = [set.normal.is_some() as u32, set.depth.is_some() as u32, 0, 0];
        self.camera_uniform.tiling = tiling(set.ground_repeat);

        self.bind_group = create_bind_group(
            &self.device,
            &self.bind_group_layout,
            &self.camera_buffer,
            [&self.diffuse.view, &self.normal.view, &self.depth.view],
            &self.sampler,
        );
    }

    /// Scales an image down to the GPU's max texture size when needed.
    fn fit_to_limits(&self, img: &RgbaImage) -> RgbaImage {
        let max = self.device.limits().max_texture_dimension_2d;
        let (src_w, src_h) = img.dimensions();
        if src_w <= max && src_h <= max {
            return img.clone();
        }
        let scale = (max as f32 / src_w.max(src_h) as f32).min(1.0);
        let (new_w, new_h) = (
            ((src_w as f32 * scale) as u32).max(1),
            ((src_h as f32 * scale) as u32).max(1),
        );
        log::warn!(
            "panorama {}x{} exceeds GPU limit {}, scaled to {}x{}",
            src_w,
            src_h,
            max,
            new_w,
            new_h
        );
        image::imageops::resize(img, new_w, new_h, image::imageops::FilterType::Lanczos3)
    }

    pub fn render_with_ui(
        &mut self,
        window: &Window,
        run_ui: impl FnOnce(&egui::Context),
    ) -> Result<(), wgpu::SurfaceError> {
        let output = self.surface.get_current_texture()?;
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Render Encoder"),
            });

        // 1. Scene
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Scene Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: 0.1,
                            g: 0.1,
                            b: 0.1,
                            a: 1.0,
                        }),
                        store: true,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: true,
                    }),
                    stencil_ops: None,
                }),
            });

            render_pass.set_bind_group(0, &self.bind_group, &[]);

            render_pass.set_pipeline(&self.backdrop_pipeline);
            render_pass.set_bind_group(1, &self.backdrop_bind_group, &[]);
            render_pass.set_vertex_buffer(0, self.backdrop_vertices.slice(..));
            render_pass.set_index_buffer(self.backdrop_indices.slice(..), wgpu::IndexFormat::Uint32);
            render_pass.draw_indexed(0..self.backdrop_index_count, 0, 0..1);

            render_pass.set_pipeline(&self.sphere_pipeline);
            render_pass.set_vertex_buffer(0, self.sphere_vertices.slice(..));
            render_pass.set_index_buffer(self.sphere_indices.slice(..), wgpu::IndexFormat::Uint32);
            render_pass.draw_indexed(0..self.sphere_index_count, 0, 0..1);

            if let Some((buffer, count)) = &self.model_buffer {
                render_pass.set_pipeline(&self.model_pipeline);
                render_pass.set_vertex_buffer(0, buffer.slice(..));
                render_pass.draw(0..*count, 0..1);
            }
        }

        // 2. UI
        let raw_input = self.egui_state.take_egui_input(window);
        let full_output = self.egui_ctx.run(raw_input, run_ui);

        self.egui_state
            .handle_platform_output(window, &self.egui_ctx, full_output.platform_output);
        let clipped_primitives = self.egui_ctx.tessellate(full_output.shapes);

        let screen_descriptor = egui_wgpu::renderer::ScreenDescriptor {
            size_in_pixels: [self.config.width, self.config.height],
            pixels_per_point: window.scale_factor() as f32,
        };

        for (id, delta) in &full_output.textures_delta.set {
            self.egui_renderer
                .update_texture(&self.device, &self.queue, *id, delta);
        }

        self.egui_renderer.update_buffers(
            &self.device,
            &self.queue,
            &mut encoder,
            &clipped_primitives,
            &screen_descriptor,
        );

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Egui Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: true,
                    },
                })],
                depth_stencil_attachment: None,
            });
            self.egui_renderer
                .render(&mut render_pass, &clipped_primitives, &screen_descriptor);
        }

        for id in &full_output.textures_delta.free {
            self.egui_renderer.free_texture(id);
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        output.present();

        Ok(())
    }
}

fn tiling(ground_repeat: f32) -> [f32; 4] {
    [WALL_REPEAT[0], WALL_REPEAT[1], SKY_REPEAT, ground_repeat]
}

fn create_depth_view(
    device: &wgpu::Device,
    config: &wgpu::SurfaceConfiguration,
) -> wgpu::TextureView {
    device
        .create_texture(&wgpu::TextureDescriptor {
            size: wgpu::Extent3d {
                width: config.width.max(1),
                height: config.height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            label: Some("depth_buffer"),
            view_formats: &[],
        })
        .create_view(&wgpu::TextureViewDescriptor::default())
}

fn upload_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    img: &RgbaImage,
    format: wgpu::TextureFormat,
    label: &str,
) -> GpuTexture {
    let (width, height) = img.dimensions();
    let size = wgpu::Extent3d {
        width: width.max(1),
        height: height.max(1),
        depth_or_array_layers: 1,
    };
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        label: Some(label),
        view_formats: &[],
    });

    if width > 0 && height > 0 {
        queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            img.as_raw(),
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4 * width),
                rows_per_image: Some(height),
            },
            size,
        );
    }

    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    GpuTexture {
        _texture: texture,
        view,
    }
}

fn placeholder(device: &wgpu::Device, queue: &wgpu::Queue, rgba: [u8; 4], label: &str) -> GpuTexture {
    upload_texture(
        device,
        queue,
        &RgbaImage::from_pixel(1, 1, image::Rgba(rgba)),
        wgpu::TextureFormat::Rgba8Unorm,
        label,
    )
}

fn create_bind_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    camera: &wgpu::Buffer,
    [diffuse, normal, depth]: [&wgpu::TextureView; 3],
    sampler: &wgpu::Sampler,
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: camera.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::TextureView(diffuse),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: wgpu::BindingResource::TextureView(normal),
            },
            wgpu::BindGroupEntry {
                binding: 3,
                resource: wgpu::BindingResource::TextureView(depth),
            },
            wgpu::BindGroupEntry {
                binding: 4,
                resource: wgpu::BindingResource::Sampler(sampler),
            },
        ],
        label: Some("scene_bind_group"),
    })
}

fn create_backdrop_bind_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    [sky, ground]: [&wgpu::TextureView; 2],
    sampler: &wgpu::Sampler,
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(sky),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::TextureView(ground),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: wgpu::BindingResource::Sampler(sampler),
            },
        ],
        label: Some("backdrop_bind_group"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use streetview_bricks::backdrop::Face;
    use streetview_bricks::placement::{place, CatalogEntry, Layout, ModelMesh, Transform};
    use streetview_bricks::source::PanoLink;

    fn triangle() -> ModelMesh {
        ModelMesh {
            positions: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            indices: vec![0, 1, 2, 0, 1, 9],
        }
    }

    #[test]
    fn placed_models_are_baked_to_world_space() {
        let mut scene = DecorativeScene::default();
        let entry = CatalogEntry {
            name: "tri".into(),
            color: 2,
            layout: Layout::Single(Transform {
                rotation: Vec3::ZERO,
                scale: Vec3::splat(2.0),
                translation: Vec3::new(10.0, 0.0, 0.0),
            }),
        };
        scene.add(place(&entry, triangle()));

        let v = model_vertices(&scene, &Nav::default());
        // the face with an out-of-range index is dropped
        assert_eq!(v.len(), 3);
        assert_eq!(v[1].position, [12.0, 0.0, 0.0]);
        assert_eq!(v[2].position, [10.0, 2.0, 0.0]);
        assert!(v[0].color[1] > v[0].color[0]);
    }

    #[test]
    fn markers_become_octahedra() {
        let mut nav = Nav::default();
        nav.set_links(
            &[PanoLink {
                heading: 0.0,
                pano: "x".into(),
                description: String::new(),
            }],
            0.0,
        );
        let v = model_vertices(&DecorativeScene::default(), &nav);
        assert_eq!(v.len(), 8 * 3);
        assert!(v.iter().all(|p| p.color[3] == 1.0));
    }

    #[test]
    fn backdrop_vertices_carry_face_ids() {
        let (v, indices) = backdrop_vertices();
        assert_eq!(v.len(), 24);
        assert_eq!(indices.len(), 36);
        assert_eq!(v.iter().filter(|p| p.face == Face::Ground.code()).count(), 4);
        assert_eq!(v.iter().filter(|p| p.face == Face::Sky.code()).count(), 4);
        assert_eq!(std::mem::size_of::<BackdropVertex>(), 24);
    }

    #[test]
    fn ground_repeat_lands_in_the_last_tiling_slot() {
        assert_eq!(tiling(400.0), [25.0, 17.0, 25.0, 400.0]);
    }

    #[test]
    fn unknown_colors_fall_back_to_gray() {
        assert_eq!(ldraw_color(7), ldraw_color(9999));
        assert_ne!(ldraw_color(0), ldraw_color(2));
    }
}
