// placement.rs - decorative brick models dressed around the viewer
//
// A small fixed catalog is loaded one model at a time. Each loaded mesh is
// cloned into one or more placements; the clones share the geometry.

use crate::source::{LocalPack, SourceError};
use glam::{EulerRot, Mat4, Quat, Vec3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use std::f32::consts::PI;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    /// Euler angles in radians, XYZ order.
    pub rotation: Vec3,
    pub scale: Vec3,
    pub translation: Vec3,
}

impl Transform {
    pub fn matrix(&self) -> Mat4 {
        let r = self.rotation;
        Mat4::from_scale_rotation_translation(
            self.scale,
            Quat::from_euler(EulerRot::XYZ, r.x, r.y, r.z),
            self.translation,
        )
    }
}

/// Triangle geometry as handed over by a model loader.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ModelMesh {
    pub positions: Vec<[f32; 3]>,
    pub indices: Vec<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOptions {
    pub draw_lines: bool,
    pub start_color: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum ModelLoadError {
    #[error("model '{0}' not found")]
    NotFound(String),

    #[error("model '{name}' is malformed: {reason}")]
    Malformed { name: String, reason: String },

    #[error(transparent)]
    Source(#[from] SourceError),
}

/// One request in flight per call; callers serialize calls to keep order.
pub trait ModelLoader: Send {
    fn load_model_by_name(
        &mut self,
        name: &str,
        options: &LoadOptions,
    ) -> Result<ModelMesh, ModelLoadError>;
}

/// Models live under `<root>/models/<name>.json`.
impl ModelLoader for LocalPack {
    fn load_model_by_name(
        &mut self,
        name: &str,
        _options: &LoadOptions,
    ) -> Result<ModelMesh, ModelLoadError> {
        let path = self.root().join("models").join(format!("{name}.json"));
        if !path.is_file() {
            return Err(ModelLoadError::NotFound(name.to_string()));
        }
        let mesh: ModelMesh = self.read_json(&path)?;

        if mesh.indices.len() % 3 != 0 {
            return Err(ModelLoadError::Malformed {
                name: name.to_string(),
                reason: format!("{} indices is not a triangle list", mesh.indices.len()),
            });
        }
        if let Some(&i) = mesh
            .indices
            .iter()
            .find(|&&i| i as usize >= mesh.positions.len())
        {
            return Err(ModelLoadError::Malformed {
                name: name.to_string(),
                reason: format!("index {i} out of {} positions", mesh.positions.len()),
            });
        }
        Ok(mesh)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Layout {
    Single(Transform),
    /// Two rows of five along the street, middle column left open.
    TreeRow,
}

impl Layout {
    pub fn transforms(&self) -> Vec<Transform> {
        match self {
            Layout::Single(t) => vec![*t],
            Layout::TreeRow => tree_row(),
        }
    }
}

pub fn tree_row() -> Vec<Transform> {
    let mut out = Vec::with_capacity(8);
    for i in 0..5 {
        for j in 0..2 {
            if i == 2 {
                continue;
            }
            out.push(Transform {
                rotation: Vec3::new(0.0, 0.0, PI),
                scale: Vec3::splat(0.2),
                translation: Vec3::new(
                    i as f32 * 100.0 - 200.0,
                    -19.0,
                    80.0 * if j == 0 { -1.0 } else { 1.0 },
                ),
            });
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub name: String,
    pub color: u32,
    pub layout: Layout,
}

impl CatalogEntry {
    pub fn options(&self) -> LoadOptions {
        LoadOptions {
            draw_lines: false,
            start_color: self.color,
        }
    }
}

pub const CAR_MODELS: [&str; 6] = [
    "jeep.ldr",
    "minicar.ldr",
    "minispeeder.ldr",
    "minitruck.ldr",
    "simplecar.mpd",
    "streetspeeder.mpd",
];

pub const TREE_MODEL: &str = "3470.dat";
pub const TREE_COLOR: u32 = 2;

/// Random car picker that never hands out the same model twice in a row.
#[derive(Debug, Clone)]
pub struct CarSelector {
    rng: StdRng,
    previous: Option<usize>,
}

impl CarSelector {
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        Self {
            rng,
            previous: None,
        }
    }

    pub fn previous(&self) -> Option<&'static str> {
        self.previous.map(|i| CAR_MODELS[i])
    }

    pub fn pick(&mut self) -> &'static str {
        let mut i = self.rng.gen_range(0..CAR_MODELS.len());
        while Some(i) == self.previous {
            i = self.rng.gen_range(0..CAR_MODELS.len());
        }
        self.previous = Some(i);
        CAR_MODELS[i]
    }
}

impl Default for CarSelector {
    fn default() -> Self {
        Self::new()
    }
}

fn car(name: &str, x: f32) -> CatalogEntry {
    CatalogEntry {
        name: name.to_string(),
        color: 0,
        layout: Layout::Single(Transform {
            rotation: Vec3::new(0.0, PI * 0.5, PI),
            scale: Vec3::splat(0.1),
            translation: Vec3::new(x, -16.0, -20.0),
        }),
    }
}

/// The per-session catalog: two random cars across the street, then the trees.
pub fn catalog(cars: &mut CarSelector) -> Vec<CatalogEntry> {
    vec![
        car(cars.pick(), 80.0),
        car(cars.pick(), -80.0),
        CatalogEntry {
            name: TREE_MODEL.to_string(),
            color: TREE_COLOR,
            layout: Layout::TreeRow,
        },
    ]
}

/// One placed clone of a loaded model.
#[derive(Debug, Clone)]
pub struct PlacedModel {
    pub model: String,
    pub color: u32,
    pub transform: Transform,
    pub geometry: Arc<ModelMesh>,
}

pub fn place(entry: &CatalogEntry, mesh: ModelMesh) -> Vec<PlacedModel> {
    let geometry = Arc::new(mesh);
    entry
        .layout
        .transforms()
        .into_iter()
        .map(|transform| PlacedModel {
            model: entry.name.clone(),
            color: entry.color,
            transform,
            geometry: Arc::clone(&geometry),
        })
        .collect()
}

/// Result of one catalog item.
#[derive(Debug)]
pub enum ItemOutcome {
    Loaded { entry: CatalogEntry, mesh: ModelMesh },
    Failed { name: String, error: ModelLoadError },
}

/// Loads `catalog` in order, one item at a time. A failed item is reported and
/// skipped. Stops early once `keep_going` says so.
pub fn load_sequentially<L: ModelLoader + ?Sized>(
    loader: &mut L,
    catalog: Vec<CatalogEntry>,
    mut keep_going: impl FnMut() -> bool,
    mut on_item: impl FnMut(ItemOutcome),
) {
    for entry in catalog {
        if !keep_going() {
            return;
        }
        match loader.load_model_by_name(&entry.name, &entry.options()) {
            Ok(mesh) => on_item(ItemOutcome::Loaded { entry, mesh }),
            Err(error) => on_item(ItemOutcome::Failed {
                name: entry.name,
                error,
            }),
        }
    }
}

/// Placed decorative instances of the active session.
#[derive(Debug, Default)]
pub struct DecorativeScene {
    placed: Vec<PlacedModel>,
    generation: u64,
}

impl DecorativeScene {
    pub fn placed(&self) -> &[PlacedModel] {
        &self.placed
    }

    /// Bumped whenever the placed set changes.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn add(&mut self, models: Vec<PlacedModel>) {
        if models.is_empty() {
            return;
        }
        self.placed.extend(models);
        self.generation += 1;
    }

    /// Removes every instance and releases its geometry. Returns how many
    /// instances were removed.
    pub fn teardown(&mut self) -> usize {
        let removed = self.placed.len();
        for model in self.placed.drain(..) {
            drop(model.geometry);
        }
        if removed > 0 {
            self.generation += 1;
        }
        removed
    }
}
