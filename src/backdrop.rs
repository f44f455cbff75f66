// backdrop.rs - the sky and ground box around the panorama sphere
//
// The sphere band is open above 0.1 pi and below 0.75 pi, so the box is what
// shows through at the top and bottom of the view. Walls and lid carry the sky
// tile, the floor carries the ground tile. The ground tile repeats twice as
// densely when the panorama came without depth data.

use image::{Rgba, RgbaImage};
use std::path::Path;

/// Width, height and depth of the box.
pub const BACKDROP_SIZE: [f32; 3] = [3000.0, 2000.0, 3000.0];
/// The floor sits just under the camera.
pub const BACKDROP_CENTER_Y: f32 = 980.0;

pub const WALL_REPEAT: [f32; 2] = [25.0, 17.0];
pub const SKY_REPEAT: f32 = 25.0;
pub const GROUND_REPEAT_DEPTH: f32 = 200.0;
pub const GROUND_REPEAT_FLAT: f32 = 400.0;

pub const TILE_SIZE: u32 = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Face {
    Wall,
    Sky,
    Ground,
}

impl Face {
    /// Shader-side face id.
    pub fn code(self) -> u32 {
        match self {
            Face::Wall => 0,
            Face::Sky => 1,
            Face::Ground => 2,
        }
    }
}

/// Ground tiling for a panorama, by whether its depth data decoded.
pub fn ground_repeat(has_depth: bool) -> f32 {
    if has_depth {
        GROUND_REPEAT_DEPTH
    } else {
        GROUND_REPEAT_FLAT
    }
}

#[derive(Debug, Clone)]
pub struct BackdropMesh {
    pub positions: Vec<[f32; 3]>,
    /// 0..1 across each face; the shader applies the face's repeat.
    pub uvs: Vec<[f32; 2]>,
    pub faces: Vec<Face>,
    pub indices: Vec<u32>,
}

/// Six quads, four vertices each, in +X -X +Y -Y +Z -Z order.
pub fn build_backdrop() -> BackdropMesh {
    let [hx, hy, hz] = BACKDROP_SIZE.map(|s| s * 0.5);
    let cy = BACKDROP_CENTER_Y;

    // corner order per face: (u0,v0) (u1,v0) (u0,v1) (u1,v1)
    let quads: [(Face, [[f32; 3]; 4]); 6] = [
        (Face::Wall, [[hx, hy, hz], [hx, hy, -hz], [hx, -hy, hz], [hx, -hy, -hz]]),
        (Face::Wall, [[-hx, hy, -hz], [-hx, hy, hz], [-hx, -hy, -hz], [-hx, -hy, hz]]),
        (Face::Sky, [[-hx, hy, -hz], [hx, hy, -hz], [-hx, hy, hz], [hx, hy, hz]]),
        (Face::Ground, [[-hx, -hy, hz], [hx, -hy, hz], [-hx, -hy, -hz], [hx, -hy, -hz]]),
        (Face::Wall, [[-hx, hy, hz], [hx, hy, hz], [-hx, -hy, hz], [hx, -hy, hz]]),
        (Face::Wall, [[hx, hy, -hz], [-hx, hy, -hz], [hx, -hy, -hz], [-hx, -hy, -hz]]),
    ];
    let corner_uvs = [[0.0, 1.0], [1.0, 1.0], [0.0, 0.0], [1.0, 0.0]];

    let mut mesh = BackdropMesh {
        positions: Vec::with_capacity(24),
        uvs: Vec::with_capacity(24),
        faces: Vec::with_capacity(24),
        indices: Vec::with_capacity(36),
    };
    for (face, corners) in quads {
        let base = mesh.positions.len() as u32;
        for (p, uv) in corners.iter().zip(corner_uvs) {
            mesh.positions.push([p[0], p[1] + cy, p[2]]);
            mesh.uvs.push(uv);
            mesh.faces.push(face);
        }
        mesh.indices
            .extend_from_slice(&[base, base + 2, base + 1, base + 2, base + 3, base + 1]);
    }
    mesh
}

/// Cheap integer hash for tile grain.
fn grain(x: u32, y: u32) -> u8 {
    let mut h = x.wrapping_mul(374_761_393) ^ y.wrapping_mul(668_265_263);
    h = (h ^ (h >> 13)).wrapping_mul(1_274_126_177);
    (h >> 24) as u8
}

/// Pale blue with a little grain.
pub fn generated_sky_tile() -> RgbaImage {
    RgbaImage::from_fn(TILE_SIZE, TILE_SIZE, |x, y| {
        let g = grain(x, y) / 32;
        Rgba([176 + g, 208 + g, 236 + g / 2, 255])
    })
}

/// Dark gray plate with a lighter seam along two edges.
pub fn generated_ground_tile() -> RgbaImage {
    RgbaImage::from_fn(TILE_SIZE, TILE_SIZE, |x, y| {
        let v = if x == 0 || y == 0 {
            92
        } else {
            60 + grain(x, y) / 24
        };
        Rgba([v, v, v, 255])
    })
}

#[derive(Debug, Clone)]
pub struct BackdropTiles {
    pub sky: RgbaImage,
    pub ground: RgbaImage,
}

impl Default for BackdropTiles {
    fn default() -> Self {
        Self {
            sky: generated_sky_tile(),
            ground: generated_ground_tile(),
        }
    }
}

impl BackdropTiles {
    /// Uses `textures/sky.*` and `textures/ground.*` from a pack when present.
    pub fn from_pack(root: &Path) -> Self {
        let generated = Self::default();
        Self {
            sky: load_tile(root, "sky").unwrap_or(generated.sky),
            ground: load_tile(root, "ground").unwrap_or(generated.ground),
        }
    }
}

fn load_tile(root: &Path, name: &str) -> Option<RgbaImage> {
    let path = ["png", "jpg"]
        .iter()
        .map(|ext| root.join("textures").join(format!("{name}.{ext}")))
        .find(|p| p.is_file())?;
    match image::open(&path) {
        Ok(img) => {
            log::debug!("{} tile from {}", name, path.display());
            Some(img.to_rgba8())
        }
        Err(e) => {
            log::warn!("cannot read {}: {}, using the built-in tile", path.display(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{build_sphere, PANORAMA_BAND, PANORAMA_OFFSET_Y};
    use crate::orbit::FAR;

    #[test]
    fn box_has_six_quads_with_sky_on_top_and_ground_below() {
        let m = build_backdrop();
        assert_eq!(m.positions.len(), 24);
        assert_eq!(m.indices.len(), 36);
        assert!(m.indices.iter().all(|&i| (i as usize) < m.positions.len()));

        let ys = |face: Face| -> Vec<f32> {
            m.faces
                .iter()
                .zip(&m.positions)
                .filter(|(f, _)| **f == face)
                .map(|(_, p)| p[1])
                .collect()
        };
        assert!(ys(Face::Sky).iter().all(|&y| y == 1980.0));
        assert!(ys(Face::Ground).iter().all(|&y| y == -20.0));
        assert_eq!(ys(Face::Wall).len(), 16);
    }

    #[test]
    fn box_encloses_the_sphere_and_stays_inside_the_far_plane() {
        let sphere = build_sphere(&PANORAMA_BAND, PANORAMA_OFFSET_Y);
        let top = sphere.positions.iter().map(|p| p[1]).fold(f32::MIN, f32::max);
        assert!(top < 1980.0);
        assert!(sphere
            .positions
            .iter()
            .all(|p| p[0].abs() < 1500.0 && p[2].abs() < 1500.0));

        for p in build_backdrop().positions {
            let d = (p[0] * p[0] + p[1] * p[1] + p[2] * p[2]).sqrt();
            assert!(d < FAR, "{p:?} at {d}");
        }
    }

    #[test]
    fn ground_tiles_twice_as_densely_without_depth() {
        assert_eq!(ground_repeat(true), 200.0);
        assert_eq!(ground_repeat(false), 400.0);
    }

    #[test]
    fn generated_tiles_are_sky_light_and_ground_dark() {
        let tiles = BackdropTiles::default();
        assert_eq!(tiles.sky.dimensions(), (TILE_SIZE, TILE_SIZE));
        assert_eq!(tiles.ground.dimensions(), (TILE_SIZE, TILE_SIZE));
        let luma = |img: &RgbaImage| {
            img.pixels().map(|p| p[0] as u64 + p[1] as u64 + p[2] as u64).sum::<u64>()
        };
        assert!(luma(&tiles.sky) > 2 * luma(&tiles.ground));
    }

    #[test]
    fn pack_tiles_override_the_generated_ones() {
        let dir = tempfile::tempdir().unwrap();
        let textures = dir.path().join("textures");
        std::fs::create_dir_all(&textures).unwrap();
        RgbaImage::from_pixel(4, 4, Rgba([255, 0, 0, 255]))
            .save(textures.join("ground.png"))
            .unwrap();
        std::fs::write(textures.join("sky.png"), b"not an image").unwrap();

        let tiles = BackdropTiles::from_pack(dir.path());
        assert_eq!(tiles.ground.dimensions(), (4, 4));
        assert_eq!(tiles.ground.get_pixel(0, 0), &Rgba([255, 0, 0, 255]));
        // unreadable file falls back
        assert_eq!(tiles.sky, generated_sky_tile());
    }
}
