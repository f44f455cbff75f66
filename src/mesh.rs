// mesh.rs - the partial sphere the panorama is projected onto

#[derive(Debug, Clone)]
pub struct SphereMesh {
    pub positions: Vec<[f32; 3]>,
    pub uvs: Vec<[f32; 2]>,
    pub indices: Vec<u32>,
}

/// Sphere band parameters. `phi` runs around Y, `theta` down from +Y.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SphereBand {
    pub radius: f32,
    pub width_segments: usize,
    pub height_segments: usize,
    pub phi_start: f32,
    pub phi_length: f32,
    pub theta_start: f32,
    pub theta_length: f32,
}

/// Radius 1000, open at the very top and below the horizon band.
pub const PANORAMA_BAND: SphereBand = SphereBand {
    radius: 1000.0,
    width_segments: 80,
    height_segments: 40,
    phi_start: 0.0,
    phi_length: std::f32::consts::TAU,
    theta_start: std::f32::consts::PI * 0.1,
    theta_length: std::f32::consts::PI * 0.65,
};

/// Vertical offset of the panorama sphere (camera sits above its center).
pub const PANORAMA_OFFSET_Y: f32 = -250.0;

/// Builds the band, mirrored on X so the texture reads correctly from inside,
/// and shifted by `offset_y`.
pub fn build_sphere(band: &SphereBand, offset_y: f32) -> SphereMesh {
    let (ws, hs) = (band.width_segments.max(3), band.height_segments.max(2));
    let mut positions = Vec::with_capacity((hs + 1) * (ws + 1));
    let mut uvs = Vec::with_capacity((hs + 1) * (ws + 1));
    let mut indices = Vec::with_capacity(hs * ws * 6);

    for i in 0..=hs {
        let v = i as f32 / hs as f32;
        let theta = band.theta_start + v * band.theta_length;
        let sin_t = theta.sin();
        let y = band.radius * theta.cos() + offset_y;

        for j in 0..=ws {
            let u = j as f32 / ws as f32;
            let phi = band.phi_start + u * band.phi_length;

            // -cos(phi) mirrored by scale.x = -1
            let x = band.radius * phi.cos() * sin_t;
            let z = band.radius * phi.sin() * sin_t;

            positions.push([x, y, z]);
            uvs.push([u, 1.0 - v]);
        }
    }

    for i in 0..hs {
        for j in 0..ws {
            let a = (i * (ws + 1) + j) as u32;
            let b = a + (ws + 1) as u32;

            indices.extend_from_slice(&[a, b, a + 1, b, b + 1, a + 1]);
        }
    }

    SphereMesh {
        positions,
        uvs,
        indices,
    }
}
