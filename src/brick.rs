// brick.rs - "close pixels" brick pixelation of the panorama textures
//
// Each cell is filled with the color found at its center. Brick rows are
// offset by half a cell so the result reads as a wall of studs. When a normal
// texture is passed along it gets the same grid, scaled to its own size, so
// the two stay aligned on the sphere.

use image::RgbaImage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Square,
    Brick,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrickPattern {
    pub shape: Shape,
    pub resolution_x: u32,
    pub resolution_y: u32,
    pub offset: [i32; 2],
}

/// The single layer the viewer draws on every panorama.
pub const GROUND_BRICKS: BrickPattern = BrickPattern {
    shape: Shape::Brick,
    resolution_x: 8,
    resolution_y: 18,
    offset: [0, 0],
};

#[derive(Debug, Clone, Copy)]
struct Grid {
    cell_w: f32,
    cell_h: f32,
    offset_x: f32,
    offset_y: f32,
    shifted_rows: bool,
}

impl Grid {
    fn for_pattern(p: &BrickPattern, scale_x: f32, scale_y: f32) -> Self {
        Self {
            cell_w: p.resolution_x.max(1) as f32 * scale_x,
            cell_h: p.resolution_y.max(1) as f32 * scale_y,
            offset_x: p.offset[0] as f32 * scale_x,
            offset_y: p.offset[1] as f32 * scale_y,
            shifted_rows: p.shape == Shape::Brick,
        }
    }
}

/// Pixelates `diffuse` (and `normal`, if given) with each layer in turn.
pub fn render_close_pixels(
    diffuse: &mut RgbaImage,
    mut normal: Option<&mut RgbaImage>,
    layers: &[BrickPattern],
) {
    let (dw, dh) = diffuse.dimensions();
    if dw == 0 || dh == 0 {
        return;
    }

    for layer in layers {
        pixelate(diffuse, Grid::for_pattern(layer, 1.0, 1.0));

        if let Some(n) = normal.as_deref_mut() {
            let (nw, nh) = n.dimensions();
            let grid = Grid::for_pattern(layer, nw as f32 / dw as f32, nh as f32 / dh as f32);
            pixelate(n, grid);
        }
    }
}

fn pixelate(image: &mut RgbaImage, grid: Grid) {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 || grid.cell_w <= 0.0 || grid.cell_h <= 0.0 {
        return;
    }

    let mut y = grid.offset_y.rem_euclid(grid.cell_h) - grid.cell_h;
    // the row starting at `offset_y` is row 0 (unshifted)
    let mut row: i32 = -1;
    while y < h as f32 {
        let shift = if grid.shifted_rows && row.rem_euclid(2) == 1 {
            grid.cell_w / 2.0
        } else {
            0.0
        };
        let mut x = (grid.offset_x + shift).rem_euclid(grid.cell_w) - grid.cell_w;
        while x < w as f32 {
            fill_cell(image, x, y, grid.cell_w, grid.cell_h);
            x += grid.cell_w;
        }
        y += grid.cell_h;
        row += 1;
    }
}

fn fill_cell(image: &mut RgbaImage, x: f32, y: f32, cw: f32, ch: f32) {
    let (w, h) = image.dimensions();
    let x0 = x.round().max(0.0) as u32;
    let y0 = y.round().max(0.0) as u32;
    let x1 = ((x + cw).round() as u32).min(w);
    let y1 = ((y + ch).round() as u32).min(h);
    if x1 <= x0 || y1 <= y0 {
        return;
    }

    let color = *image.get_pixel((x0 + x1) / 2, (y0 + y1) / 2);
    for py in y0..y1 {
        for px in x0..x1 {
            image.put_pixel(px, py, color);
        }
    }
}
