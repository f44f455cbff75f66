// nav.rs - markers for adjacent panoramas, laid out on a ring around the viewer

use crate::mesh::PANORAMA_BAND;
use crate::source::PanoLink;
use glam::Vec3;

pub const MARKER_RADIUS: f32 = 300.0;
pub const MARKER_HEIGHT: f32 = -60.0;
/// Max angle between a pick ray and a marker for the marker to count as hit.
pub const PICK_TOLERANCE_DEG: f32 = 10.0;

#[derive(Debug, Clone, PartialEq)]
pub struct NavMarker {
    pub pano: String,
    pub description: String,
    pub position: Vec3,
}

#[derive(Debug, Clone, Default)]
pub struct Nav {
    markers: Vec<NavMarker>,
}

/// Azimuth in degrees of the image's center column on the panorama band. The
/// band maps texture u linearly onto the orbit longitude.
pub fn image_center_lon() -> f32 {
    (PANORAMA_BAND.phi_start + PANORAMA_BAND.phi_length * 0.5).to_degrees()
}

/// Longitude the orbit camera needs to face `heading`. The image's center
/// column shows `center_heading`.
pub fn heading_to_lon(heading: f32, center_heading: f32) -> f32 {
    image_center_lon() + (heading - center_heading)
}

impl Nav {
    pub fn markers(&self) -> &[NavMarker] {
        &self.markers
    }

    pub fn set_links(&mut self, links: &[PanoLink], center_heading: f32) {
        self.markers = links
            .iter()
            .map(|link| {
                let lon = heading_to_lon(link.heading, center_heading).to_radians();
                NavMarker {
                    pano: link.pano.clone(),
                    description: link.description.clone(),
                    position: Vec3::new(
                        MARKER_RADIUS * lon.cos(),
                        MARKER_HEIGHT,
                        MARKER_RADIUS * lon.sin(),
                    ),
                }
            })
            .collect();
    }

    pub fn clear(&mut self) {
        self.markers.clear();
    }

    /// Closest marker to a ray cast from the camera (at the origin).
    pub fn pick(&self, ray: Vec3) -> Option<&NavMarker> {
        let ray = ray.normalize_or_zero();
        if ray == Vec3::ZERO {
            return None;
        }
        let min_cos = PICK_TOLERANCE_DEG.to_radians().cos();
        self.markers
            .iter()
            .map(|m| (m, m.position.normalize().dot(ray)))
            .filter(|(_, c)| *c >= min_cos)
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(m, _)| m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{build_sphere, PANORAMA_OFFSET_Y};

    fn link(heading: f32, pano: &str) -> PanoLink {
        PanoLink {
            heading,
            pano: pano.into(),
            description: format!("to {pano}"),
        }
    }

    fn azimuth(x: f32, z: f32) -> f32 {
        z.atan2(x).to_degrees().rem_euclid(360.0)
    }

    #[test]
    fn links_are_placed_relative_to_center_heading() {
        let mut nav = Nav::default();
        nav.set_links(&[link(30.0, "ahead"), link(210.0, "behind")], 30.0);

        let ahead = nav.markers()[0].position;
        assert!((ahead.x + MARKER_RADIUS).abs() < 1e-2 && ahead.z.abs() < 1e-2);
        let behind = nav.markers()[1].position;
        assert!((behind.x - MARKER_RADIUS).abs() < 1e-2 && behind.z.abs() < 1e-2);
        assert_eq!(behind.y, MARKER_HEIGHT);
    }

    #[test]
    fn marker_for_center_heading_sits_on_the_image_center_column() {
        let band = build_sphere(&PANORAMA_BAND, PANORAMA_OFFSET_Y);
        let center = band
            .uvs
            .iter()
            .position(|uv| (uv[0] - 0.5).abs() < 1e-6)
            .expect("band has a u = 0.5 column");
        let [x, _, z] = band.positions[center];
        let column = azimuth(x, z);

        for center_heading in [0.0, 75.0, 300.0] {
            let mut nav = Nav::default();
            nav.set_links(&[link(center_heading, "ahead")], center_heading);
            let p = nav.markers()[0].position;
            let marker = azimuth(p.x, p.z);
            assert!((marker - column).abs() < 0.01, "{marker} vs {column}");
        }

        // a quarter turn of heading is a quarter of the image width
        let quarter = band
            .uvs
            .iter()
            .position(|uv| (uv[0] - 0.75).abs() < 1e-6)
            .expect("band has a u = 0.75 column");
        let [x, _, z] = band.positions[quarter];
        let mut nav = Nav::default();
        nav.set_links(&[link(100.0, "right")], 10.0);
        let p = nav.markers()[0].position;
        assert!((azimuth(p.x, p.z) - azimuth(x, z)).abs() < 0.01);
    }

    #[test]
    fn pick_takes_the_closest_marker_within_tolerance() {
        let mut nav = Nav::default();
        nav.set_links(&[link(0.0, "a"), link(90.0, "b")], 0.0);

        let a = nav.markers()[0].position;
        assert_eq!(nav.pick(a).map(|m| m.pano.as_str()), Some("a"));
        assert_eq!(nav.pick(a + Vec3::new(10.0, 0.0, 0.0)).unwrap().pano, "a");
        assert!(nav.pick(Vec3::Y).is_none());
        assert!(nav.pick(Vec3::ZERO).is_none());

        nav.clear();
        assert!(nav.pick(a).is_none());
    }
}
