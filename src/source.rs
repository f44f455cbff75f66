// source.rs - panorama and depth providers
//
// The viewer only talks to the `PanoramaSource` / `DepthSource` traits. The
// shipped implementation reads a local panorama pack:
//
//   <root>/index.json              [{ "id", "lat", "lng" }, ...]
//   <root>/<id>/panorama.jpg|png   diffuse image
//   <root>/<id>/meta.json          { "centerHeading", "links": [...] }
//   <root>/<id>/depth.json         { "width", "height", "depthMap", "normalMap" }

use crate::depth::RawDepthBuffer;
use image::io::Reader as ImageReader;
use image::RgbaImage;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// Where to open the viewer: a known panorama or a coordinate to search near.
#[derive(Debug, Clone, PartialEq)]
pub enum Location {
    PanoId(String),
    LatLng { lat: f64, lng: f64 },
}

/// Times Square, used when no panorama id is routed in.
pub const DEFAULT_LOCATION: Location = Location::LatLng {
    lat: 40.759101,
    lng: -73.984406,
};

impl Location {
    pub fn from_route(pano: Option<&str>) -> Self {
        match pano.map(str::trim) {
            Some(id) if !id.is_empty() => Location::PanoId(id.to_string()),
            _ => DEFAULT_LOCATION,
        }
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Location::PanoId(id) => write!(f, "pano {id}"),
            Location::LatLng { lat, lng } => write!(f, "{lat:.6}, {lng:.6}"),
        }
    }
}

/// An adjacent panorama reachable from the current one.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PanoLink {
    /// Bearing in degrees, clockwise from north.
    pub heading: f32,
    pub pano: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct PanoramaData {
    pub pano_id: String,
    pub diffuse: RgbaImage,
    pub center_heading: f32,
    pub links: Vec<PanoLink>,
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("no panorama indexed near {lat:.6}, {lng:.6}")]
    NoPanoramaNear { lat: f64, lng: f64 },

    #[error("panorama '{0}' not found")]
    NotFound(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to decode image: {0}")]
    Image(#[from] image::ImageError),
}

pub trait PanoramaSource: Send {
    fn load(&mut self, location: &Location) -> Result<PanoramaData, SourceError>;
}

pub trait DepthSource: Send {
    fn load_depth(&mut self, pano_id: &str) -> Result<RawDepthBuffer, SourceError>;
}

#[derive(Debug, Clone, Deserialize)]
struct IndexEntry {
    id: String,
    lat: f64,
    lng: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct PanoMeta {
    center_heading: f32,
    links: Vec<PanoLink>,
}

const DIFFUSE_FILES: [&str; 3] = ["panorama.jpg", "panorama.jpeg", "panorama.png"];

/// A panorama pack on disk.
#[derive(Debug, Clone)]
pub struct LocalPack {
    root: PathBuf,
}

impl LocalPack {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub(crate) fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<T, SourceError> {
        let file = File::open(path).map_err(|source| SourceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_reader(BufReader::new(file)).map_err(|source| SourceError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    fn resolve(&self, location: &Location) -> Result<String, SourceError> {
        match location {
            Location::PanoId(id) => {
                if self.root.join(id).is_dir() {
                    Ok(id.clone())
                } else {
                    Err(SourceError::NotFound(id.clone()))
                }
            }
            Location::LatLng { lat, lng } => {
                let index: Vec<IndexEntry> = self.read_json(&self.root.join("index.json"))?;
                nearest(&index, *lat, *lng)
                    .map(|e| e.id.clone())
                    .ok_or(SourceError::NoPanoramaNear {
                        lat: *lat,
                        lng: *lng,
                    })
            }
        }
    }

    fn load_diffuse(&self, id: &str) -> Result<RgbaImage, SourceError> {
        let dir = self.root.join(id);
        let path = DIFFUSE_FILES
            .iter()
            .map(|f| dir.join(f))
            .find(|p| p.is_file())
            .ok_or_else(|| SourceError::NotFound(id.to_string()))?;

        let file = File::open(&path).map_err(|source| SourceError::Io {
            path: path.clone(),
            source,
        })?;
        let img = ImageReader::new(BufReader::new(file))
            .with_guessed_format()
            .map_err(image::ImageError::IoError)
            .and_then(|mut r| {
                r.no_limits();
                r.decode()
            })?;
        Ok(img.to_rgba8())
    }

    fn load_meta(&self, id: &str) -> Result<PanoMeta, SourceError> {
        let path = self.root.join(id).join("meta.json");
        if !path.is_file() {
            log::debug!("{} has no meta.json, no links", id);
            return Ok(PanoMeta::default());
        }
        self.read_json(&path)
    }
}

fn nearest(index: &[IndexEntry], lat: f64, lng: f64) -> Option<&IndexEntry> {
    // equirectangular distance is plenty at street scale
    let dist = |e: &IndexEntry| {
        let dx = (e.lng - lng).to_radians() * ((e.lat + lat) * 0.5).to_radians().cos();
        let dy = (e.lat - lat).to_radians();
        dx * dx + dy * dy
    };
    index.iter().min_by(|a, b| dist(a).total_cmp(&dist(b)))
}

impl PanoramaSource for LocalPack {
    fn load(&mut self, location: &Location) -> Result<PanoramaData, SourceError> {
        let pano_id = self.resolve(location)?;
        let diffuse = self.load_diffuse(&pano_id)?;
        let meta = self.load_meta(&pano_id)?;
        log::info!(
            "panorama {} loaded: {}x{}, {} links",
            pano_id,
            diffuse.width(),
            diffuse.height(),
            meta.links.len()
        );
        Ok(PanoramaData {
            pano_id,
            diffuse,
            center_heading: meta.center_heading,
            links: meta.links,
        })
    }
}

impl DepthSource for LocalPack {
    fn load_depth(&mut self, pano_id: &str) -> Result<RawDepthBuffer, SourceError> {
        self.read_json(&self.root.join(pano_id).join("depth.json"))
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use image::Rgba;
    use std::fs;

    /// Writes a two-panorama pack; only `north` has depth data.
    pub fn write_pack(root: &Path) {
        fs::write(
            root.join("index.json"),
            r#"[{"id":"north","lat":40.7600,"lng":-73.9840},
                {"id":"south","lat":40.7000,"lng":-74.0100}]"#,
        )
        .unwrap();

        for id in ["north", "south"] {
            let dir = root.join(id);
            fs::create_dir_all(&dir).unwrap();
            RgbaImage::from_fn(32, 16, |x, y| Rgba([x as u8 * 8, y as u8 * 16, 90, 255]))
                .save(dir.join("panorama.png"))
                .unwrap();
        }

        fs::write(
            root.join("north").join("meta.json"),
            r#"{"centerHeading": 30.0,
                "links": [{"heading": 120.0, "pano": "south", "description": "Broadway"}]}"#,
        )
        .unwrap();

        let n = 4 * 2;
        let depth = RawDepthBuffer {
            width: 4,
            height: 2,
            depth_map: vec![10.0; n],
            normal_map: vec![0.0; 3 * n],
        };
        let json = format!(
            r#"{{"width":4,"height":2,"depthMap":{:?},"normalMap":{:?}}}"#,
            depth.depth_map, depth.normal_map
        );
        fs::write(root.join("north").join("depth.json"), json).unwrap();
    }
}
