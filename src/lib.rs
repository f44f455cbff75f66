// lib.rs - Street View brick viewer core: depth/normal decoding, orbit camera,
// decorative placement and the per-panorama session that ties them together.

pub mod backdrop;
pub mod brick;
pub mod config;
pub mod depth;
pub mod loader;
pub mod mesh;
pub mod nav;
pub mod orbit;
pub mod placement;
pub mod session;
pub mod source;

pub use depth::{DecodedTexture, RawDepthBuffer, TextureError};
pub use orbit::{OrbitController, OrbitState, PickQuery, Viewport};
pub use session::{LoadMessage, Session, SessionId, Signal, Stage};
