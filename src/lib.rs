//! Real-time "deep-fry" image effects rendered on the GPU.
//!
//! An [`EditorSession`] owns the effect parameters, the decoded
//! [`ImageAsset`] and the wgpu resources that draw it. Every parameter or
//! asset change re-renders one frame; [`EditorSession::export`] encodes the
//! latest frame as JPEG.

pub mod asset;
pub mod config;
pub mod error;
pub mod export;
pub mod params;
pub mod presets;
pub mod processing;
pub mod session;

pub use asset::ImageAsset;
pub use error::{DeepFryError, InitError, Result, ShaderStage};
pub use params::{EffectField, EffectOverrides, EffectParameters, ParameterStore};
pub use presets::Preset;
pub use session::{EditorSession, SessionEvent, SessionOptions};
