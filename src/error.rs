use std::fmt;

/// Pipeline stage reported by a failed shader build.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Link,
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
            ShaderStage::Link => "link",
        };
        f.write_str(name)
    }
}

/// Fatal failures while bringing up the GPU surface or shader program.
///
/// Cloneable so a degraded session can keep reporting the original diagnostic.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum InitError {
    #[error("rendering surface unsupported: {0}")]
    SurfaceUnsupported(String),

    #[error("{stage} shader build failed: {diagnostics}")]
    ShaderBuild {
        stage: ShaderStage,
        diagnostics: String,
    },
}

pub type Result<T> = std::result::Result<T, DeepFryError>;

#[derive(Debug, thiserror::Error)]
pub enum DeepFryError {
    #[error(transparent)]
    Init(#[from] InitError),

    /// The previous asset (if any) is left in place.
    #[error("could not decode {source_name}: {reason}")]
    AssetDecode { source_name: String, reason: String },

    #[error("unknown preset: {0}")]
    PresetNotFound(String),

    #[error("no frame has been rendered yet")]
    NoRenderedFrame,

    #[error("no image asset loaded")]
    NoAsset,

    #[error("frame readback failed: {0}")]
    Readback(String),

    /// Uniform binding or draw rejected by an already validated program.
    #[error("render aborted: {0}")]
    RenderAborted(String),

    #[error("invalid effect parameters: {0}")]
    Params(String),

    #[error(transparent)]
    Encode(#[from] image::ImageError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl DeepFryError {
    pub fn asset_decode(source_name: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::AssetDecode {
            source_name: source_name.into(),
            reason: reason.to_string(),
        }
    }

    pub fn readback(msg: impl Into<String>) -> Self {
        Self::Readback(msg.into())
    }

    pub fn params(msg: impl Into<String>) -> Self {
        Self::Params(msg.into())
    }

    /// Whether the session can keep going after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Init(_))
    }
}
