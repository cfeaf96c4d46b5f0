// Soft failures surfaced by the render facade
//
// Infrastructure failures never show up here: they go through
// Platform::fatal_error and terminate the process.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("shader '{0}' has empty bytecode")]
    EmptyShader(String),

    #[error("shader '{0}' was rejected by the backend")]
    ShaderRejected(String),

    #[error("mesh '{name}' is invalid: {reason}")]
    InvalidMesh { name: String, reason: String },

    #[error("texture '{name}' is invalid: {reason}")]
    InvalidTexture { name: String, reason: String },

    #[error("font '{name}' is invalid: {reason}")]
    InvalidFont { name: String, reason: String },

    #[error("no {kind} named '{name}'")]
    NotFound { kind: &'static str, name: String },

    #[error("failed to read {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode {path:?}: {reason}")]
    Decode { path: PathBuf, reason: String },
}

impl AssetError {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        AssetError::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn decode(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        AssetError::Decode {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
