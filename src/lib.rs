pub mod archive;
pub mod assets;
pub mod compose;
pub mod core;
pub mod gate;
pub mod remote;
pub mod render;
pub mod runtime;
pub mod surface;
pub mod sync;

use std::fmt;

/// Crate-level error context. Element-local failures (an expired reference,
/// one asset failing to embed) are absorbed and logged at the call site; only
/// archive-level corruption and remote-save failures surface to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StudioError {
    /// An uploaded or referenced image could not be decoded.
    ResourceUnavailable,
    /// A session-local reference was encountered where a durable one is required.
    TransientResourceExpired,
    /// The project archive is malformed; the load is aborted wholesale.
    ArchiveCorrupt,
    /// Embedding a single asset into an archive failed.
    EmbeddingFailure,
    /// The remote persistence call failed; retryable, local state unaffected.
    RemoteSaveFailure,
}

impl fmt::Display for StudioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResourceUnavailable => write!(f, "image resource could not be decoded"),
            Self::TransientResourceExpired => write!(f, "transient resource reference expired"),
            Self::ArchiveCorrupt => write!(f, "project archive is corrupt"),
            Self::EmbeddingFailure => write!(f, "failed to embed asset into archive"),
            Self::RemoteSaveFailure => write!(f, "remote save failed"),
        }
    }
}

impl std::error::Error for StudioError {}

pub type Result<T> = std::result::Result<T, error_stack::Report<StudioError>>;

pub mod prelude {
    pub use crate::archive::*;
    pub use crate::assets::*;
    pub use crate::compose::*;
    pub use crate::core::*;
    pub use crate::gate::*;
    pub use crate::remote::*;
    pub use crate::render::*;
    pub use crate::runtime::*;
    pub use crate::surface::*;
    pub use crate::sync::*;
    pub use crate::{Result, StudioError};
}
