//! Error types for the GL-facing half of gltree.
//!
//! Every failure here is unrecoverable where it is detected: GPU objects
//! fail because of configuration or resource exhaustion, so nothing is
//! retried and everything propagates with `?`. A uniform that resolves to
//! "not found" is deliberately absent from this list; it is not an error.

use std::fmt;

use gltree_core::PhaseError;
use thiserror::Error;

use crate::abs::{EntryPoint, FramebufferStatus, ObjectKind, RawHandle, ShaderStage};

/// Result of GL-facing operations.
pub type Result<T> = std::result::Result<T, GlError>;

/// Everything that can go wrong between this crate and the native API.
#[derive(Error, Debug)]
pub enum GlError {
    /// The native API handed back the null handle.
    #[error("failed to allocate {kind}: the native API returned an invalid handle")]
    Allocation { kind: ObjectKind },

    #[error("{stage} shader failed to compile:\n{log}")]
    Compile { stage: ShaderStage, log: String },

    #[error("shader program failed to link:\n{0}")]
    Link(String),

    #[error("framebuffer {framebuffer} is incomplete: {status}")]
    FramebufferIncomplete {
        framebuffer: RawHandle,
        status: FramebufferStatus,
    },

    #[error("vertex attribute `{0}` is declared by the program but has no buffer bound")]
    MissingAttributeBinding(String),

    #[error("{kind} used after it was destroyed")]
    UseAfterDestroy { kind: ObjectKind },

    /// `glGetError` reported a failure after `call`.
    #[error("{call}({args}) raised {code}")]
    NativeCall {
        call: &'static str,
        args: String,
        code: ErrorCode,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0} is not available in this context")]
    Unsupported(EntryPoint),

    #[error(transparent)]
    Phase(#[from] PhaseError),
}

/// A raw `glGetError` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode(pub u32);

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.0 {
            glow::INVALID_ENUM => "GL_INVALID_ENUM",
            glow::INVALID_VALUE => "GL_INVALID_VALUE",
            glow::INVALID_OPERATION => "GL_INVALID_OPERATION",
            glow::INVALID_FRAMEBUFFER_OPERATION => "GL_INVALID_FRAMEBUFFER_OPERATION",
            glow::OUT_OF_MEMORY => "GL_OUT_OF_MEMORY",
            glow::STACK_UNDERFLOW => "GL_STACK_UNDERFLOW",
            glow::STACK_OVERFLOW => "GL_STACK_OVERFLOW",
            other => return write!(f, "GL error 0x{other:04X}"),
        };
        write!(f, "{name} (0x{:04X})", self.0)
    }
}
