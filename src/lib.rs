//! gltree: GPU resource lifecycle, render units and feedback pipelines on
//! top of OpenGL.
//!
//! [`abs`] wraps native objects (buffers, textures, framebuffers, shader
//! programs, transform feedback) so each is created once, bound only around
//! the calls that need it and destroyed once. [`pipeline`] builds the
//! double-buffered feedback and compute passes on top, and plugs them into
//! the scene tree from [`gltree_core`].

pub mod abs;
pub mod error;
pub mod logging;
pub mod pipeline;

pub use error::{GlError, Result};
pub use gltree_core as core;
