//! This module contains the GPU resource layer of gltree,
//! including the native API boundary, resource handles, buffers, textures,
//! framebuffers, shader programs and render units.

pub mod buffer;
pub mod capability;
pub mod framebuffer;
pub mod glow_api;
pub mod handle;
pub mod native;
#[cfg(test)]
pub(crate) mod recording;
pub mod render_unit;
pub mod renderbuffer;
pub mod shader;
pub mod texture;
pub mod transform_feedback;

pub use buffer::*;
pub use capability::*;
pub use framebuffer::*;
pub use glow_api::*;
pub use handle::*;
pub use native::*;
pub use render_unit::*;
pub use renderbuffer::*;
pub use shader::*;
pub use texture::*;
pub use transform_feedback::*;
