//! Renderbuffers: attachable storage that is never sampled.

use crate::abs::{BindTarget, Gl, ObjectKind, RawHandle, ResourceHandle};
use crate::error::{GlError, Result};

/// Storage format of a renderbuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderbufferFormat {
    Depth24Stencil8,
    Depth24,
    Rgba8,
}

impl RenderbufferFormat {
    /// The GL internal format enumerant.
    pub fn internal_format(self) -> u32 {
        match self {
            RenderbufferFormat::Depth24Stencil8 => glow::DEPTH24_STENCIL8,
            RenderbufferFormat::Depth24 => glow::DEPTH_COMPONENT24,
            RenderbufferFormat::Rgba8 => glow::RGBA8,
        }
    }
}

/// Copyable identity of a renderbuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderbufferHandle {
    pub id: RawHandle,
    pub width: u32,
    pub height: u32,
    pub format: RenderbufferFormat,
}

/// Renderbuffer storage owned from allocation to deletion.
#[derive(Debug)]
pub struct Renderbuffer {
    handle: ResourceHandle,
    width: u32,
    height: u32,
    format: RenderbufferFormat,
}

impl Renderbuffer {
    /// Allocates `width` x `height` storage in `format`.
    pub fn new(gl: &Gl, width: u32, height: u32, format: RenderbufferFormat) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(GlError::InvalidArgument(format!(
                "renderbuffer size must be non-zero, got {width}x{height}"
            )));
        }
        let handle = ResourceHandle::create(gl, ObjectKind::Renderbuffer)?;
        handle.bind(BindTarget::Renderbuffer)?;
        gl.renderbuffer_storage(format.internal_format(), width, height);
        let stored = gl.check("glRenderbufferStorage", || {
            format!("GL_RENDERBUFFER, {format:?}, {width}, {height}")
        });
        handle.unbind(BindTarget::Renderbuffer)?;
        stored?;

        Ok(Self {
            handle,
            width,
            height,
            format,
        })
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// A copyable identity of this renderbuffer.
    pub fn handle(&self) -> RenderbufferHandle {
        RenderbufferHandle {
            id: self.handle.raw(),
            width: self.width,
            height: self.height,
            format: self.format,
        }
    }

    /// Deletes the renderbuffer object.
    pub fn destroy(&mut self) {
        self.handle.destroy();
    }
}
