//! Module to work with OpenGL framebuffers.
//!
//! This module provides functionality to create, bind, and manage OpenGL framebuffers.
//! A [`Framebuffer`] only records what is attached to it; the textures and renderbuffers
//! stay owned by whoever created them. [`RenderTarget`] bundles a framebuffer with the
//! textures it renders into for the common off-screen case.

use std::fmt;

use fxhash::FxHashMap;

use crate::abs::{
    BindTarget, Gl, ObjectKind, RawHandle, Renderbuffer, RenderbufferHandle, ResourceHandle,
    Texture, TextureFormat, TextureHandle,
};
use crate::error::{GlError, Result};

/// `GL_FRAMEBUFFER_INCOMPLETE_DIMENSIONS`, only defined by OpenGL ES 2.0.
pub const FRAMEBUFFER_INCOMPLETE_DIMENSIONS: u32 = 0x8CD9;

/// Which framebuffer binding point is affected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FramebufferTarget {
    /// Draw and read.
    #[default]
    Both,
    Draw,
    Read,
}

impl FramebufferTarget {
    /// The GL target enumerant.
    pub fn gl(self) -> u32 {
        match self {
            FramebufferTarget::Both => glow::FRAMEBUFFER,
            FramebufferTarget::Draw => glow::DRAW_FRAMEBUFFER,
            FramebufferTarget::Read => glow::READ_FRAMEBUFFER,
        }
    }

    /// The binding point as a [`BindTarget`].
    pub fn bind_target(self) -> BindTarget {
        BindTarget::Framebuffer(self.gl())
    }
}

/// Where an image is attached to a framebuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttachmentPoint {
    Color(u32),
    Depth,
    Stencil,
    DepthStencil,
}

impl AttachmentPoint {
    /// The GL attachment enumerant.
    pub fn gl(self) -> u32 {
        match self {
            AttachmentPoint::Color(index) => glow::COLOR_ATTACHMENT0 + index,
            AttachmentPoint::Depth => glow::DEPTH_ATTACHMENT,
            AttachmentPoint::Stencil => glow::STENCIL_ATTACHMENT,
            AttachmentPoint::DepthStencil => glow::DEPTH_STENCIL_ATTACHMENT,
        }
    }
}

/// What a framebuffer refers to at one attachment point. The framebuffer
/// does not own it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attachment {
    Texture { texture: TextureHandle, level: i32 },
    Renderbuffer(RenderbufferHandle),
}

impl Attachment {
    /// Size of the attached image.
    pub fn size(&self) -> (u32, u32) {
        match self {
            Attachment::Texture { texture, level } => {
                let level = u32::try_from(*level).unwrap_or(u32::MAX);
                let shrink = |extent: u32| extent.checked_shr(level).unwrap_or(0).max(1);
                (shrink(texture.width), shrink(texture.height))
            }
            Attachment::Renderbuffer(rb) => (rb.width, rb.height),
        }
    }
}

/// Result of `glCheckFramebufferStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FramebufferStatus {
    Complete,
    Undefined,
    IncompleteAttachment,
    IncompleteMissingAttachment,
    IncompleteDimensions,
    IncompleteDrawBuffer,
    IncompleteReadBuffer,
    Unsupported,
    IncompleteMultisample,
    IncompleteLayerTargets,
    Unknown(u32),
}

impl FramebufferStatus {
    /// Maps a `glCheckFramebufferStatus` result.
    pub fn from_raw(code: u32) -> Self {
        match code {
            glow::FRAMEBUFFER_COMPLETE => Self::Complete,
            glow::FRAMEBUFFER_UNDEFINED => Self::Undefined,
            glow::FRAMEBUFFER_INCOMPLETE_ATTACHMENT => Self::IncompleteAttachment,
            glow::FRAMEBUFFER_INCOMPLETE_MISSING_ATTACHMENT => Self::IncompleteMissingAttachment,
            FRAMEBUFFER_INCOMPLETE_DIMENSIONS => Self::IncompleteDimensions,
            glow::FRAMEBUFFER_INCOMPLETE_DRAW_BUFFER => Self::IncompleteDrawBuffer,
            glow::FRAMEBUFFER_INCOMPLETE_READ_BUFFER => Self::IncompleteReadBuffer,
            glow::FRAMEBUFFER_UNSUPPORTED => Self::Unsupported,
            glow::FRAMEBUFFER_INCOMPLETE_MULTISAMPLE => Self::IncompleteMultisample,
            glow::FRAMEBUFFER_INCOMPLETE_LAYER_TARGETS => Self::IncompleteLayerTargets,
            other => Self::Unknown(other),
        }
    }

    /// Whether the framebuffer can be rendered to.
    pub fn is_complete(self) -> bool {
        self == Self::Complete
    }
}

impl fmt::Display for FramebufferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Complete => "complete",
            Self::Undefined => "undefined",
            Self::IncompleteAttachment => "incomplete attachment",
            Self::IncompleteMissingAttachment => "missing attachment",
            Self::IncompleteDimensions => "attachment dimensions differ",
            Self::IncompleteDrawBuffer => "incomplete draw buffer",
            Self::IncompleteReadBuffer => "incomplete read buffer",
            Self::Unsupported => "unsupported attachment combination",
            Self::IncompleteMultisample => "inconsistent multisampling",
            Self::IncompleteLayerTargets => "inconsistent layer targets",
            Self::Unknown(code) => return write!(f, "unknown status 0x{code:04X}"),
        };
        f.write_str(name)
    }
}

/// Represents an OpenGL framebuffer.
#[derive(Debug)]
pub struct Framebuffer {
    handle: ResourceHandle,
    width: u32,
    height: u32,
    attachments: FxHashMap<AttachmentPoint, Attachment>,
}

impl Framebuffer {
    /// Creates an empty framebuffer. Its size is 0x0 until something is attached.
    pub fn new(gl: &Gl) -> Result<Self> {
        Ok(Self {
            handle: ResourceHandle::create(gl, ObjectKind::Framebuffer)?,
            width: 0,
            height: 0,
            attachments: FxHashMap::default(),
        })
    }

    /// The native name, or `UseAfterDestroy`.
    pub fn id(&self) -> Result<RawHandle> {
        self.handle.id()
    }

    /// 0 while nothing is attached.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// 0 while nothing is attached.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Binds the framebuffer for rendering.
    pub fn bind(&self, target: FramebufferTarget) -> Result<()> {
        self.handle.bind(target.bind_target())
    }

    /// Unbinds the framebuffer, reverting to the default framebuffer.
    pub fn unbind(&self, target: FramebufferTarget) -> Result<()> {
        self.handle.unbind(target.bind_target())
    }

    /// Attaches mip `level` of `texture` at `point`. The texture stays owned by the caller.
    pub fn attach_texture(
        &mut self,
        point: AttachmentPoint,
        texture: impl Into<TextureHandle>,
        level: i32,
    ) -> Result<()> {
        let texture = texture.into();
        if texture.id == 0 {
            return Err(GlError::InvalidArgument(format!(
                "cannot attach a destroyed texture to {point:?}"
            )));
        }
        let levels = u32::BITS - texture.width.max(texture.height).leading_zeros();
        if u32::try_from(level).map_or(true, |level| level >= levels) {
            return Err(GlError::InvalidArgument(format!(
                "mip level {level} is outside 0..{levels} of a {}x{} texture",
                texture.width, texture.height
            )));
        }
        self.set_texture(point, texture.id, level)?;
        self.record(point, Some(Attachment::Texture { texture, level }));
        Ok(())
    }

    /// Attaches `renderbuffer` at `point`. The renderbuffer stays owned by the caller.
    pub fn attach_renderbuffer(&mut self, point: AttachmentPoint, renderbuffer: &Renderbuffer) -> Result<()> {
        let renderbuffer = renderbuffer.handle();
        if renderbuffer.id == 0 {
            return Err(GlError::InvalidArgument(format!(
                "cannot attach a destroyed renderbuffer to {point:?}"
            )));
        }
        let gl = self.handle.gl().clone();
        self.bind(FramebufferTarget::Both)?;
        gl.framebuffer_renderbuffer(glow::FRAMEBUFFER, point.gl(), renderbuffer.id);
        let attached = gl.check("glFramebufferRenderbuffer", || {
            format!("GL_FRAMEBUFFER, 0x{:04X}, {}", point.gl(), renderbuffer.id)
        });
        self.unbind(FramebufferTarget::Both)?;
        attached?;
        self.record(point, Some(Attachment::Renderbuffer(renderbuffer)));
        Ok(())
    }

    /// Clears an attachment point and returns what was attached there.
    pub fn detach(&mut self, point: AttachmentPoint) -> Result<Option<Attachment>> {
        let Some(previous) = self.attachments.get(&point).copied() else {
            return Ok(None);
        };
        match previous {
            Attachment::Texture { .. } => self.set_texture(point, 0, 0)?,
            Attachment::Renderbuffer(_) => {
                let gl = self.handle.gl().clone();
                self.bind(FramebufferTarget::Both)?;
                gl.framebuffer_renderbuffer(glow::FRAMEBUFFER, point.gl(), 0);
                self.unbind(FramebufferTarget::Both)?;
            }
        }
        self.record(point, None);
        Ok(Some(previous))
    }

    /// What is attached at `point`.
    pub fn attachment(&self, point: AttachmentPoint) -> Option<Attachment> {
        self.attachments.get(&point).copied()
    }

    /// Selects the color attachments fragment outputs are written to.
    pub fn set_draw_buffers(&self, points: &[AttachmentPoint]) -> Result<()> {
        let buffers: Vec<u32> = points.iter().map(|p| p.gl()).collect();
        let gl = self.handle.gl();
        self.bind(FramebufferTarget::Draw)?;
        gl.draw_buffers(&buffers);
        let set = gl.check("glDrawBuffers", || format!("{buffers:?}"));
        self.unbind(FramebufferTarget::Draw)?;
        set
    }

    /// Queries the native completeness status.
    pub fn status(&self) -> Result<FramebufferStatus> {
        let gl = self.handle.gl();
        self.bind(FramebufferTarget::Both)?;
        let status = FramebufferStatus::from_raw(gl.check_framebuffer_status(glow::FRAMEBUFFER));
        self.unbind(FramebufferTarget::Both)?;
        log::trace!("framebuffer {} is {status}", self.handle.raw());
        Ok(status)
    }

    /// Fails unless the framebuffer can be rendered to.
    pub fn check_complete(&self) -> Result<()> {
        let status = self.status()?;
        if status.is_complete() {
            return Ok(());
        }
        log::error!("framebuffer {} is {status}", self.handle.raw());
        Err(GlError::FramebufferIncomplete {
            framebuffer: self.handle.raw(),
            status,
        })
    }

    /// Deletes the framebuffer object. Attachments are left alone.
    pub fn destroy(&mut self) {
        self.attachments.clear();
        self.width = 0;
        self.height = 0;
        self.handle.destroy();
    }

    fn set_texture(&self, point: AttachmentPoint, texture: RawHandle, level: i32) -> Result<()> {
        let gl = self.handle.gl();
        self.bind(FramebufferTarget::Both)?;
        gl.framebuffer_texture_2d(glow::FRAMEBUFFER, point.gl(), glow::TEXTURE_2D, texture, level);
        let attached = gl.check("glFramebufferTexture2D", || {
            format!("GL_FRAMEBUFFER, 0x{:04X}, GL_TEXTURE_2D, {texture}, {level}", point.gl())
        });
        self.unbind(FramebufferTarget::Both)?;
        attached
    }

    /// The renderable area is the intersection of all attachments.
    fn record(&mut self, point: AttachmentPoint, attachment: Option<Attachment>) {
        match attachment {
            Some(attachment) => self.attachments.insert(point, attachment),
            None => self.attachments.remove(&point),
        };
        let sizes = self.attachments.values().map(Attachment::size);
        (self.width, self.height) = sizes
            .reduce(|(w0, h0), (w1, h1)| (w0.min(w1), h0.min(h1)))
            .unwrap_or((0, 0));
    }
}

/// A framebuffer that owns its color texture and optional depth texture.
#[derive(Debug)]
pub struct RenderTarget {
    framebuffer: Framebuffer,
    color: Texture,
    depth: Option<Texture>,
}

impl RenderTarget {
    /// Creates a new render target with the specified width and height.
    pub fn new(
        gl: &Gl,
        width: u32,
        height: u32,
        use_depth: bool,
        color_format: TextureFormat,
    ) -> Result<Self> {
        let color = Texture::render_target(gl, width, height, color_format)?;
        let depth = if use_depth {
            Some(Texture::render_target(gl, width, height, TextureFormat::Depth24)?)
        } else {
            None
        };

        let mut framebuffer = Framebuffer::new(gl)?;
        framebuffer.attach_texture(AttachmentPoint::Color(0), &color, 0)?;
        if let Some(depth) = &depth {
            framebuffer.attach_texture(AttachmentPoint::Depth, depth, 0)?;
        }
        framebuffer.check_complete()?;

        Ok(Self {
            framebuffer,
            color,
            depth,
        })
    }

    /// The underlying framebuffer.
    pub fn framebuffer(&self) -> &Framebuffer {
        &self.framebuffer
    }

    /// Returns the color texture of the framebuffer.
    pub fn texture(&self) -> &Texture {
        &self.color
    }

    /// Returns the depth texture of the framebuffer, if it exists.
    pub fn depth_texture(&self) -> Option<&Texture> {
        self.depth.as_ref()
    }

    /// Binds for drawing and reading.
    pub fn bind(&self) -> Result<()> {
        self.framebuffer.bind(FramebufferTarget::Both)
    }

    /// Restores the default framebuffer.
    pub fn unbind(&self) -> Result<()> {
        self.framebuffer.unbind(FramebufferTarget::Both)
    }
}
