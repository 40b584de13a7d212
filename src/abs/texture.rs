//! Structs and functions for handling textures.
//!
//! The module provides the [`Texture`] struct which is a CPU representation of a GPU texture,
//! and [`TextureHandle`], a copyable identity used wherever a texture is referenced without
//! being owned (framebuffer attachments, for instance).

use image::{DynamicImage, GenericImageView};

use crate::abs::{BindTarget, Gl, ObjectKind, RawHandle, ResourceHandle};
use crate::error::{GlError, Result};

/// Pixel storage of a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    /// All color channels (RGBA8).
    Rgba8,
    /// Red channel only, floating point (R32F).
    RedFloat,
    /// All color channels, floating point (RGBA32F).
    Rgba32F,
    /// 24-bit depth.
    Depth24,
}

impl TextureFormat {
    /// The GL internal format enumerant.
    pub fn internal_format(self) -> u32 {
        match self {
            TextureFormat::Rgba8 => glow::RGBA8,
            TextureFormat::RedFloat => glow::R32F,
            TextureFormat::Rgba32F => glow::RGBA32F,
            TextureFormat::Depth24 => glow::DEPTH_COMPONENT24,
        }
    }

    /// Client-side pixel format and component type.
    pub fn pixel_format(self) -> (u32, u32) {
        match self {
            TextureFormat::Rgba8 => (glow::RGBA, glow::UNSIGNED_BYTE),
            TextureFormat::RedFloat => (glow::RED, glow::FLOAT),
            TextureFormat::Rgba32F => (glow::RGBA, glow::FLOAT),
            TextureFormat::Depth24 => (glow::DEPTH_COMPONENT, glow::UNSIGNED_INT),
        }
    }

    /// Bytes per pixel in client memory.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            TextureFormat::Rgba8 | TextureFormat::RedFloat | TextureFormat::Depth24 => 4,
            TextureFormat::Rgba32F => 16,
        }
    }

    /// Whether this is a depth format.
    pub fn is_depth(self) -> bool {
        matches!(self, TextureFormat::Depth24)
    }
}

/// Represents a handle to a texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureHandle {
    pub id: RawHandle,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
}

impl TextureHandle {
    /// Binds the texture handle to the specified texture unit.
    pub fn bind(&self, gl: &Gl, unit: u32) {
        gl.active_texture(glow::TEXTURE0 + unit);
        gl.bind(BindTarget::Texture(glow::TEXTURE_2D), self.id);
    }
}

struct Sampling {
    filter: u32,
    wrap: u32,
    mipmaps: bool,
}

/// Represents a texture stored on the GPU side.
#[derive(Debug)]
pub struct Texture {
    handle: ResourceHandle,
    width: u32,
    height: u32,
    format: TextureFormat,
}

impl Texture {
    const TARGET: BindTarget = BindTarget::Texture(glow::TEXTURE_2D);

    /// Creates a new texture from the given [`image::DynamicImage`].
    pub fn new(gl: &Gl, image: &DynamicImage) -> Result<Self> {
        let (width, height) = image.dimensions();
        let data = image.to_rgba8().into_raw();
        Self::allocate(
            gl,
            width,
            height,
            TextureFormat::Rgba8,
            Some(&data),
            Sampling {
                filter: glow::NEAREST,
                wrap: glow::REPEAT,
                mipmaps: false,
            },
        )
    }

    /// Creates a new texture from the given raw RGBA data.
    pub fn new_from_data(gl: &Gl, width: u32, height: u32, data: &[u8]) -> Result<Self> {
        let expected = width as usize * height as usize * 4;
        if data.len() != expected {
            return Err(GlError::InvalidArgument(format!(
                "{width}x{height} RGBA texture needs {expected} bytes, got {}",
                data.len()
            )));
        }
        Self::allocate(
            gl,
            width,
            height,
            TextureFormat::Rgba8,
            Some(data),
            Sampling {
                filter: glow::NEAREST,
                wrap: glow::REPEAT,
                mipmaps: true,
            },
        )
    }

    /// Creates an uninitialised texture meant to be rendered into.
    pub fn render_target(gl: &Gl, width: u32, height: u32, format: TextureFormat) -> Result<Self> {
        let filter = if format.is_depth() {
            glow::NEAREST
        } else {
            glow::LINEAR
        };
        Self::allocate(
            gl,
            width,
            height,
            format,
            None,
            Sampling {
                filter,
                wrap: glow::CLAMP_TO_EDGE,
                mipmaps: false,
            },
        )
    }

    fn allocate(
        gl: &Gl,
        width: u32,
        height: u32,
        format: TextureFormat,
        pixels: Option<&[u8]>,
        sampling: Sampling,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(GlError::InvalidArgument(format!(
                "texture size must be non-zero, got {width}x{height}"
            )));
        }

        let handle = ResourceHandle::create(gl, ObjectKind::Texture)?;
        handle.bind(Self::TARGET)?;
        gl.tex_image_2d(glow::TEXTURE_2D, 0, format, width, height, pixels);
        let uploaded = gl.check("glTexImage2D", || {
            format!("GL_TEXTURE_2D, 0, {format:?}, {width}, {height}")
        });

        let min_filter = match (sampling.mipmaps, sampling.filter) {
            (true, glow::LINEAR) => glow::LINEAR_MIPMAP_LINEAR,
            (true, _) => glow::NEAREST_MIPMAP_NEAREST,
            (false, filter) => filter,
        };
        if sampling.mipmaps {
            gl.generate_mipmap(glow::TEXTURE_2D);
        }
        gl.tex_parameter(glow::TEXTURE_2D, glow::TEXTURE_WRAP_S, sampling.wrap as i32);
        gl.tex_parameter(glow::TEXTURE_2D, glow::TEXTURE_WRAP_T, sampling.wrap as i32);
        gl.tex_parameter(glow::TEXTURE_2D, glow::TEXTURE_MIN_FILTER, min_filter as i32);
        gl.tex_parameter(glow::TEXTURE_2D, glow::TEXTURE_MAG_FILTER, sampling.filter as i32);
        handle.unbind(Self::TARGET)?;
        uploaded?;

        Ok(Self {
            handle,
            width,
            height,
            format,
        })
    }

    /// Returns the width of the texture.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Returns the height of the texture.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Returns the pixel format of the texture.
    pub fn format(&self) -> TextureFormat {
        self.format
    }

    /// Returns the native name, or `UseAfterDestroy`.
    pub fn id(&self) -> Result<RawHandle> {
        self.handle.id()
    }

    /// Returns a handle to the texture.
    pub fn handle(&self) -> TextureHandle {
        TextureHandle {
            id: self.handle.raw(),
            width: self.width,
            height: self.height,
            format: self.format,
        }
    }

    /// Binds the texture to the specified texture unit.
    pub fn bind(&self, unit: u32) -> Result<()> {
        self.handle.id()?;
        self.handle.gl().active_texture(glow::TEXTURE0 + unit);
        self.handle.bind(Self::TARGET)
    }

    /// Unbinds whatever texture is bound to the specified texture unit.
    pub fn unbind(&self, unit: u32) -> Result<()> {
        self.handle.id()?;
        self.handle.gl().active_texture(glow::TEXTURE0 + unit);
        self.handle.unbind(Self::TARGET)
    }

    /// Deletes the texture object.
    pub fn destroy(&mut self) {
        self.handle.destroy();
    }
}

impl From<&Texture> for TextureHandle {
    fn from(texture: &Texture) -> Self {
        texture.handle()
    }
}
