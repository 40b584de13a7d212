//! The boundary to the native graphics API.
//!
//! [`NativeApi`] mirrors the shape of the OpenGL calls this crate issues:
//! opaque `u32` handles, GL enumerants for targets and flags, and the same
//! argument order as the C entry points. [`Gl`] is the shared, cheaply
//! cloned context every resource keeps, and adds `glGetError` checking on
//! top of the raw calls.

use std::{fmt, ops::Deref, rc::Rc};

use gltree_core::RenderConfig;

use crate::abs::{EntryPoint, ShaderStage, TextureFormat, VertexFormat};
use crate::error::{ErrorCode, GlError, Result};

/// Opaque native object name. `0` is never a live object.
pub type RawHandle = u32;

/// The kinds of native objects the crate allocates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Buffer,
    Texture,
    Renderbuffer,
    Framebuffer,
    VertexArray,
    TransformFeedback,
    Query,
    Program,
    Shader(ShaderStage),
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectKind::Buffer => f.write_str("buffer"),
            ObjectKind::Texture => f.write_str("texture"),
            ObjectKind::Renderbuffer => f.write_str("renderbuffer"),
            ObjectKind::Framebuffer => f.write_str("framebuffer"),
            ObjectKind::VertexArray => f.write_str("vertex array"),
            ObjectKind::TransformFeedback => f.write_str("transform feedback"),
            ObjectKind::Query => f.write_str("query"),
            ObjectKind::Program => f.write_str("program"),
            ObjectKind::Shader(stage) => write!(f, "{stage} shader"),
        }
    }
}

/// A binding point. The `u32` payloads are GL target enumerants such as
/// `GL_ARRAY_BUFFER` or `GL_DRAW_FRAMEBUFFER`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindTarget {
    Buffer(u32),
    Texture(u32),
    Renderbuffer,
    Framebuffer(u32),
    VertexArray,
    TransformFeedback,
    Program,
}

/// Shape of a uniform upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UniformShape {
    Scalar,
    Vec2,
    Vec3,
    Vec4,
    Mat2,
    Mat3,
    Mat4,
}

impl UniformShape {
    /// Scalars per element.
    pub fn components(self) -> usize {
        match self {
            UniformShape::Scalar => 1,
            UniformShape::Vec2 => 2,
            UniformShape::Vec3 => 3,
            UniformShape::Vec4 | UniformShape::Mat2 => 4,
            UniformShape::Mat3 => 9,
            UniformShape::Mat4 => 16,
        }
    }

    /// Whether uploads go through `glUniformMatrix*`.
    pub fn is_matrix(self) -> bool {
        matches!(
            self,
            UniformShape::Mat2 | UniformShape::Mat3 | UniformShape::Mat4
        )
    }
}

/// Values of a uniform upload, by scalar type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformData<'a> {
    F32(&'a [f32]),
    I32(&'a [i32]),
    U32(&'a [u32]),
}

impl UniformData<'_> {
    /// Number of scalars.
    pub fn len(&self) -> usize {
        match self {
            UniformData::F32(values) => values.len(),
            UniformData::I32(values) => values.len(),
            UniformData::U32(values) => values.len(),
        }
    }

    /// Whether there are no scalars.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Initial contents for `glBufferData`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BufferData<'a> {
    /// Allocate without uploading.
    Size(usize),
    Bytes(&'a [u8]),
}

/// A vertex attribute as reported by the linker.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActiveAttribute {
    pub name: String,
    pub location: u32,
}

/// The native calls issued by this crate.
///
/// Implementations must not reorder or batch calls: the order of calls on
/// this trait is the order the driver sees.
pub trait NativeApi {
    fn generate(&self, kind: ObjectKind, count: usize) -> Vec<RawHandle>;
    fn delete(&self, kind: ObjectKind, handles: &[RawHandle]);
    /// Binding `0` restores the default object of `target`.
    fn bind(&self, target: BindTarget, handle: RawHandle);
    fn bind_buffer_base(&self, target: u32, index: u32, buffer: RawHandle);
    fn enable(&self, capability: u32);
    fn disable(&self, capability: u32);
    fn get_error(&self) -> u32;
    fn supports(&self, entry: EntryPoint) -> bool;

    fn buffer_data(&self, target: u32, data: BufferData<'_>, usage: u32);
    fn buffer_sub_data(&self, target: u32, offset: usize, data: &[u8]);
    /// Returns null on failure.
    fn map_buffer_range(&self, target: u32, offset: usize, length: usize, access: u32) -> *mut u8;
    fn unmap_buffer(&self, target: u32);

    fn active_texture(&self, unit: u32);
    fn tex_image_2d(
        &self,
        target: u32,
        level: i32,
        format: TextureFormat,
        width: u32,
        height: u32,
        pixels: Option<&[u8]>,
    );
    fn tex_parameter(&self, target: u32, parameter: u32, value: i32);
    fn generate_mipmap(&self, target: u32);
    fn renderbuffer_storage(&self, internal_format: u32, width: u32, height: u32);

    fn framebuffer_texture_2d(
        &self,
        target: u32,
        attachment: u32,
        texture_target: u32,
        texture: RawHandle,
        level: i32,
    );
    fn framebuffer_renderbuffer(&self, target: u32, attachment: u32, renderbuffer: RawHandle);
    fn check_framebuffer_status(&self, target: u32) -> u32;
    fn draw_buffers(&self, attachments: &[u32]);

    /// Uploads the source and compiles it; `Err` carries the info log.
    fn compile_shader(&self, shader: RawHandle, source: &str) -> std::result::Result<(), String>;
    fn attach_shader(&self, program: RawHandle, shader: RawHandle);
    fn detach_shader(&self, program: RawHandle, shader: RawHandle);
    fn transform_feedback_varyings(&self, program: RawHandle, varyings: &[&str], buffer_mode: u32);
    /// Links the program; `Err` carries the info log.
    fn link_program(&self, program: RawHandle) -> std::result::Result<(), String>;
    fn active_attributes(&self, program: RawHandle) -> Vec<ActiveAttribute>;
    /// `-1` when the program has no active uniform of that name.
    fn uniform_location(&self, program: RawHandle, name: &str) -> i32;
    fn set_uniform(&self, location: i32, shape: UniformShape, count: i32, data: UniformData<'_>);

    fn vertex_attrib_pointer(&self, location: u32, format: VertexFormat);
    fn enable_vertex_attrib_array(&self, location: u32);

    fn draw_arrays(&self, mode: u32, first: i32, count: i32);
    fn draw_elements(&self, mode: u32, count: i32, index_type: u32, offset: i32);
    fn begin_transform_feedback(&self, primitive_mode: u32);
    fn end_transform_feedback(&self);
    fn begin_query(&self, target: u32, query: RawHandle);
    fn end_query(&self, target: u32);
    /// Blocks until the result is available.
    fn query_result(&self, query: RawHandle) -> u32;
    fn dispatch_compute(&self, x: u32, y: u32, z: u32);
    fn memory_barrier(&self, barriers: u32);
}

/// Upper bound on `glGetError` polls per check; a lost context reports
/// errors forever.
const MAX_ERROR_DRAIN: usize = 16;

/// Shared handle to the native API.
#[derive(Clone)]
pub struct Gl {
    api: Rc<dyn NativeApi>,
    check_errors: bool,
}

impl Gl {
    /// A context with the default [`RenderConfig`].
    pub fn new(api: Rc<dyn NativeApi>) -> Self {
        Self::with_config(api, &RenderConfig::default())
    }

    /// A context configured by `config`. Pending errors are discarded.
    pub fn with_config(api: Rc<dyn NativeApi>, config: &RenderConfig) -> Self {
        let gl = Self {
            api,
            check_errors: config.check_errors,
        };
        gl.clear_errors();
        gl
    }

    /// Whether [`Gl::check`] polls `glGetError`.
    pub fn checks_errors(&self) -> bool {
        self.check_errors
    }

    /// Discards error flags raised by calls made outside this crate.
    pub fn clear_errors(&self) {
        for _ in 0..MAX_ERROR_DRAIN {
            if self.api.get_error() == glow::NO_ERROR {
                return;
            }
        }
        log::warn!("native error queue did not drain; is the context lost?");
    }

    /// Reports the first pending native error as a failure of `call`.
    ///
    /// Errors surface after the call that caused them, so this is issued
    /// right after the calls worth attributing. `args` is only formatted
    /// when there is an error to report.
    pub fn check(&self, call: &'static str, args: impl FnOnce() -> String) -> Result<()> {
        if !self.check_errors {
            return Ok(());
        }
        let code = self.api.get_error();
        if code == glow::NO_ERROR {
            return Ok(());
        }
        self.clear_errors();

        let args = args();
        let code = ErrorCode(code);
        log::error!("{call}({args}) raised {code}");
        Err(GlError::NativeCall { call, args, code })
    }

    /// Fails with [`GlError::Unsupported`] when `entry` cannot be called.
    pub fn require(&self, entry: EntryPoint) -> Result<()> {
        if self.api.supports(entry) {
            Ok(())
        } else {
            Err(GlError::Unsupported(entry))
        }
    }

    /// Whether both contexts wrap the same native API.
    pub fn ptr_eq(&self, other: &Gl) -> bool {
        Rc::ptr_eq(&self.api, &other.api)
    }
}

impl Deref for Gl {
    type Target = dyn NativeApi;

    fn deref(&self) -> &Self::Target {
        &*self.api
    }
}

impl fmt::Debug for Gl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gl")
            .field("check_errors", &self.check_errors)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abs::recording::{Call, RecordingApi};

    #[test]
    fn check_reports_pending_error_once() {
        let (gl, api) = RecordingApi::context();
        api.inject_error(glow::INVALID_VALUE);

        let err = gl.check("glBufferData", || "GL_ARRAY_BUFFER, 16".into()).unwrap_err();
        match err {
            GlError::NativeCall { call, args, code } => {
                assert_eq!(call, "glBufferData");
                assert_eq!(args, "GL_ARRAY_BUFFER, 16");
                assert_eq!(code, ErrorCode(glow::INVALID_VALUE));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(gl.check("glBufferData", String::new).is_ok());
    }

    #[test]
    fn disabled_checking_never_polls() {
        let api = Rc::new(RecordingApi::new());
        let config = RenderConfig {
            check_errors: false,
            ..RenderConfig::default()
        };
        let gl = Gl::with_config(api.clone(), &config);
        api.inject_error(glow::INVALID_ENUM);
        api.clear_calls();

        assert!(gl.check("glEnable", String::new).is_ok());
        assert_eq!(api.count(|c| matches!(c, Call::GetError)), 0);
    }

    #[test]
    fn require_reports_missing_entry_point() {
        let (gl, api) = RecordingApi::context();
        api.remove_capability(EntryPoint::DISPATCH_COMPUTE);
        assert!(matches!(
            gl.require(EntryPoint::DISPATCH_COMPUTE),
            Err(GlError::Unsupported(entry)) if entry == EntryPoint::DISPATCH_COMPUTE
        ));
        assert!(gl.require(EntryPoint::MAP_BUFFER_RANGE).is_ok());
    }
}
