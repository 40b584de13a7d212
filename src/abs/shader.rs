//! OpenGL Shaders
//!
//! This module defines the [`Shader`] and [`ShaderProgram`] structs for managing OpenGL shaders.
//! This module also provides the [`Uniform`] trait for setting uniform variables in shader
//! programs.
//!
//! Uniform locations are looked up lazily and cached per program, including
//! misses: a uniform the linker optimised away is queried once and then
//! silently skipped on every later upload.

use std::{cell::RefCell, fmt};

use fxhash::FxHashMap;
use glam::{IVec2, IVec3, IVec4, Mat2, Mat3, Mat4, UVec2, UVec3, UVec4, Vec2, Vec3, Vec4};

use crate::abs::{
    ActiveAttribute, BindTarget, EntryPoint, Gl, ObjectKind, RawHandle, ResourceHandle,
    UniformData, UniformShape,
};
use crate::error::{GlError, Result};

/// A programmable pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Geometry,
    Compute,
    TessControl,
    TessEvaluation,
}

impl ShaderStage {
    /// The GL shader type enumerant.
    pub fn gl(self) -> u32 {
        match self {
            ShaderStage::Vertex => glow::VERTEX_SHADER,
            ShaderStage::Fragment => glow::FRAGMENT_SHADER,
            ShaderStage::Geometry => glow::GEOMETRY_SHADER,
            ShaderStage::Compute => glow::COMPUTE_SHADER,
            ShaderStage::TessControl => glow::TESS_CONTROL_SHADER,
            ShaderStage::TessEvaluation => glow::TESS_EVALUATION_SHADER,
        }
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
            ShaderStage::Geometry => "geometry",
            ShaderStage::Compute => "compute",
            ShaderStage::TessControl => "tessellation control",
            ShaderStage::TessEvaluation => "tessellation evaluation",
        })
    }
}

/// Represents an individual OpenGL shader.
#[derive(Debug)]
pub struct Shader {
    handle: ResourceHandle,
    stage: ShaderStage,
}

impl Shader {
    /// Compiles a new shader from the given source code.
    pub fn new(gl: &Gl, stage: ShaderStage, source: &str) -> Result<Self> {
        let handle = ResourceHandle::create(gl, ObjectKind::Shader(stage))?;
        if let Err(log) = gl.compile_shader(handle.id()?, source) {
            log::error!("{stage} shader {} failed to compile", handle.raw());
            return Err(GlError::Compile { stage, log });
        }
        Ok(Self { handle, stage })
    }

    /// The stage this shader was compiled for.
    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    /// The native name, or `UseAfterDestroy`.
    pub fn id(&self) -> Result<RawHandle> {
        self.handle.id()
    }
}

/// How captured varyings are laid out in transform feedback buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FeedbackMode {
    /// All varyings into buffer 0.
    Interleaved,
    /// Varying `k` into buffer `k`.
    #[default]
    Separate,
}

impl FeedbackMode {
    /// The GL buffer mode enumerant.
    pub fn gl(self) -> u32 {
        match self {
            FeedbackMode::Interleaved => glow::INTERLEAVED_ATTRIBS,
            FeedbackMode::Separate => glow::SEPARATE_ATTRIBS,
        }
    }
}

/// A builder for [`ShaderProgram`].
#[derive(Debug, Clone, Default)]
pub struct ShaderProgramBuilder {
    stages: Vec<(ShaderStage, String)>,
    varyings: Vec<String>,
    mode: FeedbackMode,
}

impl ShaderProgramBuilder {
    /// A builder with no stages.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a stage. Stages are compiled and attached in the order given.
    pub fn stage(mut self, stage: ShaderStage, source: impl Into<String>) -> Self {
        self.stages.push((stage, source.into()));
        self
    }

    /// Adds a vertex stage.
    pub fn vertex(self, source: impl Into<String>) -> Self {
        self.stage(ShaderStage::Vertex, source)
    }

    /// Adds a fragment stage.
    pub fn fragment(self, source: impl Into<String>) -> Self {
        self.stage(ShaderStage::Fragment, source)
    }

    /// Adds a compute stage.
    pub fn compute(self, source: impl Into<String>) -> Self {
        self.stage(ShaderStage::Compute, source)
    }

    /// Outputs to capture with transform feedback.
    pub fn feedback_varyings(mut self, varyings: &[&str], mode: FeedbackMode) -> Self {
        self.varyings = varyings.iter().map(|v| v.to_string()).collect();
        self.mode = mode;
        self
    }

    /// Compiles every stage and links the program.
    pub fn build(self, gl: &Gl) -> Result<ShaderProgram> {
        if self.stages.is_empty() {
            return Err(GlError::InvalidArgument(
                "a shader program needs at least one stage".to_string(),
            ));
        }
        let stages = self
            .stages
            .iter()
            .map(|(stage, source)| Shader::new(gl, *stage, source))
            .collect::<Result<Vec<_>>>()?;

        let mut program = ShaderProgram {
            handle: ResourceHandle::create(gl, ObjectKind::Program)?,
            stages,
            varyings: self.varyings,
            mode: self.mode,
            attributes: Vec::new(),
            uniforms: RefCell::new(FxHashMap::default()),
        };
        program.link()?;
        Ok(program)
    }
}

/// A resolved uniform location. Negative means the program has no active
/// uniform of that name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UniformLocation(pub i32);

impl UniformLocation {
    /// What the driver reports for a name with no active uniform.
    pub const NOT_FOUND: Self = Self(-1);

    /// Whether the name resolved to an active uniform.
    pub fn is_found(self) -> bool {
        self.0 >= 0
    }
}

/// Represents an OpenGL shader program composed of multiple shaders.
#[derive(Debug)]
pub struct ShaderProgram {
    handle: ResourceHandle,
    stages: Vec<Shader>,
    varyings: Vec<String>,
    mode: FeedbackMode,
    attributes: Vec<ActiveAttribute>,
    uniforms: RefCell<FxHashMap<String, i32>>,
}

impl ShaderProgram {
    /// Links the attached stages, replacing any previous link.
    ///
    /// The uniform cache is cleared whether or not linking succeeds.
    pub fn link(&mut self) -> Result<()> {
        let gl = self.handle.gl().clone();
        let id = self.handle.id()?;
        if !self.varyings.is_empty() {
            gl.require(EntryPoint::TRANSFORM_FEEDBACK_VARYINGS)?;
        }

        let shaders = self
            .stages
            .iter()
            .map(Shader::id)
            .collect::<Result<Vec<_>>>()?;
        for &shader in &shaders {
            gl.attach_shader(id, shader);
        }
        if !self.varyings.is_empty() {
            let names: Vec<&str> = self.varyings.iter().map(String::as_str).collect();
            gl.transform_feedback_varyings(id, &names, self.mode.gl());
        }
        let linked = gl.link_program(id);
        for &shader in &shaders {
            gl.detach_shader(id, shader);
        }

        self.uniforms.borrow_mut().clear();
        self.attributes.clear();
        if let Err(log) = linked {
            log::error!("program {id} failed to link");
            return Err(GlError::Link(log));
        }

        self.attributes = gl.active_attributes(id);
        log::debug!(
            "linked program {id}: {} stages, attributes {:?}, varyings {:?}",
            self.stages.len(),
            self.attributes.iter().map(|a| a.name.as_str()).collect::<Vec<_>>(),
            self.varyings
        );
        Ok(())
    }

    /// The native name, or `UseAfterDestroy`.
    pub fn id(&self) -> Result<RawHandle> {
        self.handle.id()
    }

    /// The context the program belongs to.
    pub fn gl(&self) -> &Gl {
        self.handle.gl()
    }

    /// Binds the shader program for use.
    pub fn bind(&self) -> Result<()> {
        self.handle.bind(BindTarget::Program)
    }

    /// Unbinds whatever program is current.
    pub fn unbind(&self) -> Result<()> {
        self.handle.unbind(BindTarget::Program)
    }

    /// Vertex inputs reported by the last successful link.
    pub fn attributes(&self) -> &[ActiveAttribute] {
        &self.attributes
    }

    /// Location of the active attribute `name`.
    pub fn attribute_location(&self, name: &str) -> Option<u32> {
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.location)
    }

    /// Varyings captured by transform feedback, in buffer order.
    pub fn feedback_varyings(&self) -> &[String] {
        &self.varyings
    }

    /// How the varyings are laid out across buffers.
    pub fn feedback_mode(&self) -> FeedbackMode {
        self.mode
    }

    /// Whether a shader of `stage` was linked in.
    pub fn has_stage(&self, stage: ShaderStage) -> bool {
        self.stages.iter().any(|s| s.stage() == stage)
    }

    /// Looks up a uniform, asking the native API at most once per name and link.
    pub fn resolve_uniform_location(&self, name: &str) -> Result<UniformLocation> {
        let id = self.handle.id()?;
        if let Some(&location) = self.uniforms.borrow().get(name) {
            return Ok(UniformLocation(location));
        }

        let location = self.handle.gl().uniform_location(id, name).max(-1);
        if location < 0 {
            log::debug!("program {id} has no active uniform `{name}`");
        }
        self.uniforms.borrow_mut().insert(name.to_string(), location);
        Ok(UniformLocation(location))
    }

    /// Sets a uniform variable in the shader program.
    ///
    /// The program must already be bound. Nothing is uploaded when the
    /// uniform does not exist; the returned location says whether it did.
    pub fn set_uniform<T: Uniform>(&self, name: &str, value: T) -> Result<UniformLocation> {
        value.validate()?;
        let location = self.resolve_uniform_location(name)?;
        if location.is_found() {
            value.upload(self.handle.gl(), location.0)?;
        }
        Ok(location)
    }
}

/// Represents a value that can be uploaded to a uniform variable.
pub trait Uniform {
    /// Rejects values that can never be uploaded, found location or not.
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Uploads the value to `location` of the bound program.
    fn upload(&self, gl: &Gl, location: i32) -> Result<()>;
}

fn upload(gl: &Gl, location: i32, shape: UniformShape, data: UniformData<'_>) -> Result<()> {
    let count = (data.len() / shape.components()) as i32;
    if count == 0 {
        return Ok(());
    }
    gl.set_uniform(location, shape, count, data);
    gl.check("glUniform", || format!("{location}, {shape:?}, {count}"))
}

impl Uniform for bool {
    fn upload(&self, gl: &Gl, location: i32) -> Result<()> {
        upload(gl, location, UniformShape::Scalar, UniformData::I32(&[*self as i32]))
    }
}

macro_rules! impl_uniform {
    ($($ty:ty => $data:ident($scalar:ty), $shape:ident;)*) => {$(
        impl Uniform for $ty {
            fn upload(&self, gl: &Gl, location: i32) -> Result<()> {
                std::slice::from_ref(self).upload(gl, location)
            }
        }

        impl Uniform for [$ty] {
            fn upload(&self, gl: &Gl, location: i32) -> Result<()> {
                let values: &[$scalar] = bytemuck::cast_slice(self);
                upload(gl, location, UniformShape::$shape, UniformData::$data(values))
            }
        }

        impl<const N: usize> Uniform for [$ty; N] {
            fn upload(&self, gl: &Gl, location: i32) -> Result<()> {
                self.as_slice().upload(gl, location)
            }
        }
    )*};
}

impl_uniform! {
    f32 => F32(f32), Scalar;
    Vec2 => F32(f32), Vec2;
    Vec3 => F32(f32), Vec3;
    Vec4 => F32(f32), Vec4;
    i32 => I32(i32), Scalar;
    IVec2 => I32(i32), Vec2;
    IVec3 => I32(i32), Vec3;
    IVec4 => I32(i32), Vec4;
    u32 => U32(u32), Scalar;
    UVec2 => U32(u32), Vec2;
    UVec3 => U32(u32), Vec3;
    UVec4 => U32(u32), Vec4;
    Mat2 => F32(f32), Mat2;
    Mat3 => F32(f32), Mat3;
    Mat4 => F32(f32), Mat4;
}

impl<T: Uniform> Uniform for Vec<T>
where
    [T]: Uniform,
{
    fn validate(&self) -> Result<()> {
        self.as_slice().validate()
    }

    fn upload(&self, gl: &Gl, location: i32) -> Result<()> {
        self.as_slice().upload(gl, location)
    }
}

impl<T: Uniform + ?Sized> Uniform for &T {
    fn validate(&self) -> Result<()> {
        (*self).validate()
    }

    fn upload(&self, gl: &Gl, location: i32) -> Result<()> {
        (*self).upload(gl, location)
    }
}

/// Column-major matrices packed into a flat float slice.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatrixArray<'a> {
    /// 2, 3 or 4.
    pub dim: usize,
    pub values: &'a [f32],
}

impl<'a> MatrixArray<'a> {
    /// `values` as consecutive `dim` x `dim` column-major matrices.
    pub fn new(dim: usize, values: &'a [f32]) -> Self {
        Self { dim, values }
    }

    fn shape(&self) -> Result<UniformShape> {
        let shape = match self.dim {
            2 => UniformShape::Mat2,
            3 => UniformShape::Mat3,
            4 => UniformShape::Mat4,
            dim => {
                return Err(GlError::InvalidArgument(format!(
                    "{dim}x{dim} matrices cannot be uploaded as uniforms"
                )));
            }
        };
        if self.values.len() % shape.components() != 0 {
            return Err(GlError::InvalidArgument(format!(
                "{} floats is not a whole number of {}x{} matrices",
                self.values.len(),
                self.dim,
                self.dim
            )));
        }
        Ok(shape)
    }
}

impl Uniform for MatrixArray<'_> {
    fn validate(&self) -> Result<()> {
        self.shape().map(|_| ())
    }

    fn upload(&self, gl: &Gl, location: i32) -> Result<()> {
        let shape = self.shape()?;
        upload(gl, location, shape, UniformData::F32(self.values))
    }
}
