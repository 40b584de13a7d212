//! [`NativeApi`] on top of [`glow`].
//!
//! Every method is a thin wrapper over the matching `glow` call. The
//! context must be current on the calling thread for as long as the
//! [`GlowApi`] is used; that is the only invariant the `unsafe` blocks
//! below rely on.

use std::{ffi::c_void, num::NonZeroU32, rc::Rc};

use glow::HasContext;
use gltree_core::RenderConfig;

use crate::abs::{
    ActiveAttribute, BindTarget, BufferData, CapabilityRegistry, ComponentType, EntryPoint, Gl,
    NativeApi, ObjectKind, RawHandle, TextureFormat, UniformData, UniformShape, VertexFormat,
};

/// [`NativeApi`] backed by a `glow` context.
pub struct GlowApi {
    gl: glow::Context,
    capabilities: CapabilityRegistry,
}

impl GlowApi {
    /// Wraps an existing context and its capability registry.
    pub fn new(gl: glow::Context, capabilities: CapabilityRegistry) -> Self {
        Self { gl, capabilities }
    }

    /// Loads the context and the capability registry from the same loader,
    /// e.g. `|name| video.gl_get_proc_address(name) as *const _`.
    ///
    /// # Safety
    ///
    /// The context the loader belongs to must be current on this thread.
    pub unsafe fn from_loader_function<F>(loader: F) -> Self
    where
        F: Fn(&str) -> *const c_void + Clone + 'static,
    {
        let gl = unsafe { glow::Context::from_loader_function(loader.clone()) };
        Self::new(gl, CapabilityRegistry::from_loader(loader))
    }

    /// The wrapped context, for calls this crate does not issue itself
    /// (viewport, clears, blending).
    pub fn context(&self) -> &glow::Context {
        &self.gl
    }

    /// Shares this API as a [`Gl`] context.
    pub fn into_gl(self, config: &RenderConfig) -> Gl {
        Gl::with_config(Rc::new(self), config)
    }

    fn create(&self, kind: ObjectKind) -> Result<RawHandle, String> {
        unsafe {
            let id = match kind {
                ObjectKind::Buffer => self.gl.create_buffer()?.0,
                ObjectKind::Texture => self.gl.create_texture()?.0,
                ObjectKind::Renderbuffer => self.gl.create_renderbuffer()?.0,
                ObjectKind::Framebuffer => self.gl.create_framebuffer()?.0,
                ObjectKind::VertexArray => self.gl.create_vertex_array()?.0,
                ObjectKind::TransformFeedback => self.gl.create_transform_feedback()?.0,
                ObjectKind::Query => self.gl.create_query()?.0,
                ObjectKind::Program => self.gl.create_program()?.0,
                ObjectKind::Shader(stage) => self.gl.create_shader(stage.gl())?.0,
            };
            Ok(id.get())
        }
    }
}

fn native(handle: RawHandle) -> Option<NonZeroU32> {
    NonZeroU32::new(handle)
}

impl NativeApi for GlowApi {
    fn generate(&self, kind: ObjectKind, count: usize) -> Vec<RawHandle> {
        (0..count)
            .map(|_| {
                self.create(kind).unwrap_or_else(|err| {
                    log::error!("creating {kind} failed: {err}");
                    0
                })
            })
            .collect()
    }

    fn delete(&self, kind: ObjectKind, handles: &[RawHandle]) {
        for id in handles.iter().filter_map(|&h| native(h)) {
            unsafe {
                match kind {
                    ObjectKind::Buffer => self.gl.delete_buffer(glow::NativeBuffer(id)),
                    ObjectKind::Texture => self.gl.delete_texture(glow::NativeTexture(id)),
                    ObjectKind::Renderbuffer => {
                        self.gl.delete_renderbuffer(glow::NativeRenderbuffer(id))
                    }
                    ObjectKind::Framebuffer => {
                        self.gl.delete_framebuffer(glow::NativeFramebuffer(id))
                    }
                    ObjectKind::VertexArray => {
                        self.gl.delete_vertex_array(glow::NativeVertexArray(id))
                    }
                    ObjectKind::TransformFeedback => self
                        .gl
                        .delete_transform_feedback(glow::NativeTransformFeedback(id)),
                    ObjectKind::Query => self.gl.delete_query(glow::NativeQuery(id)),
                    ObjectKind::Program => self.gl.delete_program(glow::NativeProgram(id)),
                    ObjectKind::Shader(_) => self.gl.delete_shader(glow::NativeShader(id)),
                }
            }
        }
    }

    fn bind(&self, target: BindTarget, handle: RawHandle) {
        let id = native(handle);
        unsafe {
            match target {
                BindTarget::Buffer(target) => {
                    self.gl.bind_buffer(target, id.map(glow::NativeBuffer))
                }
                BindTarget::Texture(target) => {
                    self.gl.bind_texture(target, id.map(glow::NativeTexture))
                }
                BindTarget::Renderbuffer => self
                    .gl
                    .bind_renderbuffer(glow::RENDERBUFFER, id.map(glow::NativeRenderbuffer)),
                BindTarget::Framebuffer(target) => self
                    .gl
                    .bind_framebuffer(target, id.map(glow::NativeFramebuffer)),
                BindTarget::VertexArray => {
                    self.gl.bind_vertex_array(id.map(glow::NativeVertexArray))
                }
                BindTarget::TransformFeedback => self.gl.bind_transform_feedback(
                    glow::TRANSFORM_FEEDBACK,
                    id.map(glow::NativeTransformFeedback),
                ),
                BindTarget::Program => self.gl.use_program(id.map(glow::NativeProgram)),
            }
        }
    }

    fn bind_buffer_base(&self, target: u32, index: u32, buffer: RawHandle) {
        unsafe {
            self.gl
                .bind_buffer_base(target, index, native(buffer).map(glow::NativeBuffer))
        }
    }

    fn enable(&self, capability: u32) {
        unsafe { self.gl.enable(capability) }
    }

    fn disable(&self, capability: u32) {
        unsafe { self.gl.disable(capability) }
    }

    fn get_error(&self) -> u32 {
        unsafe { self.gl.get_error() }
    }

    fn supports(&self, entry: EntryPoint) -> bool {
        self.capabilities.resolve(entry)
    }

    fn buffer_data(&self, target: u32, data: BufferData<'_>, usage: u32) {
        unsafe {
            match data {
                BufferData::Size(size) => self.gl.buffer_data_size(target, size as i32, usage),
                BufferData::Bytes(bytes) => self.gl.buffer_data_u8_slice(target, bytes, usage),
            }
        }
    }

    fn buffer_sub_data(&self, target: u32, offset: usize, data: &[u8]) {
        unsafe {
            self.gl
                .buffer_sub_data_u8_slice(target, offset as i32, data)
        }
    }

    fn map_buffer_range(&self, target: u32, offset: usize, length: usize, access: u32) -> *mut u8 {
        unsafe {
            self.gl
                .map_buffer_range(target, offset as i32, length as i32, access)
        }
    }

    fn unmap_buffer(&self, target: u32) {
        unsafe { self.gl.unmap_buffer(target) }
    }

    fn active_texture(&self, unit: u32) {
        unsafe { self.gl.active_texture(unit) }
    }

    fn tex_image_2d(
        &self,
        target: u32,
        level: i32,
        format: TextureFormat,
        width: u32,
        height: u32,
        pixels: Option<&[u8]>,
    ) {
        let (pixel_format, pixel_type) = format.pixel_format();
        unsafe {
            self.gl.tex_image_2d(
                target,
                level,
                format.internal_format() as i32,
                width as i32,
                height as i32,
                0,
                pixel_format,
                pixel_type,
                glow::PixelUnpackData::Slice(pixels),
            );
        }
    }

    fn tex_parameter(&self, target: u32, parameter: u32, value: i32) {
        unsafe { self.gl.tex_parameter_i32(target, parameter, value) }
    }

    fn generate_mipmap(&self, target: u32) {
        unsafe { self.gl.generate_mipmap(target) }
    }

    fn renderbuffer_storage(&self, internal_format: u32, width: u32, height: u32) {
        unsafe {
            self.gl.renderbuffer_storage(
                glow::RENDERBUFFER,
                internal_format,
                width as i32,
                height as i32,
            )
        }
    }

    fn framebuffer_texture_2d(
        &self,
        target: u32,
        attachment: u32,
        texture_target: u32,
        texture: RawHandle,
        level: i32,
    ) {
        unsafe {
            self.gl.framebuffer_texture_2d(
                target,
                attachment,
                texture_target,
                native(texture).map(glow::NativeTexture),
                level,
            )
        }
    }

    fn framebuffer_renderbuffer(&self, target: u32, attachment: u32, renderbuffer: RawHandle) {
        unsafe {
            self.gl.framebuffer_renderbuffer(
                target,
                attachment,
                glow::RENDERBUFFER,
                native(renderbuffer).map(glow::NativeRenderbuffer),
            )
        }
    }

    fn check_framebuffer_status(&self, target: u32) -> u32 {
        unsafe { self.gl.check_framebuffer_status(target) }
    }

    fn draw_buffers(&self, attachments: &[u32]) {
        unsafe { self.gl.draw_buffers(attachments) }
    }

    fn compile_shader(&self, shader: RawHandle, source: &str) -> Result<(), String> {
        let Some(shader) = native(shader).map(glow::NativeShader) else {
            return Err("shader 0 cannot be compiled".to_string());
        };
        unsafe {
            self.gl.shader_source(shader, source);
            self.gl.compile_shader(shader);
            if self.gl.get_shader_compile_status(shader) {
                Ok(())
            } else {
                Err(self.gl.get_shader_info_log(shader))
            }
        }
    }

    fn attach_shader(&self, program: RawHandle, shader: RawHandle) {
        if let (Some(program), Some(shader)) = (native(program), native(shader)) {
            unsafe {
                self.gl
                    .attach_shader(glow::NativeProgram(program), glow::NativeShader(shader))
            }
        }
    }

    fn detach_shader(&self, program: RawHandle, shader: RawHandle) {
        if let (Some(program), Some(shader)) = (native(program), native(shader)) {
            unsafe {
                self.gl
                    .detach_shader(glow::NativeProgram(program), glow::NativeShader(shader))
            }
        }
    }

    fn transform_feedback_varyings(&self, program: RawHandle, varyings: &[&str], buffer_mode: u32) {
        if let Some(program) = native(program) {
            unsafe {
                self.gl.transform_feedback_varyings(
                    glow::NativeProgram(program),
                    varyings,
                    buffer_mode,
                )
            }
        }
    }

    fn link_program(&self, program: RawHandle) -> Result<(), String> {
        let Some(program) = native(program).map(glow::NativeProgram) else {
            return Err("program 0 cannot be linked".to_string());
        };
        unsafe {
            self.gl.link_program(program);
            if self.gl.get_program_link_status(program) {
                Ok(())
            } else {
                Err(self.gl.get_program_info_log(program))
            }
        }
    }

    fn active_attributes(&self, program: RawHandle) -> Vec<ActiveAttribute> {
        let Some(program) = native(program).map(glow::NativeProgram) else {
            return Vec::new();
        };
        let mut attributes: Vec<ActiveAttribute> = unsafe {
            (0..self.gl.get_active_attributes(program))
                .filter_map(|index| self.gl.get_active_attribute(program, index))
                .filter(|attribute| !attribute.name.starts_with("gl_"))
                .filter_map(|attribute| {
                    let location = self.gl.get_attrib_location(program, &attribute.name)?;
                    Some(ActiveAttribute {
                        name: attribute.name,
                        location,
                    })
                })
                .collect()
        };
        attributes.sort_by_key(|a| a.location);
        attributes
    }

    fn uniform_location(&self, program: RawHandle, name: &str) -> i32 {
        let Some(program) = native(program).map(glow::NativeProgram) else {
            return -1;
        };
        unsafe {
            self.gl
                .get_uniform_location(program, name)
                .map_or(-1, |location| location.0 as i32)
        }
    }

    fn set_uniform(&self, location: i32, shape: UniformShape, _count: i32, data: UniformData<'_>) {
        if location < 0 {
            return;
        }
        let location = glow::NativeUniformLocation(location as u32);
        let location = Some(&location);
        let gl = &self.gl;
        unsafe {
            match (shape, data) {
                (UniformShape::Scalar, UniformData::F32(v)) => gl.uniform_1_f32_slice(location, v),
                (UniformShape::Vec2, UniformData::F32(v)) => gl.uniform_2_f32_slice(location, v),
                (UniformShape::Vec3, UniformData::F32(v)) => gl.uniform_3_f32_slice(location, v),
                (UniformShape::Vec4, UniformData::F32(v)) => gl.uniform_4_f32_slice(location, v),
                (UniformShape::Mat2, UniformData::F32(v)) => {
                    gl.uniform_matrix_2_f32_slice(location, false, v)
                }
                (UniformShape::Mat3, UniformData::F32(v)) => {
                    gl.uniform_matrix_3_f32_slice(location, false, v)
                }
                (UniformShape::Mat4, UniformData::F32(v)) => {
                    gl.uniform_matrix_4_f32_slice(location, false, v)
                }
                (UniformShape::Scalar, UniformData::I32(v)) => gl.uniform_1_i32_slice(location, v),
                (UniformShape::Vec2, UniformData::I32(v)) => gl.uniform_2_i32_slice(location, v),
                (UniformShape::Vec3, UniformData::I32(v)) => gl.uniform_3_i32_slice(location, v),
                (UniformShape::Vec4, UniformData::I32(v)) => gl.uniform_4_i32_slice(location, v),
                (UniformShape::Scalar, UniformData::U32(v)) => gl.uniform_1_u32_slice(location, v),
                (UniformShape::Vec2, UniformData::U32(v)) => gl.uniform_2_u32_slice(location, v),
                (UniformShape::Vec3, UniformData::U32(v)) => gl.uniform_3_u32_slice(location, v),
                (UniformShape::Vec4, UniformData::U32(v)) => gl.uniform_4_u32_slice(location, v),
                (shape, data) => {
                    log::warn!("no uniform upload for {shape:?} with {data:?}");
                }
            }
        }
    }

    fn vertex_attrib_pointer(&self, location: u32, format: VertexFormat) {
        let stride = format.stride() as i32;
        let data_type = format.component_type.gl();
        unsafe {
            match format.component_type {
                ComponentType::F32 => self.gl.vertex_attrib_pointer_f32(
                    location,
                    format.components,
                    data_type,
                    format.normalized,
                    stride,
                    0,
                ),
                ComponentType::I32 | ComponentType::U32 => self.gl.vertex_attrib_pointer_i32(
                    location,
                    format.components,
                    data_type,
                    stride,
                    0,
                ),
            }
        }
    }

    fn enable_vertex_attrib_array(&self, location: u32) {
        unsafe { self.gl.enable_vertex_attrib_array(location) }
    }

    fn draw_arrays(&self, mode: u32, first: i32, count: i32) {
        unsafe { self.gl.draw_arrays(mode, first, count) }
    }

    fn draw_elements(&self, mode: u32, count: i32, index_type: u32, offset: i32) {
        unsafe { self.gl.draw_elements(mode, count, index_type, offset) }
    }

    fn begin_transform_feedback(&self, primitive_mode: u32) {
        unsafe { self.gl.begin_transform_feedback(primitive_mode) }
    }

    fn end_transform_feedback(&self) {
        unsafe { self.gl.end_transform_feedback() }
    }

    fn begin_query(&self, target: u32, query: RawHandle) {
        if let Some(query) = native(query) {
            unsafe { self.gl.begin_query(target, glow::NativeQuery(query)) }
        }
    }

    fn end_query(&self, target: u32) {
        unsafe { self.gl.end_query(target) }
    }

    fn query_result(&self, query: RawHandle) -> u32 {
        native(query).map_or(0, |query| unsafe {
            self.gl
                .get_query_parameter_u32(glow::NativeQuery(query), glow::QUERY_RESULT)
        })
    }

    fn dispatch_compute(&self, x: u32, y: u32, z: u32) {
        unsafe { self.gl.dispatch_compute(x, y, z) }
    }

    fn memory_barrier(&self, barriers: u32) {
        unsafe { self.gl.memory_barrier(barriers) }
    }
}
