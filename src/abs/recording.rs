//! An in-memory [`NativeApi`] for tests.
//!
//! Every call is recorded in order. On top of that the fake keeps just
//! enough state to behave like a driver: it hands out object names, tracks
//! bindings, parses `in`/`out`/`uniform` declarations out of shader source
//! to answer link and uniform queries, decides framebuffer completeness
//! from attachment sizes and counts primitives written during transform
//! feedback.

use std::{cell::RefCell, collections::VecDeque, rc::Rc};

use fxhash::{FxHashMap, FxHashSet};
use gltree_core::RenderConfig;

use crate::abs::{
    ActiveAttribute, BindTarget, BufferData, EntryPoint, Gl, NativeApi, ObjectKind, RawHandle,
    ShaderStage, TextureFormat, UniformData, UniformShape, VertexFormat,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    GetError,
    Generate { kind: ObjectKind, ids: Vec<RawHandle> },
    Delete { kind: ObjectKind, ids: Vec<RawHandle> },
    Bind { target: BindTarget, handle: RawHandle },
    BindBufferBase { target: u32, index: u32, buffer: RawHandle },
    Enable(u32),
    Disable(u32),
    BufferData { target: u32, size: usize, usage: u32 },
    BufferSubData { target: u32, offset: usize, len: usize },
    MapBufferRange { target: u32, offset: usize, length: usize, access: u32 },
    UnmapBuffer { target: u32 },
    ActiveTexture(u32),
    TexImage2D { format: TextureFormat, width: u32, height: u32, with_pixels: bool },
    TexParameter { parameter: u32, value: i32 },
    GenerateMipmap,
    RenderbufferStorage { internal_format: u32, width: u32, height: u32 },
    FramebufferTexture2D { attachment: u32, texture: RawHandle, level: i32 },
    FramebufferRenderbuffer { attachment: u32, renderbuffer: RawHandle },
    CheckFramebufferStatus,
    DrawBuffers(Vec<u32>),
    CompileShader { shader: RawHandle },
    AttachShader { program: RawHandle, shader: RawHandle },
    DetachShader { program: RawHandle, shader: RawHandle },
    TransformFeedbackVaryings { program: RawHandle, varyings: Vec<String>, mode: u32 },
    LinkProgram { program: RawHandle },
    UniformLocation { program: RawHandle, name: String },
    SetUniform { location: i32, shape: UniformShape, count: i32 },
    VertexAttribPointer { location: u32, format: VertexFormat },
    EnableVertexAttribArray { location: u32 },
    DrawArrays { mode: u32, first: i32, count: i32 },
    DrawElements { mode: u32, count: i32, index_type: u32, offset: i32 },
    BeginTransformFeedback { primitive: u32 },
    EndTransformFeedback,
    BeginQuery { target: u32, query: RawHandle },
    EndQuery { target: u32 },
    DispatchCompute { x: u32, y: u32, z: u32 },
    MemoryBarrier(u32),
}

#[derive(Debug, Default)]
struct ShaderInfo {
    stage: Option<ShaderStage>,
    inputs: Vec<String>,
    outputs: Vec<String>,
    uniforms: Vec<String>,
}

#[derive(Debug, Default)]
struct ProgramInfo {
    attached: Vec<RawHandle>,
    varyings: Vec<String>,
    attributes: Vec<ActiveAttribute>,
    uniforms: Vec<String>,
}

#[derive(Debug, Default)]
struct State {
    calls: Vec<Call>,
    next_id: RawHandle,
    live: FxHashMap<RawHandle, ObjectKind>,
    deleted: Vec<RawHandle>,
    double_frees: Vec<RawHandle>,
    errors: VecDeque<u32>,
    fail_next_allocation: bool,
    fail_next_map: bool,
    missing: FxHashSet<&'static str>,
    bindings: FxHashMap<BindTarget, RawHandle>,
    enabled: FxHashSet<u32>,
    mapped: Vec<u8>,
    textures: FxHashMap<RawHandle, (u32, u32)>,
    renderbuffers: FxHashMap<RawHandle, (u32, u32)>,
    framebuffers: FxHashMap<RawHandle, FxHashMap<u32, (u32, u32)>>,
    shaders: FxHashMap<RawHandle, ShaderInfo>,
    programs: FxHashMap<RawHandle, ProgramInfo>,
    active_query: Option<RawHandle>,
    query_results: FxHashMap<RawHandle, u32>,
    feedback_primitive: Option<u32>,
}

impl State {
    fn bound(&self, target: BindTarget) -> RawHandle {
        self.bindings.get(&target).copied().unwrap_or(0)
    }
}

#[derive(Debug, Default)]
pub struct RecordingApi {
    state: RefCell<State>,
}

impl RecordingApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// A [`Gl`] with error checking on, and the fake behind it.
    pub fn context() -> (Gl, Rc<RecordingApi>) {
        let api = Rc::new(Self::new());
        let config = RenderConfig {
            check_errors: true,
            ..RenderConfig::default()
        };
        (Gl::with_config(api.clone(), &config), api)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.borrow().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.borrow_mut().calls.clear();
    }

    pub fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.state.borrow().calls.iter().filter(|c| predicate(c)).count()
    }

    /// Queues `code` for the next `get_error`.
    pub fn inject_error(&self, code: u32) {
        self.state.borrow_mut().errors.push_back(code);
    }

    pub fn fail_next_allocation(&self) {
        self.state.borrow_mut().fail_next_allocation = true;
    }

    pub fn fail_next_map(&self) {
        self.state.borrow_mut().fail_next_map = true;
    }

    pub fn remove_capability(&self, entry: EntryPoint) {
        self.state.borrow_mut().missing.insert(entry.name);
    }

    /// How many times `id` was passed to `delete`.
    pub fn deletions_of(&self, id: RawHandle) -> usize {
        self.state.borrow().deleted.iter().filter(|&&d| d == id).count()
    }

    /// Names deleted while not live.
    pub fn double_frees(&self) -> Vec<RawHandle> {
        self.state.borrow().double_frees.clone()
    }

    pub fn bound(&self, target: BindTarget) -> RawHandle {
        self.state.borrow().bound(target)
    }

    pub fn is_enabled(&self, capability: u32) -> bool {
        self.state.borrow().enabled.contains(&capability)
    }

    pub fn texture_size(&self, id: RawHandle) -> Option<(u32, u32)> {
        self.state.borrow().textures.get(&id).copied()
    }

    /// Contents of the most recent mapping.
    pub fn mapped_bytes(&self) -> Vec<u8> {
        self.state.borrow().mapped.clone()
    }

    fn record(&self, call: Call) {
        self.state.borrow_mut().calls.push(call);
    }
}

fn parse_declarations(source: &str) -> ShaderInfo {
    let mut info = ShaderInfo::default();
    for line in source.lines() {
        let mut line = line.trim();
        if line.starts_with("layout") {
            line = line.split_once(')').map_or(line, |(_, rest)| rest.trim());
        }
        let Some((declaration, _)) = line.split_once(';') else {
            continue;
        };
        let tokens: Vec<&str> = declaration.split_whitespace().collect();
        if tokens.len() < 3 {
            continue;
        }
        let name = tokens[tokens.len() - 1];
        let name = name.split_once('[').map_or(name, |(name, _)| name).to_string();
        match tokens[0] {
            "in" => info.inputs.push(name),
            "out" => info.outputs.push(name),
            "uniform" => info.uniforms.push(name),
            _ => {}
        }
    }
    info
}

fn vertices_per_primitive(primitive: u32) -> i32 {
    match primitive {
        glow::LINES => 2,
        glow::TRIANGLES => 3,
        _ => 1,
    }
}

impl NativeApi for RecordingApi {
    fn generate(&self, kind: ObjectKind, count: usize) -> Vec<RawHandle> {
        let mut state = self.state.borrow_mut();
        let ids = if std::mem::take(&mut state.fail_next_allocation) {
            vec![0; count]
        } else {
            (0..count)
                .map(|_| {
                    state.next_id += 1;
                    let id = state.next_id;
                    state.live.insert(id, kind);
                    id
                })
                .collect()
        };
        state.calls.push(Call::Generate {
            kind,
            ids: ids.clone(),
        });
        ids
    }

    fn delete(&self, kind: ObjectKind, handles: &[RawHandle]) {
        let mut state = self.state.borrow_mut();
        for &id in handles {
            if state.live.remove(&id).is_none() {
                state.double_frees.push(id);
            }
            state.deleted.push(id);
        }
        state.calls.push(Call::Delete {
            kind,
            ids: handles.to_vec(),
        });
    }

    fn bind(&self, target: BindTarget, handle: RawHandle) {
        let mut state = self.state.borrow_mut();
        state.bindings.insert(target, handle);
        state.calls.push(Call::Bind { target, handle });
    }

    fn bind_buffer_base(&self, target: u32, index: u32, buffer: RawHandle) {
        self.record(Call::BindBufferBase {
            target,
            index,
            buffer,
        });
    }

    fn enable(&self, capability: u32) {
        let mut state = self.state.borrow_mut();
        state.enabled.insert(capability);
        state.calls.push(Call::Enable(capability));
    }

    fn disable(&self, capability: u32) {
        let mut state = self.state.borrow_mut();
        state.enabled.remove(&capability);
        state.calls.push(Call::Disable(capability));
    }

    fn get_error(&self) -> u32 {
        let mut state = self.state.borrow_mut();
        state.calls.push(Call::GetError);
        state.errors.pop_front().unwrap_or(glow::NO_ERROR)
    }

    fn supports(&self, entry: EntryPoint) -> bool {
        !self.state.borrow().missing.contains(entry.name)
    }

    fn buffer_data(&self, target: u32, data: BufferData<'_>, usage: u32) {
        let size = match data {
            BufferData::Size(size) => size,
            BufferData::Bytes(bytes) => bytes.len(),
        };
        self.record(Call::BufferData {
            target,
            size,
            usage,
        });
    }

    fn buffer_sub_data(&self, target: u32, offset: usize, data: &[u8]) {
        self.record(Call::BufferSubData {
            target,
            offset,
            len: data.len(),
        });
    }

    fn map_buffer_range(&self, target: u32, offset: usize, length: usize, access: u32) -> *mut u8 {
        let mut state = self.state.borrow_mut();
        state.calls.push(Call::MapBufferRange {
            target,
            offset,
            length,
            access,
        });
        if std::mem::take(&mut state.fail_next_map) {
            state.errors.push_back(glow::INVALID_OPERATION);
            return std::ptr::null_mut();
        }
        state.mapped = vec![0; length];
        state.mapped.as_mut_ptr()
    }

    fn unmap_buffer(&self, target: u32) {
        self.record(Call::UnmapBuffer { target });
    }

    fn active_texture(&self, unit: u32) {
        self.record(Call::ActiveTexture(unit));
    }

    fn tex_image_2d(
        &self,
        target: u32,
        _level: i32,
        format: TextureFormat,
        width: u32,
        height: u32,
        pixels: Option<&[u8]>,
    ) {
        let mut state = self.state.borrow_mut();
        let texture = state.bound(BindTarget::Texture(target));
        state.textures.insert(texture, (width, height));
        state.calls.push(Call::TexImage2D {
            format,
            width,
            height,
            with_pixels: pixels.is_some(),
        });
    }

    fn tex_parameter(&self, _target: u32, parameter: u32, value: i32) {
        self.record(Call::TexParameter { parameter, value });
    }

    fn generate_mipmap(&self, _target: u32) {
        self.record(Call::GenerateMipmap);
    }

    fn renderbuffer_storage(&self, internal_format: u32, width: u32, height: u32) {
        let mut state = self.state.borrow_mut();
        let renderbuffer = state.bound(BindTarget::Renderbuffer);
        state.renderbuffers.insert(renderbuffer, (width, height));
        state.calls.push(Call::RenderbufferStorage {
            internal_format,
            width,
            height,
        });
    }

    fn framebuffer_texture_2d(
        &self,
        target: u32,
        attachment: u32,
        _texture_target: u32,
        texture: RawHandle,
        level: i32,
    ) {
        let mut state = self.state.borrow_mut();
        let framebuffer = state.bound(BindTarget::Framebuffer(target));
        let size = state
            .textures
            .get(&texture)
            .map(|&(w, h)| {
                let level = u32::try_from(level).unwrap_or(u32::MAX);
                let shrink = |extent: u32| extent.checked_shr(level).unwrap_or(0).max(1);
                (shrink(w), shrink(h))
            });
        let attachments = state.framebuffers.entry(framebuffer).or_default();
        match size {
            Some(size) if texture != 0 => attachments.insert(attachment, size),
            _ => attachments.remove(&attachment),
        };
        state.calls.push(Call::FramebufferTexture2D {
            attachment,
            texture,
            level,
        });
    }

    fn framebuffer_renderbuffer(&self, target: u32, attachment: u32, renderbuffer: RawHandle) {
        let mut state = self.state.borrow_mut();
        let framebuffer = state.bound(BindTarget::Framebuffer(target));
        let size = state.renderbuffers.get(&renderbuffer).copied();
        let attachments = state.framebuffers.entry(framebuffer).or_default();
        match size {
            Some(size) if renderbuffer != 0 => attachments.insert(attachment, size),
            _ => attachments.remove(&attachment),
        };
        state.calls.push(Call::FramebufferRenderbuffer {
            attachment,
            renderbuffer,
        });
    }

    fn check_framebuffer_status(&self, target: u32) -> u32 {
        let mut state = self.state.borrow_mut();
        state.calls.push(Call::CheckFramebufferStatus);
        let framebuffer = state.bound(BindTarget::Framebuffer(target));
        if framebuffer == 0 {
            return glow::FRAMEBUFFER_COMPLETE;
        }
        let Some(attachments) = state.framebuffers.get(&framebuffer) else {
            return glow::FRAMEBUFFER_INCOMPLETE_MISSING_ATTACHMENT;
        };
        let mut sizes = attachments.values();
        match sizes.next() {
            None => glow::FRAMEBUFFER_INCOMPLETE_MISSING_ATTACHMENT,
            Some(first) if sizes.all(|size| size == first) => glow::FRAMEBUFFER_COMPLETE,
            Some(_) => crate::abs::FRAMEBUFFER_INCOMPLETE_DIMENSIONS,
        }
    }

    fn draw_buffers(&self, attachments: &[u32]) {
        self.record(Call::DrawBuffers(attachments.to_vec()));
    }

    fn compile_shader(&self, shader: RawHandle, source: &str) -> Result<(), String> {
        let mut state = self.state.borrow_mut();
        state.calls.push(Call::CompileShader { shader });
        if let Some(line) = source.lines().position(|l| l.trim().starts_with("#error")) {
            let message = source.lines().nth(line).unwrap_or_default().trim();
            let message = message.trim_start_matches("#error").trim();
            return Err(format!("0:{}(1): error: {message}", line + 1));
        }

        let stage = match state.live.get(&shader) {
            Some(ObjectKind::Shader(stage)) => Some(*stage),
            _ => None,
        };
        let info = ShaderInfo {
            stage,
            ..parse_declarations(source)
        };
        state.shaders.insert(shader, info);
        Ok(())
    }

    fn attach_shader(&self, program: RawHandle, shader: RawHandle) {
        let mut state = self.state.borrow_mut();
        state.programs.entry(program).or_default().attached.push(shader);
        state.calls.push(Call::AttachShader { program, shader });
    }

    fn detach_shader(&self, program: RawHandle, shader: RawHandle) {
        let mut state = self.state.borrow_mut();
        if let Some(info) = state.programs.get_mut(&program) {
            info.attached.retain(|&s| s != shader);
        }
        state.calls.push(Call::DetachShader { program, shader });
    }

    fn transform_feedback_varyings(&self, program: RawHandle, varyings: &[&str], buffer_mode: u32) {
        let mut state = self.state.borrow_mut();
        let varyings: Vec<String> = varyings.iter().map(|v| v.to_string()).collect();
        state.programs.entry(program).or_default().varyings = varyings.clone();
        state.calls.push(Call::TransformFeedbackVaryings {
            program,
            varyings,
            mode: buffer_mode,
        });
    }

    fn link_program(&self, program: RawHandle) -> Result<(), String> {
        let mut state = self.state.borrow_mut();
        state.calls.push(Call::LinkProgram { program });
        let state = &mut *state;
        let info = state.programs.entry(program).or_default();
        if info.attached.is_empty() {
            return Err("error: linking with no shaders attached".to_string());
        }

        let shaders: Vec<&ShaderInfo> = info
            .attached
            .iter()
            .filter_map(|id| state.shaders.get(id))
            .collect();
        let stage_outputs: Vec<&String> = shaders
            .iter()
            .filter(|s| matches!(s.stage, Some(ShaderStage::Vertex | ShaderStage::Geometry)))
            .flat_map(|s| &s.outputs)
            .collect();
        if let Some(missing) = info
            .varyings
            .iter()
            .find(|v| !stage_outputs.contains(v))
        {
            return Err(format!(
                "error: Transform feedback varying (named {missing}) specified but not present in shader"
            ));
        }

        let attributes = shaders
            .iter()
            .filter(|s| s.stage == Some(ShaderStage::Vertex))
            .flat_map(|s| &s.inputs)
            .enumerate()
            .map(|(location, name)| ActiveAttribute {
                name: name.clone(),
                location: location as u32,
            })
            .collect();
        let mut uniforms: Vec<String> = Vec::new();
        for name in shaders.iter().flat_map(|s| &s.uniforms) {
            if !uniforms.contains(name) {
                uniforms.push(name.clone());
            }
        }
        info.attributes = attributes;
        info.uniforms = uniforms;
        Ok(())
    }

    fn active_attributes(&self, program: RawHandle) -> Vec<ActiveAttribute> {
        self.state
            .borrow()
            .programs
            .get(&program)
            .map(|info| info.attributes.clone())
            .unwrap_or_default()
    }

    fn uniform_location(&self, program: RawHandle, name: &str) -> i32 {
        let mut state = self.state.borrow_mut();
        state.calls.push(Call::UniformLocation {
            program,
            name: name.to_string(),
        });
        state
            .programs
            .get(&program)
            .and_then(|info| info.uniforms.iter().position(|u| u == name))
            .map_or(-1, |index| index as i32)
    }

    fn set_uniform(&self, location: i32, shape: UniformShape, count: i32, _data: UniformData<'_>) {
        self.record(Call::SetUniform {
            location,
            shape,
            count,
        });
    }

    fn vertex_attrib_pointer(&self, location: u32, format: VertexFormat) {
        self.record(Call::VertexAttribPointer { location, format });
    }

    fn enable_vertex_attrib_array(&self, location: u32) {
        self.record(Call::EnableVertexAttribArray { location });
    }

    fn draw_arrays(&self, mode: u32, first: i32, count: i32) {
        let mut state = self.state.borrow_mut();
        if let (Some(primitive), Some(query)) = (state.feedback_primitive, state.active_query) {
            let written = (count / vertices_per_primitive(primitive)) as u32;
            *state.query_results.entry(query).or_default() += written;
        }
        state.calls.push(Call::DrawArrays { mode, first, count });
    }

    fn draw_elements(&self, mode: u32, count: i32, index_type: u32, offset: i32) {
        self.record(Call::DrawElements {
            mode,
            count,
            index_type,
            offset,
        });
    }

    fn begin_transform_feedback(&self, primitive_mode: u32) {
        let mut state = self.state.borrow_mut();
        state.feedback_primitive = Some(primitive_mode);
        state.calls.push(Call::BeginTransformFeedback {
            primitive: primitive_mode,
        });
    }

    fn end_transform_feedback(&self) {
        let mut state = self.state.borrow_mut();
        state.feedback_primitive = None;
        state.calls.push(Call::EndTransformFeedback);
    }

    fn begin_query(&self, target: u32, query: RawHandle) {
        let mut state = self.state.borrow_mut();
        state.active_query = Some(query);
        state.query_results.insert(query, 0);
        state.calls.push(Call::BeginQuery { target, query });
    }

    fn end_query(&self, target: u32) {
        let mut state = self.state.borrow_mut();
        state.active_query = None;
        state.calls.push(Call::EndQuery { target });
    }

    fn query_result(&self, query: RawHandle) -> u32 {
        self.state
            .borrow()
            .query_results
            .get(&query)
            .copied()
            .unwrap_or(0)
    }

    fn dispatch_compute(&self, x: u32, y: u32, z: u32) {
        self.record(Call::DispatchCompute { x, y, z });
    }

    fn memory_barrier(&self, barriers: u32) {
        self.record(Call::MemoryBarrier(barriers));
    }
}
