//! Render units: a shader program, the buffers feeding its vertex inputs
//! and the vertex array recording that pairing.
//!
//! The vertex array is recorded once when the unit is built. Rendering only
//! binds it, so a unit can be drawn any number of times per frame.

use std::rc::Rc;

use fxhash::FxHashMap;

use crate::abs::{
    ActiveAttribute, BindTarget, Buffer, Gl, ObjectKind, ResourceHandle, ShaderProgram,
    TransformFeedback,
};
use crate::error::{GlError, Result};

/// Vertex attribute name to the buffer that feeds it.
#[derive(Debug, Clone, Default)]
pub struct AttributeMap {
    buffers: FxHashMap<String, Rc<Buffer>>,
}

impl AttributeMap {
    /// An empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails if `name` is already mapped.
    pub fn add(&mut self, name: impl Into<String>, buffer: Rc<Buffer>) -> Result<()> {
        let name = name.into();
        if self.buffers.contains_key(&name) {
            return Err(GlError::InvalidArgument(format!(
                "attribute `{name}` is already mapped"
            )));
        }
        self.buffers.insert(name, buffer);
        Ok(())
    }

    /// Builder-style [`AttributeMap::add`].
    pub fn with(mut self, name: impl Into<String>, buffer: Rc<Buffer>) -> Result<Self> {
        self.add(name, buffer)?;
        Ok(self)
    }

    /// The buffer bound to attribute `name`.
    pub fn get(&self, name: &str) -> Option<&Rc<Buffer>> {
        self.buffers.get(name)
    }

    /// Number of mapped attributes.
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Whether no attribute is mapped.
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Attribute names and their buffers, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Rc<Buffer>)> {
        self.buffers.iter().map(|(name, buffer)| (name.as_str(), buffer))
    }
}

/// Primitive type of a draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DrawMode {
    #[default]
    Points,
    Lines,
    LineStrip,
    LineLoop,
    Triangles,
    TriangleStrip,
    TriangleFan,
}

impl DrawMode {
    /// The GL primitive enumerant.
    pub fn gl(self) -> u32 {
        match self {
            DrawMode::Points => glow::POINTS,
            DrawMode::Lines => glow::LINES,
            DrawMode::LineStrip => glow::LINE_STRIP,
            DrawMode::LineLoop => glow::LINE_LOOP,
            DrawMode::Triangles => glow::TRIANGLES,
            DrawMode::TriangleStrip => glow::TRIANGLE_STRIP,
            DrawMode::TriangleFan => glow::TRIANGLE_FAN,
        }
    }

    /// The primitive transform feedback records for this mode.
    pub fn feedback_primitive(self) -> u32 {
        match self {
            DrawMode::Points => glow::POINTS,
            DrawMode::Lines | DrawMode::LineStrip | DrawMode::LineLoop => glow::LINES,
            DrawMode::Triangles | DrawMode::TriangleStrip | DrawMode::TriangleFan => {
                glow::TRIANGLES
            }
        }
    }
}

/// A builder for [`RenderUnit`].
#[derive(Debug)]
pub struct RenderUnitBuilder {
    program: Rc<ShaderProgram>,
    attributes: AttributeMap,
    mode: DrawMode,
    indices: Option<Rc<Buffer>>,
}

impl RenderUnitBuilder {
    /// Starts a unit drawing `attributes` with `program`, as points.
    pub fn new(program: Rc<ShaderProgram>, attributes: AttributeMap) -> Self {
        Self {
            program,
            attributes,
            mode: DrawMode::default(),
            indices: None,
        }
    }

    /// Sets the primitive type.
    pub fn mode(mut self, mode: DrawMode) -> Self {
        self.mode = mode;
        self
    }

    /// Draw with `glDrawElements` using `indices` (`u32` elements).
    pub fn index_buffer(mut self, indices: Rc<Buffer>) -> Self {
        self.indices = Some(indices);
        self
    }

    /// Pairs every attribute the program declares with its buffer and
    /// records the vertex array.
    pub fn build(self, gl: &Gl) -> Result<RenderUnit> {
        let bindings = self
            .program
            .attributes()
            .iter()
            .map(|attribute| match self.attributes.get(&attribute.name) {
                Some(buffer) => Ok((attribute.clone(), Rc::clone(buffer))),
                None => Err(GlError::MissingAttributeBinding(attribute.name.clone())),
            })
            .collect::<Result<Vec<_>>>()?;
        for (name, _) in self.attributes.iter() {
            if self.program.attribute_location(name).is_none() {
                log::debug!("attribute `{name}` is not used by the program, ignoring it");
            }
        }

        let vao = ResourceHandle::create(gl, ObjectKind::VertexArray)?;
        vao.bind(BindTarget::VertexArray)?;
        let recorded = record_vertex_array(gl, &bindings, self.indices.as_deref());
        vao.unbind(BindTarget::VertexArray)?;
        recorded?;

        let vertex_count = bindings
            .iter()
            .map(|(_, buffer)| buffer.len())
            .min()
            .unwrap_or(0);
        log::debug!(
            "render unit with vertex array {}: {} attributes, {vertex_count} vertices, {:?}",
            vao.raw(),
            bindings.len(),
            self.mode
        );

        Ok(RenderUnit {
            program: self.program,
            vao,
            mode: self.mode,
            indices: self.indices,
            bindings,
            vertex_count,
        })
    }
}

fn record_vertex_array(
    gl: &Gl,
    bindings: &[(ActiveAttribute, Rc<Buffer>)],
    indices: Option<&Buffer>,
) -> Result<()> {
    let array = BindTarget::Buffer(glow::ARRAY_BUFFER);
    for (attribute, buffer) in bindings {
        gl.bind(array, buffer.id()?);
        gl.vertex_attrib_pointer(attribute.location, buffer.format());
        gl.enable_vertex_attrib_array(attribute.location);
        gl.check("glVertexAttribPointer", || {
            format!("{} ({}), {:?}", attribute.location, attribute.name, buffer.format())
        })?;
    }
    gl.bind(array, 0);
    if let Some(indices) = indices {
        gl.bind(BindTarget::Buffer(glow::ELEMENT_ARRAY_BUFFER), indices.id()?);
    }
    Ok(())
}

/// A drawable pairing of a program with its vertex inputs.
#[derive(Debug)]
pub struct RenderUnit {
    program: Rc<ShaderProgram>,
    vao: ResourceHandle,
    mode: DrawMode,
    indices: Option<Rc<Buffer>>,
    bindings: Vec<(ActiveAttribute, Rc<Buffer>)>,
    vertex_count: usize,
}

impl RenderUnit {
    /// The program the unit draws with.
    pub fn program(&self) -> &Rc<ShaderProgram> {
        &self.program
    }

    /// The primitive type.
    pub fn mode(&self) -> DrawMode {
        self.mode
    }

    /// Smallest element count over the bound attribute buffers.
    pub fn vertex_count(&self) -> usize {
        self.vertex_count
    }

    /// The buffer feeding `attribute`.
    pub fn buffer(&self, attribute: &str) -> Option<&Rc<Buffer>> {
        self.bindings
            .iter()
            .find(|(a, _)| a.name == attribute)
            .map(|(_, buffer)| buffer)
    }

    /// Draws once, capturing into `destination` if given.
    pub fn render(&self, destination: Option<&TransformFeedback>) -> Result<()> {
        self.render_with(destination, |_| Ok(()))
    }

    /// Like [`RenderUnit::render`], running `setup` once the program is
    /// bound. Uniforms are uploaded there.
    pub fn render_with(
        &self,
        destination: Option<&TransformFeedback>,
        setup: impl FnOnce(&ShaderProgram) -> Result<()>,
    ) -> Result<()> {
        self.draw(destination, None, setup)
    }

    /// Draws as many vertices as `source` captured in its last capture.
    pub fn render_captured(
        &self,
        source: &TransformFeedback,
        setup: impl FnOnce(&ShaderProgram) -> Result<()>,
    ) -> Result<()> {
        self.draw(None, Some(source.captured_vertices()), setup)
    }

    fn draw(
        &self,
        destination: Option<&TransformFeedback>,
        count: Option<u32>,
        setup: impl FnOnce(&ShaderProgram) -> Result<()>,
    ) -> Result<()> {
        self.program.bind()?;
        self.vao.bind(BindTarget::VertexArray)?;
        let drawn = self.draw_bound(destination, count, setup);
        self.vao.unbind(BindTarget::VertexArray)?;
        self.program.unbind()?;
        drawn
    }

    fn draw_bound(
        &self,
        destination: Option<&TransformFeedback>,
        count: Option<u32>,
        setup: impl FnOnce(&ShaderProgram) -> Result<()>,
    ) -> Result<()> {
        setup(&self.program)?;
        let Some(feedback) = destination else {
            return self.issue_draw(count);
        };

        feedback.bind()?;
        let captured = feedback
            .begin_capture(self.mode.feedback_primitive())
            .and_then(|()| {
                let drawn = self.issue_draw(count);
                let ended = feedback.end_capture().map(|_| ());
                drawn.and(ended)
            });
        feedback.unbind()?;
        captured
    }

    fn issue_draw(&self, count: Option<u32>) -> Result<()> {
        let gl = self.program.gl();
        let mode = self.mode.gl();
        match (&self.indices, count) {
            (Some(indices), None) => {
                let count = indices.len() as i32;
                gl.draw_elements(mode, count, glow::UNSIGNED_INT, 0);
                gl.check("glDrawElements", || {
                    format!("0x{mode:04X}, {count}, GL_UNSIGNED_INT, 0")
                })
            }
            (_, count) => {
                let count = count.map_or(self.vertex_count as i32, |c| c as i32);
                gl.draw_arrays(mode, 0, count);
                gl.check("glDrawArrays", || format!("0x{mode:04X}, 0, {count}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abs::recording::{Call, RecordingApi};
    use crate::abs::{BufferTarget, BufferUsage, ShaderProgramBuilder, VertexFormat};

    const VS: &str = "
        #version 330 core
        in vec3 inPosition;
        in vec3 inVelocity;
        uniform mat4 mvpMatrix;
        out vec3 outPosition;
        out vec3 outVelocity;
        void main() {}
    ";
    const FS: &str = "
        #version 330 core
        out vec4 fragColor;
        void main() {}
    ";

    fn program(gl: &Gl) -> Rc<ShaderProgram> {
        Rc::new(ShaderProgramBuilder::new().vertex(VS).fragment(FS).build(gl).unwrap())
    }

    fn vec3_buffer(gl: &Gl, len: usize) -> Rc<Buffer> {
        Rc::new(
            Buffer::with_len(
                gl,
                BufferTarget::Array,
                VertexFormat::VEC3,
                len,
                BufferUsage::DynamicCopy,
            )
            .unwrap(),
        )
    }

    fn attributes(gl: &Gl, positions: usize, velocities: usize) -> AttributeMap {
        AttributeMap::new()
            .with("inPosition", vec3_buffer(gl, positions))
            .unwrap()
            .with("inVelocity", vec3_buffer(gl, velocities))
            .unwrap()
    }

    #[test]
    fn duplicate_attribute_names_are_rejected() {
        let (gl, _api) = RecordingApi::context();
        let mut map = AttributeMap::new();
        map.add("inPosition", vec3_buffer(&gl, 4)).unwrap();
        assert!(map.add("inPosition", vec3_buffer(&gl, 4)).is_err());
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn declared_attribute_without_buffer_fails() {
        let (gl, _api) = RecordingApi::context();
        let map = AttributeMap::new()
            .with("inPosition", vec3_buffer(&gl, 4))
            .unwrap();
        let err = RenderUnitBuilder::new(program(&gl), map).build(&gl).unwrap_err();
        assert!(matches!(err, GlError::MissingAttributeBinding(name) if name == "inVelocity"));
    }

    #[test]
    fn extra_buffers_are_ignored() {
        let (gl, api) = RecordingApi::context();
        let map = attributes(&gl, 4, 4)
            .with("inColor", vec3_buffer(&gl, 4))
            .unwrap();
        let unit = RenderUnitBuilder::new(program(&gl), map).build(&gl).unwrap();
        assert!(unit.buffer("inColor").is_none());
        assert_eq!(api.count(|c| matches!(c, Call::VertexAttribPointer { .. })), 2);
    }

    #[test]
    fn render_is_bracketed_in_order() {
        let (gl, api) = RecordingApi::context();
        let program = program(&gl);
        let unit = RenderUnitBuilder::new(program.clone(), attributes(&gl, 16, 12))
            .build(&gl)
            .unwrap();
        assert_eq!(unit.vertex_count(), 12);
        api.clear_calls();

        unit.render(None).unwrap();

        let program_id = program.id().unwrap();
        let binds_and_draws: Vec<_> = api
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Bind { .. } | Call::DrawArrays { .. }))
            .collect();
        assert_eq!(binds_and_draws.len(), 5);
        assert_eq!(
            binds_and_draws[0],
            Call::Bind {
                target: BindTarget::Program,
                handle: program_id
            }
        );
        assert!(matches!(
            binds_and_draws[1],
            Call::Bind { target: BindTarget::VertexArray, handle } if handle != 0
        ));
        assert_eq!(
            binds_and_draws[2],
            Call::DrawArrays {
                mode: glow::POINTS,
                first: 0,
                count: 12
            }
        );
        assert_eq!(
            binds_and_draws[3],
            Call::Bind {
                target: BindTarget::VertexArray,
                handle: 0
            }
        );
        assert_eq!(
            binds_and_draws[4],
            Call::Bind {
                target: BindTarget::Program,
                handle: 0
            }
        );
    }

    #[test]
    fn setup_runs_with_the_program_bound() {
        let (gl, api) = RecordingApi::context();
        let unit = RenderUnitBuilder::new(program(&gl), attributes(&gl, 4, 4))
            .build(&gl)
            .unwrap();
        let mut seen = None;
        unit.render_with(None, |program| {
            seen = Some(api.bound(BindTarget::Program) == program.id()?);
            program.set_uniform("mvpMatrix", glam::Mat4::IDENTITY)?;
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, Some(true));
        assert_eq!(api.count(|c| matches!(c, Call::SetUniform { .. })), 1);
    }

    #[test]
    fn failing_setup_still_unbinds() {
        let (gl, api) = RecordingApi::context();
        let unit = RenderUnitBuilder::new(program(&gl), attributes(&gl, 4, 4))
            .build(&gl)
            .unwrap();
        let err = unit
            .render_with(None, |_| Err(GlError::InvalidArgument("nope".into())))
            .unwrap_err();
        assert!(matches!(err, GlError::InvalidArgument(_)));
        assert_eq!(api.bound(BindTarget::Program), 0);
        assert_eq!(api.bound(BindTarget::VertexArray), 0);
        assert_eq!(api.count(|c| matches!(c, Call::DrawArrays { .. })), 0);
    }

    #[test]
    fn indexed_units_draw_elements() {
        let (gl, api) = RecordingApi::context();
        let indices = Rc::new(Buffer::indices(&gl, &[0, 1, 2, 2, 3, 0]).unwrap());
        let unit = RenderUnitBuilder::new(program(&gl), attributes(&gl, 4, 4))
            .mode(DrawMode::Triangles)
            .index_buffer(indices)
            .build(&gl)
            .unwrap();
        unit.render(None).unwrap();
        assert!(api.calls().contains(&Call::DrawElements {
            mode: glow::TRIANGLES,
            count: 6,
            index_type: glow::UNSIGNED_INT,
            offset: 0,
        }));
    }

    #[test]
    fn capture_then_draw_the_captured_count() {
        let (gl, api) = RecordingApi::context();
        let unit = RenderUnitBuilder::new(program(&gl), attributes(&gl, 32, 32))
            .build(&gl)
            .unwrap();
        let mut feedback = TransformFeedback::new(&gl).unwrap();
        feedback.bind_buffer(0, vec3_buffer(&gl, 32)).unwrap();

        unit.render(Some(&feedback)).unwrap();
        assert_eq!(feedback.captured_vertices(), 32);
        assert!(!feedback.is_capturing());
        assert_eq!(api.bound(BindTarget::TransformFeedback), 0);

        api.clear_calls();
        unit.render_captured(&feedback, |_| Ok(())).unwrap();
        assert_eq!(
            api.count(|c| matches!(c, Call::DrawArrays { count: 32, .. })),
            1
        );
        assert_eq!(api.count(|c| matches!(c, Call::BeginTransformFeedback { .. })), 0);
    }
}
