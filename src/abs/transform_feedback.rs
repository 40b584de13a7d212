//! Transform feedback objects.
//!
//! A [`TransformFeedback`] groups the buffers vertex outputs are captured
//! into, plus a primitives-written query so the number of captured vertices
//! can be fed to the next draw.

use std::{cell::Cell, rc::Rc};

use crate::abs::{BindTarget, Buffer, EntryPoint, Gl, ObjectKind, RawHandle, ResourceHandle};
use crate::error::{GlError, Result};

/// A transform feedback object, its destination buffers and a primitives-written query.
#[derive(Debug)]
pub struct TransformFeedback {
    handle: ResourceHandle,
    query: ResourceHandle,
    buffers: Vec<Option<Rc<Buffer>>>,
    primitive: Cell<Option<u32>>,
    captured: Cell<u32>,
}

impl TransformFeedback {
    /// Allocates the feedback object and its query.
    pub fn new(gl: &Gl) -> Result<Self> {
        gl.require(EntryPoint::BIND_TRANSFORM_FEEDBACK)?;
        gl.require(EntryPoint::BIND_BUFFER_BASE)?;
        Ok(Self {
            handle: ResourceHandle::create(gl, ObjectKind::TransformFeedback)?,
            query: ResourceHandle::create(gl, ObjectKind::Query)?,
            buffers: Vec::new(),
            primitive: Cell::new(None),
            captured: Cell::new(0),
        })
    }

    /// The native name, or `UseAfterDestroy`.
    pub fn id(&self) -> Result<RawHandle> {
        self.handle.id()
    }

    /// Makes `buffer` receive varying `index` (separate mode) or all
    /// varyings (interleaved mode, index 0).
    pub fn bind_buffer(&mut self, index: u32, buffer: Rc<Buffer>) -> Result<()> {
        let id = buffer.id()?;
        self.bind()?;
        self.handle
            .gl()
            .bind_buffer_base(glow::TRANSFORM_FEEDBACK_BUFFER, index, id);
        let bound = self
            .handle
            .gl()
            .check("glBindBufferBase", || format!("GL_TRANSFORM_FEEDBACK_BUFFER, {index}, {id}"));
        self.unbind()?;
        bound?;

        let slot = index as usize;
        if self.buffers.len() <= slot {
            self.buffers.resize(slot + 1, None);
        }
        self.buffers[slot] = Some(buffer);
        Ok(())
    }

    /// The buffer receiving varying `index`.
    pub fn buffer(&self, index: u32) -> Option<&Rc<Buffer>> {
        self.buffers.get(index as usize).and_then(Option::as_ref)
    }

    /// Makes this the current transform feedback object.
    pub fn bind(&self) -> Result<()> {
        self.handle.bind(BindTarget::TransformFeedback)
    }

    /// Restores the default transform feedback object.
    pub fn unbind(&self) -> Result<()> {
        self.handle.unbind(BindTarget::TransformFeedback)
    }

    /// Starts capturing `primitive` (`GL_POINTS`, `GL_LINES` or
    /// `GL_TRIANGLES`). The object must be bound.
    pub fn begin_capture(&self, primitive: u32) -> Result<()> {
        if self.primitive.get().is_some() {
            return Err(GlError::InvalidArgument(
                "transform feedback is already capturing".to_string(),
            ));
        }
        let gl = self.handle.gl();
        gl.begin_query(glow::TRANSFORM_FEEDBACK_PRIMITIVES_WRITTEN, self.query.id()?);
        gl.begin_transform_feedback(primitive);
        if let Err(err) = gl.check("glBeginTransformFeedback", || format!("0x{primitive:04X}")) {
            // Either call may have been the one that failed; close both so
            // the next capture can begin.
            gl.end_transform_feedback();
            gl.end_query(glow::TRANSFORM_FEEDBACK_PRIMITIVES_WRITTEN);
            gl.clear_errors();
            return Err(err);
        }
        self.primitive.set(Some(primitive));
        Ok(())
    }

    /// Stops capturing and records how many primitives were written.
    /// Waits for the capture to finish.
    pub fn end_capture(&self) -> Result<u32> {
        let Some(primitive) = self.primitive.take() else {
            return Err(GlError::InvalidArgument(
                "transform feedback is not capturing".to_string(),
            ));
        };
        let gl = self.handle.gl();
        gl.end_transform_feedback();
        gl.end_query(glow::TRANSFORM_FEEDBACK_PRIMITIVES_WRITTEN);
        gl.check("glEndTransformFeedback", String::new)?;

        let primitives = gl.query_result(self.query.id()?);
        self.captured.set(primitives * vertices_per_primitive(primitive));
        log::trace!(
            "transform feedback {} captured {primitives} primitives",
            self.handle.raw()
        );
        Ok(primitives)
    }

    /// Whether a capture is open.
    pub fn is_capturing(&self) -> bool {
        self.primitive.get().is_some()
    }

    /// Vertices written by the last finished capture.
    pub fn captured_vertices(&self) -> u32 {
        self.captured.get()
    }

    /// Releases the buffers and deletes both native objects.
    pub fn destroy(&mut self) {
        self.buffers.clear();
        self.query.destroy();
        self.handle.destroy();
    }
}

fn vertices_per_primitive(primitive: u32) -> u32 {
    match primitive {
        glow::LINES => 2,
        glow::TRIANGLES => 3,
        _ => 1,
    }
}
