//! Compute dispatch.

use std::rc::Rc;

use glam::UVec3;

use crate::abs::{Buffer, BufferTarget, EntryPoint, Gl, ShaderProgram, ShaderStage};
use crate::error::{GlError, Result};

/// A compute program and the indexed buffers it reads and writes.
#[derive(Debug)]
pub struct ComputeUnit {
    gl: Gl,
    program: Rc<ShaderProgram>,
    bindings: Vec<(BufferTarget, u32, Rc<Buffer>)>,
}

impl ComputeUnit {
    /// Wraps `program`, which must have a compute stage.
    pub fn new(gl: &Gl, program: Rc<ShaderProgram>) -> Result<Self> {
        gl.require(EntryPoint::DISPATCH_COMPUTE)?;
        gl.require(EntryPoint::MEMORY_BARRIER)?;
        gl.require(EntryPoint::BIND_BUFFER_BASE)?;
        if !program.has_stage(ShaderStage::Compute) {
            return Err(GlError::InvalidArgument(
                "compute units need a program with a compute stage".to_string(),
            ));
        }
        Ok(Self {
            gl: gl.clone(),
            program,
            bindings: Vec::new(),
        })
    }

    /// The compute program.
    pub fn program(&self) -> &Rc<ShaderProgram> {
        &self.program
    }

    /// Binds `buffer` to shader storage block `index` for every dispatch.
    pub fn bind_storage(&mut self, index: u32, buffer: Rc<Buffer>) {
        self.set_binding(BufferTarget::ShaderStorage, index, buffer);
    }

    /// Binds `buffer` to uniform block `index` for every dispatch.
    pub fn bind_uniform_block(&mut self, index: u32, buffer: Rc<Buffer>) {
        self.set_binding(BufferTarget::Uniform, index, buffer);
    }

    /// The buffer bound at `index` of `target`.
    pub fn binding(&self, target: BufferTarget, index: u32) -> Option<&Rc<Buffer>> {
        self.bindings
            .iter()
            .find(|(t, i, _)| *t == target && *i == index)
            .map(|(_, _, buffer)| buffer)
    }

    /// Runs `groups` work groups. `setup` runs with the program bound.
    /// Writes are made visible to vertex fetching and later dispatches
    /// before this returns.
    pub fn dispatch(
        &self,
        groups: UVec3,
        setup: impl FnOnce(&ShaderProgram) -> Result<()>,
    ) -> Result<()> {
        self.program.bind()?;
        let dispatched = self.dispatch_bound(groups, setup);
        for (target, index, _) in self.bindings.iter().rev() {
            self.gl.bind_buffer_base(target.gl(), *index, 0);
        }
        self.program.unbind()?;
        dispatched
    }

    fn dispatch_bound(
        &self,
        groups: UVec3,
        setup: impl FnOnce(&ShaderProgram) -> Result<()>,
    ) -> Result<()> {
        setup(&self.program)?;
        for (target, index, buffer) in &self.bindings {
            buffer.bind_base(*target, *index)?;
        }
        self.gl.dispatch_compute(groups.x, groups.y, groups.z);
        self.gl.check("glDispatchCompute", || {
            format!("{}, {}, {}", groups.x, groups.y, groups.z)
        })?;
        self.gl.memory_barrier(
            glow::SHADER_STORAGE_BARRIER_BIT
                | glow::VERTEX_ATTRIB_ARRAY_BARRIER_BIT
                | glow::UNIFORM_BARRIER_BIT,
        );
        Ok(())
    }

    fn set_binding(&mut self, target: BufferTarget, index: u32, buffer: Rc<Buffer>) {
        self.bindings.retain(|(t, i, _)| !(*t == target && *i == index));
        self.bindings.push((target, index, buffer));
    }
}
