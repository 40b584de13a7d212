//! Particle scene nodes.
//!
//! [`ParticleSystemNode`] advances particles with transform feedback and
//! draws them in the same frame. [`ParticleSimulationNode`] advances them
//! with a compute program pulled towards a set of moving attractors.

use std::rc::Rc;

use glam::{Mat4, UVec3, Vec4};
use gltree_core::{FrameContext, NodeTransform, Renderable};
use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::abs::{
    AttributeMap, Buffer, BufferTarget, BufferUsage, Gl, MapAccess, ShaderProgram, VertexFormat,
};
use crate::error::{GlError, Result};
use crate::pipeline::{ComputeUnit, FeedbackPipeline};

/// Attractors in the uniform block of the simulation program.
pub const ATTRACTOR_COUNT: usize = 64;
/// `local_size_x` the simulation program is expected to declare.
pub const WORK_GROUP_SIZE: u32 = 128;

/// Per-particle position (`w` is the remaining lifetime) and velocity.
#[derive(Debug, Clone)]
pub struct ParticleBuffers {
    pub positions: Rc<Buffer>,
    pub velocities: Rc<Buffer>,
}

impl ParticleBuffers {
    /// `count` particles scattered in the unit cube, seeded for repeatability.
    pub fn random(gl: &Gl, count: usize, seed: u64) -> Result<Self> {
        let (positions, velocities) = random_particles(count, seed);
        let buffer = |data: &[Vec4]| {
            Buffer::new(
                gl,
                BufferTarget::Array,
                VertexFormat::VEC4,
                data,
                BufferUsage::DynamicCopy,
            )
            .map(Rc::new)
        };
        Ok(Self {
            positions: buffer(&positions)?,
            velocities: buffer(&velocities)?,
        })
    }

    /// Number of particles.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Whether there are no particles.
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// The set as `inPosition` / `inVelocity` vertex inputs.
    pub fn attribute_map(&self) -> Result<AttributeMap> {
        AttributeMap::new()
            .with("inPosition", Rc::clone(&self.positions))?
            .with("inVelocity", Rc::clone(&self.velocities))
    }
}

fn random_particles(count: usize, seed: u64) -> (Vec<Vec4>, Vec<Vec4>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let positions = (0..count)
        .map(|_| {
            Vec4::new(
                rng.random_range(-1.0..=1.0),
                rng.random_range(-1.0..=1.0),
                rng.random_range(-1.0..=1.0),
                rng.random_range(0.0..=1.0),
            )
        })
        .collect();
    let velocities = (0..count)
        .map(|_| {
            Vec4::new(
                rng.random_range(-0.1..=0.1),
                rng.random_range(-0.1..=0.1),
                rng.random_range(-0.1..=0.1),
                0.0,
            )
        })
        .collect();
    (positions, velocities)
}

/// Runs one feedback frame per traversal.
///
/// The capture program receives `dt`; the presentation program receives
/// `mvpMatrix`, built from the innermost camera and the node's cascade
/// transform.
#[derive(Debug)]
pub struct ParticleSystemNode {
    pipeline: FeedbackPipeline,
}

impl ParticleSystemNode {
    /// Wraps a ready pipeline.
    pub fn new(pipeline: FeedbackPipeline) -> Self {
        Self { pipeline }
    }

    /// The pipeline driven by this node.
    pub fn pipeline(&self) -> &FeedbackPipeline {
        &self.pipeline
    }
}

impl Renderable<GlError> for ParticleSystemNode {
    fn before_children(&mut self, transform: &NodeTransform, ctx: &mut FrameContext) -> Result<()> {
        let view_projection = ctx.camera().map_or(Mat4::IDENTITY, |c| c.view_projection());
        let mvp = view_projection * transform.cascade;
        let dt = ctx.delta_time();
        self.pipeline.run_frame(
            |program| program.set_uniform("dt", dt).map(|_| ()),
            |program| program.set_uniform("mvpMatrix", mvp).map(|_| ()),
        )?;
        Ok(())
    }
}

/// Runs the particle compute program once per traversal.
#[derive(Debug)]
pub struct ParticleSimulationNode {
    compute: ComputeUnit,
    attractors: Rc<Buffer>,
    masses: Vec<f32>,
    groups: u32,
    time: f32,
}

impl ParticleSimulationNode {
    /// Velocities go to storage block 0, positions to block 1 and the
    /// attractors to uniform block 0.
    pub fn new(
        gl: &Gl,
        program: Rc<ShaderProgram>,
        particles: &ParticleBuffers,
        seed: u64,
    ) -> Result<Self> {
        let mut compute = ComputeUnit::new(gl, program)?;
        let attractors = Rc::new(Buffer::with_len(
            gl,
            BufferTarget::Uniform,
            VertexFormat::VEC4,
            ATTRACTOR_COUNT,
            BufferUsage::DynamicCopy,
        )?);
        compute.bind_storage(0, Rc::clone(&particles.velocities));
        compute.bind_storage(1, Rc::clone(&particles.positions));
        compute.bind_uniform_block(0, Rc::clone(&attractors));

        let mut rng = StdRng::seed_from_u64(seed);
        let masses = (0..ATTRACTOR_COUNT)
            .map(|_| rng.random_range(0.5..1.0))
            .collect();
        let groups = (particles.len() as u32).div_ceil(WORK_GROUP_SIZE);

        Ok(Self {
            compute,
            attractors,
            masses,
            groups,
            time: 0.0,
        })
    }

    /// Work groups per dispatch.
    pub fn groups(&self) -> u32 {
        self.groups
    }

    fn write_attractors(&mut self, dt: f32) -> Result<()> {
        self.time += dt;
        let attractors: Vec<Vec4> = self
            .masses
            .iter()
            .enumerate()
            .map(|(i, &mass)| {
                let (sin, cos) = (self.time + i as f32 * 0.1).sin_cos();
                Vec4::new(sin * 50.0, cos * 50.0, sin * cos * 5.0, mass)
            })
            .collect();

        let mut range = self.attractors.map_range(
            0,
            ATTRACTOR_COUNT,
            MapAccess::WRITE | MapAccess::INVALIDATE_BUFFER,
        )?;
        range.write(&attractors)?;
        range.unmap()
    }
}

impl Renderable<GlError> for ParticleSimulationNode {
    fn before_children(&mut self, _transform: &NodeTransform, ctx: &mut FrameContext) -> Result<()> {
        let dt = ctx.delta_time();
        self.write_attractors(dt)?;
        self.compute
            .dispatch(UVec3::new(self.groups, 1, 1), |program| {
                program.set_uniform("dt", dt).map(|_| ())
            })
    }
}
