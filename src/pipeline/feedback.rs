//! Double-buffered transform feedback.
//!
//! Two symmetric buffer sets take turns: each frame the capture unit reads
//! set `current` with rasterization off and writes its outputs into the
//! other set, the presentation unit draws the set that was just written,
//! and then the roles swap. [`PingPong`] tracks the roles and phase order.

use std::rc::Rc;

use gltree_core::{FeedbackPhase, FrameRoles, PingPong};

use crate::abs::{
    AttributeMap, DrawMode, FeedbackMode, Gl, RenderUnit, RenderUnitBuilder, ShaderProgram,
    TransformFeedback,
};
use crate::error::{GlError, Result};

/// Two buffer sets updated by transform feedback in alternation and drawn after each update.
#[derive(Debug)]
pub struct FeedbackPipeline {
    gl: Gl,
    /// `capture[i]` reads set `i`.
    capture: [RenderUnit; 2],
    /// `present[i]` draws set `i`.
    present: [RenderUnit; 2],
    /// `feedback[i]` writes into set `i`.
    feedback: [TransformFeedback; 2],
    state: PingPong,
}

impl FeedbackPipeline {
    /// Builds the four render units and two feedback objects.
    ///
    /// `capture_program` must declare transform feedback varyings. In
    /// separate mode varying `k` is written to the buffer mapped to
    /// `varying_attributes[k]` in each set; in interleaved mode all of them
    /// go to the single buffer named there. The sets are moved in and
    /// never handed back out.
    pub fn new(
        gl: &Gl,
        capture_program: Rc<ShaderProgram>,
        present_program: Rc<ShaderProgram>,
        sets: [AttributeMap; 2],
        varying_attributes: &[&str],
        present_mode: DrawMode,
    ) -> Result<Self> {
        let varyings = capture_program.feedback_varyings().len();
        let expected = match capture_program.feedback_mode() {
            FeedbackMode::Separate => varyings,
            FeedbackMode::Interleaved => varyings.min(1),
        };
        if varyings == 0 || varying_attributes.len() != expected {
            return Err(GlError::InvalidArgument(format!(
                "capture program has {varyings} feedback varyings ({:?}), \
                 which needs {expected} destination attributes, got {}",
                capture_program.feedback_mode(),
                varying_attributes.len()
            )));
        }

        let [first, second] = sets;
        let build = |set: AttributeMap| -> Result<(RenderUnit, RenderUnit, TransformFeedback)> {
            let mut feedback = TransformFeedback::new(gl)?;
            for (index, name) in varying_attributes.iter().enumerate() {
                let buffer = set.get(name).ok_or_else(|| {
                    GlError::InvalidArgument(format!(
                        "feedback destination `{name}` is missing from a buffer set"
                    ))
                })?;
                feedback.bind_buffer(index as u32, Rc::clone(buffer))?;
            }
            let capture = RenderUnitBuilder::new(Rc::clone(&capture_program), set.clone())
                .mode(DrawMode::Points)
                .build(gl)?;
            let present = RenderUnitBuilder::new(Rc::clone(&present_program), set)
                .mode(present_mode)
                .build(gl)?;
            Ok((capture, present, feedback))
        };
        let (capture0, present0, feedback0) = build(first)?;
        let (capture1, present1, feedback1) = build(second)?;

        log::debug!(
            "feedback pipeline over {} vertices per set",
            capture0.vertex_count().min(capture1.vertex_count())
        );
        Ok(Self {
            gl: gl.clone(),
            capture: [capture0, capture1],
            present: [present0, present1],
            feedback: [feedback0, feedback1],
            state: PingPong::new(),
        })
    }

    /// Makes set `index` the first one read.
    pub fn start_at(mut self, index: usize) -> Result<Self> {
        self.state = PingPong::starting_at(index)?;
        Ok(self)
    }

    /// The set the next capture reads.
    pub fn current(&self) -> usize {
        self.state.current()
    }

    /// The phase the next call must match.
    pub fn phase(&self) -> FeedbackPhase {
        self.state.phase()
    }

    /// Frames completed so far.
    pub fn frames(&self) -> u64 {
        self.state.frames()
    }

    /// Vertices last captured into set `index`.
    pub fn captured_vertices(&self, index: usize) -> Option<u32> {
        self.feedback.get(index).map(TransformFeedback::captured_vertices)
    }

    #[cfg(test)]
    fn feedback(&self, index: usize) -> Option<&TransformFeedback> {
        self.feedback.get(index)
    }

    /// Idle -> Capturing: runs the capture unit for set `current` into the
    /// other set with rasterization disabled. On failure the frame is
    /// dropped and nothing toggles.
    pub fn capture(
        &mut self,
        setup: impl FnOnce(&ShaderProgram) -> Result<()>,
    ) -> Result<FrameRoles> {
        let roles = self.state.begin_capture()?;
        self.gl.enable(glow::RASTERIZER_DISCARD);
        let captured = self.capture[roles.read].render_with(Some(&self.feedback[roles.write]), setup);
        self.gl.disable(glow::RASTERIZER_DISCARD);

        if let Err(err) = captured {
            log::error!("feedback capture from set {} failed: {err}", roles.read);
            self.state.abort();
            return Err(err);
        }
        log::trace!(
            "captured {} vertices into set {}",
            self.feedback[roles.write].captured_vertices(),
            roles.write
        );
        Ok(roles)
    }

    /// Capturing -> Presenting: draws the set just written with the vertex
    /// count captured into it. Returns that set.
    pub fn present(&mut self, setup: impl FnOnce(&ShaderProgram) -> Result<()>) -> Result<usize> {
        let set = self.state.begin_present()?;
        if let Err(err) = self.present[set].render_captured(&self.feedback[set], setup) {
            self.state.abort();
            return Err(err);
        }
        Ok(set)
    }

    /// Presenting -> Idle: swaps the sets. Returns the new `current`.
    pub fn swap(&mut self) -> Result<usize> {
        Ok(self.state.finish()?)
    }

    /// Capture, present and swap.
    pub fn run_frame(
        &mut self,
        capture_setup: impl FnOnce(&ShaderProgram) -> Result<()>,
        present_setup: impl FnOnce(&ShaderProgram) -> Result<()>,
    ) -> Result<FrameRoles> {
        let roles = self.capture(capture_setup)?;
        self.present(present_setup)?;
        self.swap()?;
        Ok(roles)
    }
}
