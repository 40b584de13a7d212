//! Multi-pass GPU work built from render units: the ping-pong feedback
//! pipeline, compute dispatch, and scene nodes driving both.

pub mod compute;
pub mod feedback;
pub mod particles;

pub use compute::*;
pub use feedback::*;
pub use particles::*;
