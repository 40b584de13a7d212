//! The GL-free core of gltree. This crate holds everything that does not
//! talk to the native graphics API: the scene-node tree and its traversal
//! contract, the ping-pong state machine used by feedback pipelines, and
//! the render configuration.

pub mod config;
pub mod pingpong;
pub mod scene;

pub use config::{ConfigError, FeedbackConfig, LogConfig, RenderConfig};
pub use pingpong::{FeedbackPhase, FrameRoles, PhaseError, PingPong};
pub use scene::*;
