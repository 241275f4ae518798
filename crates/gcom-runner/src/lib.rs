//! Ground station runner.
//!
//! Hosts the companion link and the autopilot relay in one process,
//! configured from YAML with command-line overrides.

pub mod config;
pub mod ground;
pub mod logging;

pub use config::{ConfigError, GcomConfig, Overrides};
pub use ground::{GroundStation, LinkStats, Position, RunnerError};
