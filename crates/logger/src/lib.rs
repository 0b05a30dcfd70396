//! Process-wide tracing setup shared by the agent binaries.

mod subscriber;

pub use subscriber::{LogFormat, init, init_with};
