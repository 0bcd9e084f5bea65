//! Shared fixtures for unit tests: a scriptable in-process coordination
//! server speaking the framed wire protocol.

mod registry_server;

pub use registry_server::*;
