#![forbid(unsafe_code)]

//! Client for MCP servers that stream replies over Server-Sent Events and
//! accept requests on a separate side channel.

pub mod config;
pub mod errors;
pub mod rpc;
pub mod session;
pub mod sse;

pub use config::ClientConfig;
pub use errors::{AppError, Result};
