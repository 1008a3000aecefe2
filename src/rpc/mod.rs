//! JSON-RPC plumbing shared by the stream and the side channel.

pub mod correlator;
pub mod dispatcher;
pub mod message;
pub mod methods;
