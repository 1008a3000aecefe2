//! Session lifecycle: precheck, handshake, supervision, and reporting.
//!
//! - `handshake`: one-shot session id resolution from the `endpoint` event.
//! - `health`: liveness precheck.
//! - `supervisor`: the connection state machine and protocol sequence.
//! - `report`: text rendering of a finished session.

pub mod handshake;
pub mod health;
pub mod report;
pub mod supervisor;
