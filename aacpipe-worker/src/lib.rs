//! # aacpipe Worker
//!
//! Responder side of the aacpipe protocol. The worker reads encoder settings
//! from its request pipe, configures an [`AacEngine`](aacpipe_media::AacEngine)
//! over whichever codec backend it was built with, and then answers encode,
//! extra-data and exit requests until the host hangs up.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod session;

pub use session::{serve, SessionSummary, WorkerError, WorkerResult};
