//! Shared primitives for the chatrelay crates

#![allow(clippy::must_use_candidate)]

mod envelope;
mod error;

pub use envelope::{Envelope, ErrorEnvelope};
pub use error::HttpError;
