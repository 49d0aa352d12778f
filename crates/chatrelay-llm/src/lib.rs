//! Streaming chat completion pipeline
//!
//! Builds a bounded context from stored conversation history, sends it to
//! an OpenAI-compatible upstream, parses the upstream's line-oriented event
//! stream into fragments, and relays those fragments to the client while
//! reassembling the complete reply for persistence.

#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

pub mod assemble;
pub mod context;
pub mod error;
#[cfg(feature = "http")]
pub mod handler;
pub mod params;
pub mod parser;
pub mod protocol;
pub mod relay;
pub mod request;
pub mod session;
pub mod upstream;

pub use assemble::{AssembledChoice, AssembledResult, StreamFragment};
pub use context::{CONTEXT_CHAR_BUDGET, ContextBuilder, LongMessagePolicy};
pub use error::LlmError;
#[cfg(feature = "http")]
pub use handler::{LlmState, open_router};
pub use params::ChatParams;
pub use parser::{DONE_SENTINEL, ParseMode, UpstreamStreamParser};
pub use relay::{relay, relay_raw};
pub use request::{CompletionRequest, SamplingParams};
pub use session::{CompletionSession, StreamingReply};
pub use upstream::{LineSource, OpenAiUpstream, Upstream};
