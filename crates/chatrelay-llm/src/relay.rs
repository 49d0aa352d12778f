//! Downstream relay of streamed fragments as `data:` lines
//!
//! Each fragment becomes one `data: {"status":"ok","code":200,"data":...}`
//! line, yielded on its own so the HTTP body flushes it before the next
//! fragment is taken from the session.

use std::convert::Infallible;

use bytes::{BufMut, Bytes, BytesMut};
use chatrelay_core::{Envelope, ErrorEnvelope};
use chatrelay_store::StoredMessage;
use futures_util::{Stream, stream};
use serde::Serialize;

use crate::assemble::{AssembledResult, StreamFragment};
use crate::error::LlmError;
use crate::session::StreamingReply;

const DATA_PREFIX: &[u8] = b"data: ";
const DONE_LINE: &[u8] = b"data: [DONE]\n";
const ENCODE_FAILURE_LINE: &[u8] = b"data: {\"status\":\"error\",\"code\":500,\"type\":\"internal_error\"}\n";

/// Fragment as seen by the client: an unsaved message under the conversation
#[derive(Debug, Serialize)]
struct FragmentMessage<'a> {
    id: u64,
    chat_id: u64,
    role: &'a str,
    content: &'a str,
}

enum RelayState<T> {
    Streaming(StreamingReply<T>),
    Trailer,
    Done,
}

/// Relay a conversation reply
///
/// After the last fragment the stored message is sent once more with its
/// content cleared, followed by `data: [DONE]`. A failed session ends the
/// stream with a single error envelope and no `[DONE]`.
pub fn relay(reply: StreamingReply<StoredMessage>) -> impl Stream<Item = Result<Bytes, Infallible>> + Send {
    let chat_id = reply.conversation_id.unwrap_or_default();

    stream::unfold(RelayState::Streaming(reply), move |state| async move {
        match state {
            RelayState::Streaming(mut reply) => {
                if let Some(fragment) = reply.fragments.recv().await {
                    let line = fragment_line(chat_id, &fragment);
                    return Some((Ok(line), RelayState::Streaming(reply)));
                }

                match reply.finish().await {
                    Ok(mut message) => {
                        message.content.clear();
                        Some((Ok(data_line(&Envelope::ok(message))), RelayState::Trailer))
                    }
                    Err(e) => Some((Ok(error_line(chat_id, &e)), RelayState::Done)),
                }
            }
            RelayState::Trailer => Some((Ok(Bytes::from_static(DONE_LINE)), RelayState::Done)),
            RelayState::Done => None,
        }
    })
}

/// Relay a pass-through reply byte for byte
///
/// Nothing is added around the upstream lines. An error envelope is only
/// written when the session failed before a single line was relayed.
pub fn relay_raw(reply: StreamingReply<AssembledResult>) -> impl Stream<Item = Result<Bytes, Infallible>> + Send {
    stream::unfold((Some(reply), 0usize), |(state, delivered)| async move {
        let mut reply = state?;

        if let Some(fragment) = reply.fragments.recv().await {
            return Some((Ok(fragment.raw), (Some(reply), delivered + 1)));
        }

        match reply.finish().await {
            Ok(_) => None,
            Err(e) if delivered == 0 => Some((Ok(error_line(0, &e)), (None, delivered))),
            Err(e) => {
                tracing::warn!(error = %e, delivered, "pass-through stream ended with an error");
                None
            }
        }
    })
}

fn fragment_line(chat_id: u64, fragment: &StreamFragment) -> Bytes {
    let message = FragmentMessage {
        id: 0,
        chat_id,
        role: fragment.role.as_deref().unwrap_or_default(),
        content: fragment.content.as_deref().unwrap_or_default(),
    };

    data_line(&Envelope::ok(message))
}

fn error_line(chat_id: u64, error: &LlmError) -> Bytes {
    match error {
        LlmError::ClientDisconnected => tracing::debug!(chat_id, "client went away during relay"),
        e => tracing::warn!(chat_id, error = %e, "completion failed during relay"),
    }

    data_line(&ErrorEnvelope::from_error(error))
}

fn data_line(value: &impl Serialize) -> Bytes {
    let json = match serde_json::to_vec(value) {
        Ok(json) => json,
        Err(e) => {
            tracing::error!(error = %e, "failed to encode relay event");
            return Bytes::from_static(ENCODE_FAILURE_LINE);
        }
    };

    let mut line = BytesMut::with_capacity(DATA_PREFIX.len() + json.len() + 1);
    line.put_slice(DATA_PREFIX);
    line.put_slice(&json);
    line.put_u8(b'\n');
    line.freeze()
}
