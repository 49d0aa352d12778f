//! Stream fragments and their reassembly into a complete reply

use bytes::Bytes;

use crate::protocol::{ChatResponse, StreamChunk};

/// One incremental piece of an assistant reply
///
/// In pass-through mode only `raw` is populated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFragment {
    /// Role delta, when the frame carried a non-empty one
    pub role: Option<String>,
    /// Content delta, when the frame carried a non-empty one
    pub content: Option<String>,
    /// The upstream line this fragment was decoded from, byte for byte
    pub raw: Bytes,
}

impl StreamFragment {
    /// Fragment that only carries an undecoded upstream line
    pub const fn raw(line: Bytes) -> Self {
        Self {
            role: None,
            content: None,
            raw: line,
        }
    }

    pub(crate) fn from_chunk(chunk: &StreamChunk, line: Bytes) -> Self {
        let delta = chunk.choices.first().map(|choice| &choice.delta);

        Self {
            role: delta.and_then(|d| d.role.clone()).filter(|r| !r.is_empty()),
            content: delta.and_then(|d| d.content.clone()).filter(|c| !c.is_empty()),
            raw: line,
        }
    }
}

/// A reconstructed reply choice
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledChoice {
    pub role: String,
    pub content: String,
    pub finish_reason: Option<String>,
}

/// Terminal value of one completion session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssembledResult {
    pub id: String,
    pub model: String,
    pub object: String,
    pub created: u64,
    /// Upstream payload text the result was built from
    pub raw: String,
    pub choices: Vec<AssembledChoice>,
}

impl AssembledResult {
    /// Result taken directly from a non-streaming response
    pub fn from_response(response: ChatResponse, raw: String) -> Self {
        let choices = response
            .choices
            .into_iter()
            .map(|choice| AssembledChoice {
                role: choice.message.role,
                content: choice.message.content,
                finish_reason: choice.finish_reason,
            })
            .collect();

        Self {
            id: response.id,
            model: response.model,
            object: response.object,
            created: response.created,
            raw,
            choices,
        }
    }

    /// First choice, if the upstream produced any
    pub fn first_choice(&self) -> Option<&AssembledChoice> {
        self.choices.first()
    }
}

/// Running fold over decoded stream frames
///
/// Metadata is folded the way existing clients expect to see it: `id`,
/// `model` and `object` are the concatenation of every frame's value and
/// `created` is the sum of every frame's timestamp.
#[derive(Debug, Default)]
pub struct Assembler {
    role: String,
    content: String,
    result: AssembledResult,
}

impl Assembler {
    /// Fold one decoded frame; `payload` is its JSON text
    pub fn fold(&mut self, chunk: &StreamChunk, payload: &str) {
        if let Some(delta) = chunk.choices.first().map(|c| &c.delta) {
            if self.role.is_empty()
                && let Some(role) = delta.role.as_deref()
            {
                role.clone_into(&mut self.role);
            }
            if let Some(content) = delta.content.as_deref() {
                self.content.push_str(content);
            }
        }

        self.result.raw.push_str(payload);
        self.result.id.push_str(&chunk.id);
        self.result.model.push_str(&chunk.model);
        self.result.object.push_str(&chunk.object);
        self.result.created = self.result.created.wrapping_add(chunk.created);
    }

    /// Close the fold
    ///
    /// A single `stop` choice is synthesized only when some frame carried
    /// an id; otherwise the result has no choices.
    pub fn finish(self) -> AssembledResult {
        let mut result = self.result;

        if !result.id.is_empty() {
            result.choices.push(AssembledChoice {
                role: self.role,
                content: self.content,
                finish_reason: Some("stop".to_owned()),
            });
        }

        result
    }
}
