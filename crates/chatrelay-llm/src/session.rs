//! One upstream invocation per request, from context to persisted reply

use std::sync::Arc;

use bytes::Bytes;
use chatrelay_config::UpstreamConfig;
use chatrelay_store::{Conversation, ConversationStore, NewMessage, Role, StoredMessage};
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio_util::task::AbortOnDropHandle;

use crate::assemble::{AssembledResult, StreamFragment};
use crate::context::{ContextBuilder, LongMessagePolicy};
use crate::error::LlmError;
use crate::parser::{ParseMode, UpstreamStreamParser};
use crate::request::{CompletionRequest, SamplingParams};
use crate::upstream::{OpenAiUpstream, Upstream};

/// Fragments travel through a single-slot channel so the producer never
/// runs more than one fragment ahead of the client.
const SINK_CAPACITY: usize = 1;

/// Runs completions against the upstream and persists their results
#[derive(Clone)]
pub struct CompletionSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    upstream: Arc<dyn Upstream>,
    store: Arc<dyn ConversationStore>,
    user: String,
    default_model: String,
}

/// A streaming completion running in the background
///
/// Dropping the reply aborts the producer task and with it the upstream
/// connection.
pub struct StreamingReply<T> {
    /// Conversation the reply belongs to, absent in pass-through mode
    pub conversation_id: Option<u64>,
    /// Fragments in upstream order; closes when the upstream is exhausted
    pub fragments: mpsc::Receiver<StreamFragment>,
    /// Terminal value, ready once `fragments` has closed
    pub outcome: AbortOnDropHandle<Result<T, LlmError>>,
}

impl<T> StreamingReply<T> {
    /// Wait for the producer task and return its terminal value
    pub async fn finish(self) -> Result<T, LlmError> {
        let Self { fragments, outcome, .. } = self;
        drop(fragments);
        joined(outcome.await)
    }
}

/// Flatten a finished producer task into its result
pub(crate) fn joined<T>(outcome: Result<Result<T, LlmError>, JoinError>) -> Result<T, LlmError> {
    outcome.map_err(|e| LlmError::Internal(anyhow::anyhow!("completion task failed: {e}")))?
}

impl CompletionSession {
    /// Build a session talking to the configured OpenAI-compatible upstream
    ///
    /// Fails closed when the credential, model or transport settings are
    /// unusable.
    pub fn new(
        config: &UpstreamConfig,
        user: impl Into<String>,
        store: Arc<dyn ConversationStore>,
    ) -> Result<Self, LlmError> {
        if config.model.trim().is_empty() {
            return Err(LlmError::Configuration("upstream model is empty".to_owned()));
        }

        let upstream = OpenAiUpstream::new(config)?;
        tracing::debug!(url = upstream.url(), model = %config.model, "configured upstream");

        Ok(Self::with_upstream(Arc::new(upstream), store, user, config.model.clone()))
    }

    /// Build a session over an arbitrary upstream
    pub fn with_upstream(
        upstream: Arc<dyn Upstream>,
        store: Arc<dyn ConversationStore>,
        user: impl Into<String>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                upstream,
                store,
                user: user.into(),
                default_model: default_model.into(),
            }),
        }
    }

    /// Model used when a conversation does not name one
    pub fn default_model(&self) -> &str {
        &self.inner.default_model
    }

    /// Build the upstream request for a conversation snapshot
    pub fn build_request(
        &self,
        conversation: &Conversation,
        policy: LongMessagePolicy,
        stream: bool,
        params: SamplingParams,
    ) -> Result<CompletionRequest, LlmError> {
        let model = if conversation.model.is_empty() {
            self.inner.default_model.clone()
        } else {
            conversation.model.clone()
        };

        if model.is_empty() {
            return Err(LlmError::Configuration("no model configured".to_owned()));
        }

        let messages = ContextBuilder::new(policy).build(&conversation.messages)?;

        Ok(CompletionRequest {
            model,
            messages,
            user: self.inner.user.clone(),
            stream,
            params,
            raw_body: None,
        })
    }

    /// Run one upstream invocation
    ///
    /// Without a sink the response is fetched in one piece and must carry
    /// at least one choice. With a sink every fragment is pushed in
    /// upstream order and the sink is closed when the stream ends; a result
    /// without choices is left for the caller to reject.
    pub async fn run(
        &self,
        request: &CompletionRequest,
        sink: Option<mpsc::Sender<StreamFragment>>,
    ) -> Result<AssembledResult, LlmError> {
        let Some(tx) = sink else {
            let (response, body) = self.inner.upstream.complete(request).await?;
            let result = AssembledResult::from_response(response, body);

            if result.choices.is_empty() {
                return Err(LlmError::EmptyCompletion);
            }

            return Ok(result);
        };

        let mode = if request.is_pass_through() {
            ParseMode::Raw
        } else {
            ParseMode::Decode
        };

        let source = tokio::select! {
            biased;
            () = tx.closed() => return Err(LlmError::ClientDisconnected),
            source = self.inner.upstream.open_stream(request) => source?,
        };

        let mut parser = UpstreamStreamParser::new(source, mode);
        let mut delivered = 0usize;

        loop {
            // Wait for the slot first so nothing is read from the upstream
            // while the client is still behind.
            let permit = tx.reserve().await.map_err(|_| LlmError::ClientDisconnected)?;

            let next = tokio::select! {
                biased;
                () = tx.closed() => return Err(LlmError::ClientDisconnected),
                next = parser.next_fragment() => next?,
            };

            match next {
                Some(fragment) => {
                    permit.send(fragment);
                    delivered += 1;
                }
                None => break,
            }
        }

        drop(tx);

        tracing::debug!(delivered, skipped = parser.skipped(), "upstream stream finished");

        Ok(parser.finish())
    }

    /// Complete a conversation in one piece and persist the reply
    pub async fn complete(
        &self,
        conversation: &Conversation,
        policy: LongMessagePolicy,
        params: SamplingParams,
    ) -> Result<StoredMessage, LlmError> {
        let request = self.build_request(conversation, policy, false, params)?;
        let result = self.run(&request, None).await?;

        self.persist(conversation.id, result).await
    }

    /// Start streaming a reply for a conversation
    ///
    /// Context errors are returned before anything is spawned. The reply is
    /// persisted by the background task once the upstream is exhausted.
    pub fn stream(
        &self,
        conversation: &Conversation,
        policy: LongMessagePolicy,
        params: SamplingParams,
    ) -> Result<StreamingReply<StoredMessage>, LlmError> {
        let request = self.build_request(conversation, policy, true, params)?;
        let conversation_id = conversation.id;
        let (tx, rx) = mpsc::channel(SINK_CAPACITY);
        let session = self.clone();

        let task = tokio::spawn(async move {
            let result = session.run(&request, Some(tx)).await?;
            session.persist(conversation_id, result).await
        });

        Ok(StreamingReply {
            conversation_id: Some(conversation_id),
            fragments: rx,
            outcome: AbortOnDropHandle::new(task),
        })
    }

    /// Forward a client-supplied body verbatim and relay the raw response
    pub fn pass_through(&self, body: Bytes) -> StreamingReply<AssembledResult> {
        let request = CompletionRequest::pass_through(body);
        let (tx, rx) = mpsc::channel(SINK_CAPACITY);
        let session = self.clone();

        let task = tokio::spawn(async move { session.run(&request, Some(tx)).await });

        StreamingReply {
            conversation_id: None,
            fragments: rx,
            outcome: AbortOnDropHandle::new(task),
        }
    }

    async fn persist(&self, conversation_id: u64, result: AssembledResult) -> Result<StoredMessage, LlmError> {
        let AssembledResult { raw, choices, .. } = result;

        let Some(choice) = choices.into_iter().next() else {
            tracing::warn!(conversation_id, "upstream produced no choices");
            return Err(LlmError::EmptyCompletion);
        };

        let message = NewMessage {
            role: Role::parse(&choice.role).unwrap_or(Role::Assistant),
            content: choice.content,
            raw,
        };

        let stored = self.inner.store.append_message(conversation_id, message).await?;

        tracing::info!(
            conversation_id,
            message_id = stored.id,
            length = stored.content.len(),
            "stored assistant reply"
        );

        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::io;
    use std::pin::Pin;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::{Context, Poll};
    use std::time::Duration;

    use async_trait::async_trait;
    use chatrelay_store::MemoryStore;
    use secrecy::SecretString;
    use tokio::io::{AsyncRead, AsyncWriteExt, BufReader, ReadBuf};

    use super::*;
    use crate::protocol::{ChatChoice, ChatMessage, ChatResponse};
    use crate::upstream::LineSource;

    /// Yields one line per read and counts how many were handed out
    struct LineReader {
        lines: VecDeque<Bytes>,
        read: Arc<AtomicUsize>,
    }

    impl AsyncRead for LineReader {
        fn poll_read(mut self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
            if let Some(line) = self.lines.pop_front() {
                self.read.fetch_add(1, Ordering::SeqCst);
                buf.put_slice(&line);
            }
            Poll::Ready(Ok(()))
        }
    }

    #[derive(Default)]
    struct FakeUpstream {
        stream: Mutex<Option<LineSource>>,
        response: Option<ChatResponse>,
        calls: AtomicUsize,
    }

    impl FakeUpstream {
        fn streaming(lines: &[String], read: Arc<AtomicUsize>) -> Self {
            let reader = LineReader {
                lines: lines.iter().map(|l| Bytes::from(l.clone())).collect(),
                read,
            };
            Self {
                stream: Mutex::new(Some(Box::new(BufReader::new(reader)))),
                ..Self::default()
            }
        }

        fn responding(response: ChatResponse) -> Self {
            Self {
                response: Some(response),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl Upstream for FakeUpstream {
        async fn complete(&self, _request: &CompletionRequest) -> Result<(ChatResponse, String), LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let response = self
                .response
                .clone()
                .ok_or_else(|| LlmError::Transport("connection refused".to_owned()))?;
            Ok((response, "{}".to_owned()))
        }

        async fn open_stream(&self, _request: &CompletionRequest) -> Result<LineSource, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.stream
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| LlmError::Transport("stream already taken".to_owned()))
        }
    }

    fn content_frame(content: &str) -> String {
        format!(
            "data: {}\n",
            serde_json::json!({
                "id": "chatcmpl-1",
                "object": "chat.completion.chunk",
                "created": 1,
                "model": "gpt-3.5-turbo",
                "choices": [{"index": 0, "delta": {"role": "assistant", "content": content}}],
            })
        )
    }

    async fn conversation_with(store: &MemoryStore, content: &str) -> Conversation {
        let app = store.add_application("demo", SecretString::from("app-key"));
        let conversation = store.create_conversation(app.id, "").await.unwrap();
        store
            .append_message(conversation.id, NewMessage::user(content))
            .await
            .unwrap();
        store.load_conversation(conversation.id).await.unwrap()
    }

    fn session(upstream: Arc<FakeUpstream>, store: Arc<MemoryStore>) -> CompletionSession {
        CompletionSession::with_upstream(upstream, store, "chatrelay", "gpt-3.5-turbo")
    }

    #[tokio::test]
    async fn streamed_reply_is_relayed_and_persisted() {
        let store = Arc::new(MemoryStore::new());
        let conversation = conversation_with(&store, "hello").await;
        let lines = [content_frame("Hi"), content_frame(" there"), "data: [DONE]\n".to_owned()];
        let upstream = Arc::new(FakeUpstream::streaming(&lines, Arc::default()));

        let session = session(upstream, store.clone());
        let mut reply = session
            .stream(&conversation, LongMessagePolicy::Skip, SamplingParams::default())
            .unwrap();

        let mut deltas = Vec::new();
        while let Some(fragment) = reply.fragments.recv().await {
            deltas.push(fragment.content.unwrap_or_default());
        }
        assert_eq!(deltas, ["Hi", " there"]);

        let stored = reply.finish().await.unwrap();
        assert_eq!(stored.content, "Hi there");
        assert_eq!(stored.role, Role::Assistant);
        assert_eq!(store.message_count(conversation.id), 2);
    }

    #[tokio::test]
    async fn producer_waits_for_the_consumer() {
        let store = Arc::new(MemoryStore::new());
        let conversation = conversation_with(&store, "hello").await;
        let read = Arc::new(AtomicUsize::new(0));
        let lines: Vec<String> = (0..5).map(|i| content_frame(&i.to_string())).collect();
        let upstream = Arc::new(FakeUpstream::streaming(&lines, read.clone()));

        let session = session(upstream, store.clone());
        let mut reply = session
            .stream(&conversation, LongMessagePolicy::Skip, SamplingParams::default())
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(read.load(Ordering::SeqCst), 1);
        assert!(!reply.outcome.is_finished());

        let mut received = 0;
        while reply.fragments.recv().await.is_some() {
            received += 1;
        }
        assert_eq!(received, 5);
        assert_eq!(read.load(Ordering::SeqCst), 5);
        assert_eq!(reply.finish().await.unwrap().content, "01234");
    }

    #[tokio::test]
    async fn closing_the_sink_cancels_the_producer() {
        let store = Arc::new(MemoryStore::new());
        let conversation = conversation_with(&store, "hello").await;

        // Upstream that never sends anything while the writer is alive
        let (client, _server) = tokio::io::duplex(64);
        let upstream = Arc::new(FakeUpstream {
            stream: Mutex::new(Some(Box::new(BufReader::new(client)))),
            ..FakeUpstream::default()
        });

        let session = session(upstream, store.clone());
        let reply = session
            .stream(&conversation, LongMessagePolicy::Skip, SamplingParams::default())
            .unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), reply.finish()).await.unwrap();
        assert!(matches!(result, Err(LlmError::ClientDisconnected)));
        assert_eq!(store.message_count(conversation.id), 1);
    }

    #[tokio::test]
    async fn dropping_the_reply_closes_the_upstream() {
        let store = Arc::new(MemoryStore::new());
        let conversation = conversation_with(&store, "hello").await;

        let (client, mut server) = tokio::io::duplex(64);
        let upstream = Arc::new(FakeUpstream {
            stream: Mutex::new(Some(Box::new(BufReader::new(client)))),
            ..FakeUpstream::default()
        });

        let session = session(upstream, store.clone());
        let reply = session
            .stream(&conversation, LongMessagePolicy::Skip, SamplingParams::default())
            .unwrap();

        // keep-alive lines are read and skipped while the producer waits for data
        server.write_all(b"\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        drop(reply);

        let closed = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if server.write_all(b"\n").await.is_err() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;

        assert!(closed.is_ok(), "upstream stayed open after the reply was dropped");
        assert_eq!(store.message_count(conversation.id), 1);
    }

    #[tokio::test]
    async fn zero_choice_response_is_an_empty_completion() {
        let store = Arc::new(MemoryStore::new());
        let conversation = conversation_with(&store, "hello").await;
        let upstream = Arc::new(FakeUpstream::responding(ChatResponse {
            id: "chatcmpl-2".to_owned(),
            object: "chat.completion".to_owned(),
            created: 1,
            model: "gpt-3.5-turbo".to_owned(),
            choices: Vec::new(),
            usage: None,
        }));

        let session = session(upstream, store.clone());
        let err = session
            .complete(&conversation, LongMessagePolicy::Skip, SamplingParams::default())
            .await
            .unwrap_err();

        assert!(matches!(err, LlmError::EmptyCompletion));
        assert_eq!(store.message_count(conversation.id), 1);
    }

    #[tokio::test]
    async fn blocking_reply_is_persisted() {
        let store = Arc::new(MemoryStore::new());
        let conversation = conversation_with(&store, "hello").await;
        let upstream = Arc::new(FakeUpstream::responding(ChatResponse {
            id: "chatcmpl-3".to_owned(),
            object: "chat.completion".to_owned(),
            created: 1,
            model: "gpt-3.5-turbo".to_owned(),
            choices: vec![ChatChoice {
                index: 0,
                message: ChatMessage::new("assistant", "Hello!"),
                finish_reason: Some("stop".to_owned()),
            }],
            usage: None,
        }));

        let session = session(upstream, store.clone());
        let stored = session
            .complete(&conversation, LongMessagePolicy::Skip, SamplingParams::default())
            .await
            .unwrap();

        assert_eq!(stored.content, "Hello!");
        assert_eq!(store.message_count(conversation.id), 2);
    }

    #[tokio::test]
    async fn stream_of_garbage_is_an_empty_completion() {
        let store = Arc::new(MemoryStore::new());
        let conversation = conversation_with(&store, "hello").await;
        let lines = ["data: {\"error\":\"overloaded\"}\n".to_owned(), "data: [DONE]\n".to_owned()];
        let upstream = Arc::new(FakeUpstream::streaming(&lines, Arc::default()));

        let session = session(upstream, store.clone());
        let mut reply = session
            .stream(&conversation, LongMessagePolicy::Skip, SamplingParams::default())
            .unwrap();

        assert!(reply.fragments.recv().await.is_none());
        assert!(matches!(reply.finish().await, Err(LlmError::EmptyCompletion)));
        assert_eq!(store.message_count(conversation.id), 1);
    }

    #[tokio::test]
    async fn over_budget_context_is_rejected_before_the_upstream_is_called() {
        let store = Arc::new(MemoryStore::new());
        let conversation = conversation_with(&store, &"x".repeat(5000)).await;
        let upstream = Arc::new(FakeUpstream::default());

        let session = session(upstream.clone(), store);
        let err = session
            .complete(&conversation, LongMessagePolicy::Reject, SamplingParams::default())
            .await
            .unwrap_err();

        assert!(matches!(err, LlmError::ContextTooLong { limit: 4500, .. }));
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn conversation_model_overrides_default() {
        let store = Arc::new(MemoryStore::new());
        let mut conversation = conversation_with(&store, "hello").await;
        let session = session(Arc::new(FakeUpstream::default()), store);

        let request = session
            .build_request(&conversation, LongMessagePolicy::Skip, true, SamplingParams::default())
            .unwrap();
        assert_eq!(request.model, "gpt-3.5-turbo");
        assert_eq!(request.user, "chatrelay");

        conversation.model = "gpt-4".to_owned();
        let request = session
            .build_request(&conversation, LongMessagePolicy::Skip, false, SamplingParams::default())
            .unwrap();
        assert_eq!(request.model, "gpt-4");
        assert!(!request.stream);
    }
}
