//! End-to-end scenarios wired through the public API: a real
//! `PersistenceRegistry` on a temp directory, a real `SemanticIndexRegistry`,
//! and fake gateway/embedding/LLM clients standing in for the network.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use parley_core::agent::{AgentConfig, ConversationAgent};
use parley_core::archiver::MessageArchiver;
use parley_core::embedding::EmbeddingClient;
use parley_core::error::TransportError;
use parley_core::gateway::{ChannelInfo, ChatGateway, OutboundMessage};
use parley_core::llm::{LlmError, LlmOutput, LlmQueue, LlmRequest, LlmResponse, RawLlmClient};
use parley_core::model::{AuthorId, ChannelId, MessageId, MessageRecord, ServerId};
use parley_core::persistence::PersistenceRegistry;
use parley_core::semantic::SemanticIndexRegistry;
use parley_core::snowflake::Snowflake;

const BOT_AUTHOR: u64 = 999;

struct NoopGateway {
    sent: Mutex<Vec<OutboundMessage>>,
}

impl NoopGateway {
    fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ChatGateway for NoopGateway {
    async fn send_message(&self, message: OutboundMessage) -> Result<MessageId, TransportError> {
        let id = Snowflake(1_000 + self.sent.lock().await.len() as u64);
        self.sent.lock().await.push(message);
        Ok(id)
    }

    async fn fetch_history(
        &self,
        _channel_id: ChannelId,
        _before: Option<MessageId>,
        _limit: u32,
    ) -> Result<Vec<MessageRecord>, TransportError> {
        Ok(Vec::new())
    }

    async fn known_channels(&self) -> Result<Vec<ChannelInfo>, TransportError> {
        Ok(Vec::new())
    }

    fn is_self(&self, author_id: AuthorId) -> bool {
        author_id == Snowflake(BOT_AUTHOR)
    }
}

/// Always returns a fixed-magnitude vector so `retrieve_relevant` never
/// blocks these scenarios on real embedding content.
struct StubEmbedder;

#[async_trait]
impl EmbeddingClient for StubEmbedder {
    async fn embed(
        &self,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>, parley_core::embedding::EmbeddingError> {
        Ok(texts
            .iter()
            .map(|_| vec![1.0; parley_core::model::EMBEDDING_DIM])
            .collect())
    }
}

/// An `RawLlmClient` whose response is chosen by inspecting the model name,
/// so the same client can stand in for both the pre-filter and generator
/// legs of a single test without extra wiring.
struct ScriptedLlmClient {
    calls: AtomicU64,
}

impl ScriptedLlmClient {
    fn new() -> Self {
        Self {
            calls: AtomicU64::new(0),
        }
    }
}

fn message_response(text: &str) -> LlmResponse {
    LlmResponse {
        id: "scripted".into(),
        status: "completed".into(),
        created_at: None,
        error: None,
        output: vec![LlmOutput::Message {
            text: text.to_string(),
            refused: false,
        }],
    }
}

#[async_trait]
impl RawLlmClient for ScriptedLlmClient {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let text = if request.model == "fast-model" {
            "Yes — the user asked about X."
        } else {
            "Sure, here's the answer."
        };
        Ok(message_response(text))
    }
}

struct RefusingPrefilterClient;

#[async_trait]
impl RawLlmClient for RefusingPrefilterClient {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse, LlmError> {
        let text = if request.model == "fast-model" {
            "No, off-topic."
        } else {
            "should never be called"
        };
        Ok(message_response(text))
    }
}

/// A backend that would otherwise answer normally — used to prove that once
/// `shutdown` has been called, submissions never reach it at all.
struct SlowLlmClient {
    calls: AtomicU64,
}

#[async_trait]
impl RawLlmClient for SlowLlmClient {
    async fn complete(&self, _request: LlmRequest) -> Result<LlmResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        Ok(message_response("too late"))
    }
}

fn incoming(id: u64, author_id: u64, author: &str, content: &str) -> MessageRecord {
    MessageRecord {
        server_id: Snowflake(1),
        channel_id: Snowflake(2),
        message_id: Snowflake(id),
        author_id: Snowflake(author_id),
        author_user_name: author.to_lowercase(),
        author_global_name: author.to_string(),
        timestamp_unix_ms: 0,
        timestamp_human_readable: "2024-01-01 00:00:00".into(),
        content: content.to_string(),
    }
}

fn test_agent_config() -> AgentConfig {
    AgentConfig::new(
        "fast-model",
        "primary-model",
        "Decide whether to respond.",
        "You are a helpful participant in this chat.",
    )
}

/// Scenario 5 (`spec.md` §8): the pre-filter says yes, so the agent proceeds
/// to generate and send exactly one reply.
#[tokio::test]
async fn decision_gate_generates_a_reply_when_prefilter_says_yes() {
    let working_dir = tempfile::tempdir().unwrap();
    let persistence = Arc::new(PersistenceRegistry::new(working_dir.path().to_path_buf()));
    let semantic = Arc::new(SemanticIndexRegistry::new());
    let archiver = Arc::new(MessageArchiver::new(persistence, semantic, Arc::new(StubEmbedder)));

    let llm = LlmQueue::spawn(Arc::new(ScriptedLlmClient::new()));
    let gateway = Arc::new(NoopGateway::new());
    let agent = ConversationAgent::new(archiver, llm, gateway.clone(), test_agent_config());

    let trigger = incoming(100, 10, "Alice", "what do you think about X?");
    agent.handle_incoming_message(trigger).await.unwrap();

    let sent = gateway.sent.lock().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].content, "Sure, here's the answer.");
}

/// Scenario 5's negative half: the pre-filter says no, so the agent sends
/// nothing and never calls the generator.
#[tokio::test]
async fn decision_gate_sends_nothing_when_prefilter_says_no() {
    let working_dir = tempfile::tempdir().unwrap();
    let persistence = Arc::new(PersistenceRegistry::new(working_dir.path().to_path_buf()));
    let semantic = Arc::new(SemanticIndexRegistry::new());
    let archiver = Arc::new(MessageArchiver::new(persistence, semantic, Arc::new(StubEmbedder)));

    let llm = LlmQueue::spawn(Arc::new(RefusingPrefilterClient));
    let gateway = Arc::new(NoopGateway::new());
    let agent = ConversationAgent::new(archiver, llm, gateway.clone(), test_agent_config());

    let trigger = incoming(100, 10, "Alice", "unrelated chatter");
    agent.handle_incoming_message(trigger).await.unwrap();

    assert!(gateway.sent.lock().await.is_empty());
}

/// The agent's own messages are still recorded (so they can act as
/// role-switching markers in later history) but never trigger a reply.
#[tokio::test]
async fn own_messages_are_archived_but_never_answered() {
    let working_dir = tempfile::tempdir().unwrap();
    let persistence = Arc::new(PersistenceRegistry::new(working_dir.path().to_path_buf()));
    let semantic = Arc::new(SemanticIndexRegistry::new());
    let archiver = Arc::new(MessageArchiver::new(
        persistence.clone(),
        semantic,
        Arc::new(StubEmbedder),
    ));

    let llm = LlmQueue::spawn(Arc::new(ScriptedLlmClient::new()));
    let gateway = Arc::new(NoopGateway::new());
    let agent = ConversationAgent::new(archiver, llm, gateway.clone(), test_agent_config());

    let own_message = incoming(50, BOT_AUTHOR, "Parley", "I already replied once.");
    agent.handle_incoming_message(own_message).await.unwrap();

    assert!(gateway.sent.lock().await.is_empty());
    let store = persistence.get_or_create(Snowflake(1)).unwrap();
    assert!(store.find_message(Snowflake(2), Snowflake(50)).unwrap().is_some());
}

/// Scenario 6 (`spec.md` §8): every future submitted after shutdown still
/// resolves, with `response_ok() == false`, instead of hanging forever or
/// reaching the backend.
#[tokio::test]
async fn shutdown_drains_every_pending_submission_with_a_failure_response() {
    let client = Arc::new(SlowLlmClient {
        calls: AtomicU64::new(0),
    });
    let queue = LlmQueue::spawn(client.clone());
    queue.shutdown();

    let results: Vec<LlmResponse> = futures::future::join_all((0..5).map(|i| {
        queue.submit(LlmRequest {
            model: "fast-model".into(),
            instructions: "gate".into(),
            history: Vec::new(),
            request: format!("request {i}"),
        })
    }))
    .await;

    for response in results {
        assert!(!response.response_ok());
    }
    assert_eq!(client.calls.load(Ordering::SeqCst), 0);
}
