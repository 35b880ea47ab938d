//! The chat exchange: one user message in, one assistant reply out.
//!
//! [`ChatAgent`] owns no conversation state. Callers pass the session's
//! [`Ledger`] by mutable reference, which also serializes mutation: while a
//! reply is being generated nobody else can touch that ledger.
//!
//! If generation fails, or the `ask` future is dropped before the reply
//! arrives, the user message is rolled back so the caller can retry without
//! hitting [`LedgerError::PendingTurn`](turnledger_core::LedgerError::PendingTurn).

use std::sync::Arc;

use tracing::{debug, info, warn};
use turnledger_config::AppConfig;
use turnledger_core::error::{LedgerError, ProviderError, Result};
use turnledger_core::ledger::Ledger;
use turnledger_core::message::Message;
use turnledger_core::provider::{Provider, ProviderRequest, Usage};

/// Generates assistant replies over a caller-owned ledger.
pub struct ChatAgent {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
}

/// The outcome of a completed exchange.
#[derive(Debug, Clone)]
pub struct Reply {
    /// The assistant text appended to the ledger
    pub content: String,

    /// Oldest turns evicted to make room for this one
    pub evicted_turns: usize,

    /// Token usage, when the provider reports it
    pub usage: Option<Usage>,
}

impl ChatAgent {
    /// Create a new chat agent.
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: 0.7,
            max_tokens: None,
        }
    }

    /// Create a chat agent using the generation settings from config.
    pub fn from_config(provider: Arc<dyn Provider>, model: impl Into<String>, config: &AppConfig) -> Self {
        Self::new(provider, model)
            .with_temperature(config.default_temperature)
            .with_max_tokens(config.default_max_tokens)
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the default max tokens per reply.
    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request(&self, transcript: &[Message]) -> ProviderRequest {
        ProviderRequest::new(&self.model, transcript)
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens)
    }

    /// Append `text` as a user message, generate a reply from the ledger's
    /// snapshot, and append the reply.
    pub async fn ask(&self, ledger: &mut Ledger, text: &str) -> Result<Reply> {
        let turn = PendingTurn::open(ledger, text)?;
        let request = self.request(turn.snapshot());

        debug!(
            provider = %self.provider.name(),
            model = %self.model,
            messages = request.messages.len(),
            "Requesting reply"
        );
        let response = self.provider.complete(request).await?;

        let evicted_turns = turn.commit(&response.content)?;
        log_eviction(evicted_turns);

        Ok(Reply {
            content: response.content,
            evicted_turns,
            usage: response.usage,
        })
    }

    /// Like [`ask`](Self::ask), but streams the reply, handing every content
    /// delta to `on_delta` as it arrives.
    pub async fn ask_streaming<F>(&self, ledger: &mut Ledger, text: &str, mut on_delta: F) -> Result<Reply>
    where
        F: FnMut(&str) + Send,
    {
        let turn = PendingTurn::open(ledger, text)?;
        let mut request = self.request(turn.snapshot());
        request.stream = true;

        debug!(
            provider = %self.provider.name(),
            model = %self.model,
            messages = request.messages.len(),
            "Requesting streamed reply"
        );
        let mut rx = self.provider.stream(request).await?;

        let mut content = String::new();
        let mut usage = None;
        let mut finished = false;
        while let Some(chunk) = rx.recv().await {
            let chunk = chunk?;
            if let Some(delta) = chunk.content.as_deref() {
                on_delta(delta);
                content.push_str(delta);
            }
            if chunk.usage.is_some() {
                usage = chunk.usage;
            }
            if chunk.done {
                finished = true;
                break;
            }
        }

        // A channel that closes before the final chunk carries a partial reply.
        if !finished {
            return Err(ProviderError::StreamInterrupted("stream closed before the final chunk".into()).into());
        }

        let evicted_turns = turn.commit(&content)?;
        log_eviction(evicted_turns);

        Ok(Reply {
            content,
            evicted_turns,
            usage,
        })
    }
}

fn log_eviction(evicted_turns: usize) {
    if evicted_turns > 0 {
        info!(evicted_turns, "Evicted oldest turns from the conversation window");
    }
}

/// A user message waiting for its reply. Rolls the message back on drop
/// unless [`commit`](Self::commit) paired it.
struct PendingTurn<'a> {
    ledger: &'a mut Ledger,
    committed: bool,
}

impl<'a> PendingTurn<'a> {
    fn open(ledger: &'a mut Ledger, text: &str) -> std::result::Result<Self, LedgerError> {
        ledger.append_user(text)?;
        Ok(Self {
            ledger,
            committed: false,
        })
    }

    fn snapshot(&self) -> &[Message] {
        self.ledger.snapshot()
    }

    fn commit(mut self, reply: &str) -> std::result::Result<usize, LedgerError> {
        let evicted = self.ledger.append_assistant(reply)?;
        self.committed = true;
        Ok(evicted)
    }
}

impl Drop for PendingTurn<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        if let Some(msg) = self.ledger.rollback_pending() {
            warn!(ordinal = msg.ordinal(), "Rolled back unanswered user message");
        }
    }
}
