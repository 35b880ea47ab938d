//! Bounded conversation ledger.
//!
//! A [`Ledger`] holds the transcript of one chat session, bounded to the last
//! `max_turns` user/assistant turns. The optional system message sits at the
//! front and is never evicted.
//!
//! | Operation | Effect |
//! |-----------|--------|
//! | [`Ledger::append_user`] | Opens a turn. Never evicts. |
//! | [`Ledger::append_assistant`] | Closes the pending turn, then evicts whole turns oldest-first |
//! | [`Ledger::rollback_pending`] | Drops an unanswered user message |
//! | [`Ledger::reset`] | Back to `[]` or `[system]` |
//! | [`Ledger::snapshot`] | Borrow the transcript, system first |
//!
//! The ledger does no I/O and no logging. Hosts that share a ledger between
//! tasks must serialize mutation themselves (e.g. behind a mutex).

use serde::{Deserialize, Serialize};

use crate::error::LedgerError;
use crate::message::{Message, Role};

/// Ordinal reserved for the system message.
const SYSTEM_ORDINAL: u64 = 0;

/// An ordered, turn-bounded transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "LedgerState", into = "LedgerState")]
pub struct Ledger {
    /// System message (if any) at index 0, then alternating user/assistant.
    messages: Vec<Message>,
    has_system: bool,
    max_turns: usize,
    next_ordinal: u64,
}

/// Serialized form of a ledger, as written to transcript files.
///
/// Converting back goes through [`Ledger::from_messages`], so a transcript
/// that breaks the ledger's invariants never yields a `Ledger`. Every
/// violation, a zero window included, is a
/// [`LedgerError::CorruptTranscript`].
#[derive(Debug, Serialize, Deserialize)]
pub struct LedgerState {
    max_turns: usize,
    messages: Vec<Message>,
}

impl Ledger {
    /// Create an empty ledger without a system message.
    pub fn new(max_turns: usize) -> Result<Self, LedgerError> {
        Self::create(None, max_turns)
    }

    /// Create a ledger seeded with a system message.
    pub fn with_system(system: &str, max_turns: usize) -> Result<Self, LedgerError> {
        Self::create(Some(system), max_turns)
    }

    /// Create a ledger, optionally seeded with a system message.
    ///
    /// Fails with [`LedgerError::InvalidConfig`] when `max_turns` is zero or
    /// the system text is blank.
    pub fn create(system: Option<&str>, max_turns: usize) -> Result<Self, LedgerError> {
        check_max_turns(max_turns)?;

        let mut messages = Vec::new();
        if let Some(text) = system {
            if text.trim().is_empty() {
                return Err(LedgerError::InvalidConfig(
                    "system message must not be blank".into(),
                ));
            }
            messages.push(Message::new(Role::System, SYSTEM_ORDINAL, text));
        }

        Ok(Self {
            has_system: system.is_some(),
            messages,
            max_turns,
            next_ordinal: SYSTEM_ORDINAL + 1,
        })
    }

    /// Rebuild a ledger from a persisted transcript.
    ///
    /// The transcript must hold at most one system message (first, ordinal 0)
    /// followed by user/assistant messages alternating from user, with
    /// strictly increasing ordinals. A trailing unanswered user message is
    /// kept as the pending turn. Turns beyond `max_turns` are evicted
    /// oldest-first, exactly as after a live append.
    pub fn from_messages(messages: Vec<Message>, max_turns: usize) -> Result<Self, LedgerError> {
        check_max_turns(max_turns)?;

        let mut has_system = false;
        let mut expected = Role::User;
        let mut last_ordinal: Option<u64> = None;

        for (i, msg) in messages.iter().enumerate() {
            match msg.role() {
                Role::System => {
                    if i != 0 {
                        return Err(corrupt(format!(
                            "system message at position {i}, only the first message may be a system message"
                        )));
                    }
                    if msg.content().trim().is_empty() {
                        return Err(corrupt("system message is blank"));
                    }
                    if msg.ordinal() != SYSTEM_ORDINAL {
                        return Err(corrupt(format!(
                            "system message has ordinal {}, expected {SYSTEM_ORDINAL}",
                            msg.ordinal()
                        )));
                    }
                    has_system = true;
                    last_ordinal = Some(SYSTEM_ORDINAL);
                    continue;
                }
                role if role != expected => {
                    return Err(corrupt(format!(
                        "expected {expected} message at position {i}, found {role}"
                    )));
                }
                Role::User if msg.content().trim().is_empty() => {
                    return Err(corrupt(format!("blank user message at position {i}")));
                }
                _ => {}
            }

            let floor = next_after(last_ordinal)?;
            if msg.ordinal() < floor {
                return Err(corrupt(format!(
                    "ordinal {} at position {i} is not increasing",
                    msg.ordinal()
                )));
            }
            last_ordinal = Some(msg.ordinal());
            expected = match expected {
                Role::User => Role::Assistant,
                _ => Role::User,
            };
        }

        let mut ledger = Self {
            messages,
            has_system,
            max_turns,
            next_ordinal: next_after(last_ordinal)?,
        };
        ledger.evict();
        Ok(ledger)
    }

    // ── Mutation ──

    /// Open a new turn with a user message.
    ///
    /// Fails with [`LedgerError::EmptyInput`] for blank text and
    /// [`LedgerError::PendingTurn`] when the previous user message has not
    /// been answered yet. Never evicts.
    pub fn append_user(&mut self, text: impl Into<String>) -> Result<&Message, LedgerError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(LedgerError::EmptyInput);
        }
        if self.pending().is_some() {
            return Err(LedgerError::PendingTurn);
        }

        Ok(self.push(Role::User, text))
    }

    /// Close the pending turn with the assistant's reply.
    ///
    /// Fails with [`LedgerError::DanglingTurn`] if no user message is waiting.
    /// On success, evicts the oldest complete turns until at most
    /// `max_turns` remain and returns how many turns were evicted.
    pub fn append_assistant(&mut self, text: impl Into<String>) -> Result<usize, LedgerError> {
        if self.pending().is_none() {
            return Err(LedgerError::DanglingTurn);
        }

        self.push(Role::Assistant, text.into());
        Ok(self.evict())
    }

    /// Remove the unanswered user message, if there is one.
    ///
    /// Completed turns are never touched. The removed message's ordinal is
    /// handed out again by the next append.
    pub fn rollback_pending(&mut self) -> Option<Message> {
        self.pending()?;
        let msg = self.messages.pop()?;
        self.next_ordinal = msg.ordinal();
        Some(msg)
    }

    /// Drop every turn, keeping the system message if one was configured.
    pub fn reset(&mut self) {
        let offset = self.offset();
        self.messages.truncate(offset);
        self.next_ordinal = SYSTEM_ORDINAL + 1;
    }

    fn push(&mut self, role: Role, text: String) -> &Message {
        let ordinal = self.next_ordinal;
        self.next_ordinal += 1;
        self.messages.push(Message::new(role, ordinal, text));
        &self.messages[self.messages.len() - 1]
    }

    /// Evict whole turns from the front of the conversation until at most
    /// `max_turns` complete turns remain. A pending user message is not
    /// counted and never evicted.
    fn evict(&mut self) -> usize {
        let offset = self.offset();
        let complete = self.turn_count();
        if complete <= self.max_turns {
            return 0;
        }

        let excess = complete - self.max_turns;
        self.messages.drain(offset..offset + excess * 2);
        excess
    }

    // ── Accessors ──

    /// The full transcript in chronological order, system message first.
    pub fn snapshot(&self) -> &[Message] {
        &self.messages
    }

    /// The transcript without the system message.
    pub fn conversation(&self) -> &[Message] {
        &self.messages[self.offset()..]
    }

    pub fn system(&self) -> Option<&Message> {
        if self.has_system {
            self.messages.first()
        } else {
            None
        }
    }

    /// The user message still waiting for a reply.
    pub fn pending(&self) -> Option<&Message> {
        self.conversation()
            .last()
            .filter(|msg| msg.role() == Role::User)
    }

    /// Completed turns as `(user, assistant)` pairs, oldest first.
    pub fn turns(&self) -> impl Iterator<Item = (&Message, &Message)> {
        self.conversation()
            .chunks_exact(2)
            .map(|pair| (&pair[0], &pair[1]))
    }

    /// Number of completed turns retained.
    pub fn turn_count(&self) -> usize {
        self.conversation().len() / 2
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    /// Number of messages in the snapshot, system message included.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Rough token estimate of the whole snapshot.
    pub fn estimated_tokens(&self) -> usize {
        self.messages.iter().map(Message::estimated_tokens).sum()
    }

    fn offset(&self) -> usize {
        usize::from(self.has_system)
    }
}

fn check_max_turns(max_turns: usize) -> Result<(), LedgerError> {
    if max_turns == 0 {
        return Err(LedgerError::InvalidConfig(
            "max_turns must be at least 1".into(),
        ));
    }
    Ok(())
}

/// The ordinal that follows `last`, or the first conversation ordinal.
fn next_after(last: Option<u64>) -> Result<u64, LedgerError> {
    match last {
        None => Ok(SYSTEM_ORDINAL + 1),
        Some(last) => last.checked_add(1).ok_or_else(|| corrupt("ordinal overflow")),
    }
}

fn corrupt(reason: impl Into<String>) -> LedgerError {
    LedgerError::CorruptTranscript(reason.into())
}

impl TryFrom<LedgerState> for Ledger {
    type Error = LedgerError;

    fn try_from(state: LedgerState) -> Result<Self, Self::Error> {
        if state.max_turns == 0 {
            return Err(corrupt("max_turns must be at least 1"));
        }
        Self::from_messages(state.messages, state.max_turns)
    }
}

impl From<Ledger> for LedgerState {
    fn from(ledger: Ledger) -> Self {
        Self {
            max_turns: ledger.max_turns,
            messages: ledger.messages,
        }
    }
}
