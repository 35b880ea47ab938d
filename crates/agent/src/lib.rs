//! Chat sessions over bounded ledgers.
//!
//! The exchange follows a fixed cycle:
//!
//! 1. **Append** the user message to the session's ledger
//! 2. **Send** the ledger snapshot to the configured provider
//! 3. **Append** the reply, evicting the oldest turns past the window
//! 4. **Roll back** the user message instead if generation fails or is cancelled
//!
//! [`SessionRegistry`] keeps one ledger per session for hosts that serve many
//! conversations; [`TranscriptStore`] persists a ledger between runs.

pub mod chat;
pub mod registry;
pub mod transcript;

pub use chat::{ChatAgent, Reply};
pub use registry::{SessionRegistry, SharedLedger};
pub use transcript::TranscriptStore;
