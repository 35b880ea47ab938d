//! # turnledger core
//!
//! Domain types, traits, and error definitions for turnledger.
//!
//! The centrepiece is [`Ledger`]: a role-tagged chat transcript bounded to
//! the last `K` user/assistant turns, with a leading system message that is
//! never evicted. Text generation is an external concern expressed by the
//! [`Provider`] trait; implementations live in `turnledger-providers`.

pub mod error;
pub mod ledger;
pub mod message;
pub mod provider;

// Re-export key types at crate root for ergonomics
pub use error::{Error, LedgerError, ProviderError, Result};
pub use ledger::{Ledger, LedgerState};
pub use message::{Message, Role, SessionId};
pub use provider::{Provider, ProviderRequest, ProviderResponse, StreamChunk, Usage};
