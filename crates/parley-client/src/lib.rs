//! Client-side cache for one conversation: the authoritative server event
//! stream folded into a derived view, with locally-composed-but-unconfirmed
//! sends kept in a clearly separated overlay until the server confirms or
//! rejects them.

mod cache;

pub use cache::{CacheEntry, ConversationCache, PendingSend};
