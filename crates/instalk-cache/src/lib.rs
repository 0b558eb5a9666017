//! Local durable cache for a chat session.
//!
//! SQLite-backed mirror of the state that survives a restart: the message
//! set, conversation summaries, the active chat selection, and the user
//! display cache. Presence is deliberately absent; it is re-derived from a
//! fresh snapshot at every session start.

mod error;
mod repository;
mod schema;

pub use error::CacheError;
pub use repository::SessionCache;
