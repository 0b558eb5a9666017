//! Session state for a chat client: the message set, derived conversation
//! summaries, presence, and the friend/group rosters, kept consistent across
//! push events, polling, and user actions.
//!
//! [`ChatSession`] is the entry point; the individual stores are exported for
//! consumers that need finer-grained access.

mod conversations;
mod error;
mod events;
mod friends;
mod groups;
mod messages;
mod presence;
mod profiles;
mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use conversations::ConversationStore;
pub use error::ClientError;
pub use events::SessionEvent;
pub use friends::FriendStore;
pub use groups::GroupStore;
pub use messages::{Ingest, MessageStore};
pub use presence::PresenceStore;
pub use profiles::ProfileCache;
pub use session::ChatSession;
