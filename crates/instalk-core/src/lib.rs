mod api;
mod events;
mod models;
mod protocol;

pub use api::*;
pub use events::*;
pub use models::*;
pub use protocol::*;
