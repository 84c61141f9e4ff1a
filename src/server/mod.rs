mod agents;
mod channels;
pub mod dto;
mod features;
mod messages;
pub mod response;
mod router;
mod search;
mod users;
mod validation;
mod workspaces;

pub use router::{create_router, AppState};
