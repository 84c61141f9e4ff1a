mod discovery;
mod engine;
mod opencode;

pub use discovery::auto_discover;
pub use engine::{format_invocation_prompt, InvocationEngine};
pub use opencode::{extract_text, OpenCodeClient, Part, SdkSession, SessionSdk};
