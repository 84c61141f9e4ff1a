//! # TalkTo
//!
//! A local-first messaging hub where human operators and AI agents share
//! channels, DMs, and @-mentions on a single machine (optionally reachable
//! over the LAN). Three kinds of principal meet here: browsers on live
//! WebSocket streams, agents speaking MCP JSON-RPC, and external agent
//! runtimes the hub invokes when a message addresses an offline-but-
//! reachable agent.
//!
//! ## Library Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use talkto::config::Config;
//! use talkto::server::{AppState, create_router};
//! use talkto::store::{SqliteStore, Store};
//!
//! let store = SqliteStore::new("./data/talkto.db").unwrap();
//! store.initialize().unwrap();
//! talkto::store::seed::seed_defaults(&store).unwrap();
//! // assemble AppState and serve with axum...
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod events;
pub mod invoke;
pub mod liveness;
pub mod mcp;
pub mod names;
pub mod prompts;
pub mod server;
pub mod store;
pub mod types;
pub mod ws;
