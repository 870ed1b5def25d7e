//! Relay Daemon - HTTP Long-Poll Surface
//!
//! Thin transport over `relay-core`. Web clients post user turns to `/ask`
//! and follow a channel by repeatedly long-polling `/wait` with the
//! timestamp of the last message they saw.
//!
//! ```text
//! client ── POST /ask ──► Relay::ask ──► producer/consumer ──► Broker
//! client ◄── GET /wait ─────────────────── Subscription ◄──────┘
//! ```

#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod handlers;
pub mod server;

pub use error::ApiError;
pub use server::{build_router, run_sweeper, serve, AppState};
