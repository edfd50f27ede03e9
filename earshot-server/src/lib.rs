//! # earshot-server
//!
//! Presence, proximity, and signaling infrastructure for proximity voice in
//! a 3D world.
//!
//! Players are admitted over HTTP, grouped into cubic spatial cells, and
//! served by one single-threaded actor per cell. The actor owns every
//! pending session, live connection, position, and per-observer peer view
//! for its cell; it pushes membership and distance diffs within the
//! audibility radius and relays opaque media-negotiation payloads between
//! registered players. Cells share nothing with each other, so the process
//! is trivially parallel across cells.
//!
//! The flow for one player:
//!
//! 1. `POST /join` with an id and a position; the response names the cell,
//!    its channel URL, a one-time session token, the advertised transport
//!    mode, and relay servers for the media transport;
//! 2. open the channel and send `register` with the token;
//! 3. stream `position` at up to 10 Hz, heartbeat while idle, and exchange
//!    `signal` payloads with the peers the cell reports in range.
//!
//! The wire contract lives in [`earshot_model`]; the native client half
//! lives in the `earshot-client` crate.

pub mod config;
pub mod http;
pub mod registry;
pub mod relay;
pub mod shard;

mod proximity;
mod session;

pub use self::{
    config::Config,
    http::{router, App},
    shard::ShardConfig,
};
