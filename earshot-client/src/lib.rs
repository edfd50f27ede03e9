//! # earshot-client
//!
//! Native client for the Earshot proximity-voice infrastructure.
//!
//! Two pieces live here:
//!
//! - [`CellClient`]: the cell channel session. It opens the channel named
//!   by admission, registers with the one-time session token, heartbeats
//!   while the channel is open, polls an injected position source on a
//!   configurable cadence, and dispatches the cell's typed frames to any
//!   number of subscribers.
//! - [`PeerSelector`]: the decision layer between "the cell says these
//!   peers are in range" and "attach media to these peers". It applies
//!   hysteresis around the audibility boundary, caps simultaneous peers,
//!   and admits the closest candidates first.
//!
//! Configure a selector on the session ([`ConfigBuilder::selector`]) and
//! its decisions arrive as [`Event::PeerConnect`] / [`Event::PeerDisconnect`]
//! alongside the cell's frames; or drive a standalone selector by hand for
//! custom setups.

pub mod config;
pub mod error;
pub mod event;
pub mod selector;

mod client;
mod listener;

pub use self::{
    client::CellClient,
    config::{Config, ConfigBuilder, PositionSource},
    event::Event,
    listener::EventStream,
    selector::{PeerSelector, PeerTransition, SelectorConfig},
};
