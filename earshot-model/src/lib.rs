//! # earshot-model
//!
//! Models for use with the Earshot proximity-voice ecosystem: geometry
//! primitives, the cell channel's JSON frame set, relay-server entries, and
//! the admission endpoint's bodies.
//!
//! The crate is split by concern:
//!
//! - [`geometry`]: positions, distances, and cell derivation;
//! - [`event`]: frames sent by players ([`event::ClientEvent`]) and frames
//!   sent by a cell ([`event::ServerEvent`]);
//! - [`ice`]: relay (STUN/TURN) server entries and their validation;
//! - [`join`]: admission request/response bodies.
//!
//! Everything on the wire is JSON with camelCase field names; frame variants
//! are discriminated by a `type` field.

pub mod event;
pub mod geometry;
pub mod ice;
pub mod join;
