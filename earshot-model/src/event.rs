//! Models to (de)serialize the JSON frames exchanged over a cell channel.
//!
//! Frames are discriminated by a `type` field. Frames sent by players are
//! [`ClientEvent`]s; frames sent by a cell are [`ServerEvent`]s. Signaling
//! payloads are carried as untyped JSON and are never inspected; the cell
//! validates only the envelope around them.

/// Close code sent to a connection that was superseded by a newer register
/// for the same player, or that timed out.
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// Close code sent to a connection whose register failed authentication.
pub const CLOSE_INVALID_SESSION: u16 = 4001;

mod client {
    use crate::geometry::Vec3;
    use serde::{Deserialize, Serialize};
    use serde_json::Value;

    /// A frame sent by a player over the cell channel.
    #[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
    #[non_exhaustive]
    #[serde(tag = "type", rename_all = "kebab-case")]
    pub enum ClientEvent {
        /// Authenticate the connection with a session token from admission.
        Register(Register),
        /// Keep the connection alive without reporting anything.
        Heartbeat,
        /// Report the player's current position.
        Position(PositionUpdate),
        /// Ask the cell to relay an opaque payload to another player.
        Signal(SignalRequest),
    }

    impl From<Register> for ClientEvent {
        fn from(event: Register) -> Self {
            Self::Register(event)
        }
    }

    impl From<PositionUpdate> for ClientEvent {
        fn from(event: PositionUpdate) -> Self {
            Self::Position(event)
        }
    }

    impl From<SignalRequest> for ClientEvent {
        fn from(event: SignalRequest) -> Self {
            Self::Signal(event)
        }
    }

    /// Consume a pending session created at admission time.
    #[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
    #[non_exhaustive]
    #[serde(rename_all = "camelCase")]
    pub struct Register {
        pub player_id: String,
        pub session_token: String,
    }

    impl Register {
        /// Create a new register frame for a player and its one-time token.
        pub fn new(player_id: impl Into<String>, session_token: impl Into<String>) -> Self {
            Self {
                player_id: player_id.into(),
                session_token: session_token.into(),
            }
        }
    }

    /// A player's current position in the world.
    #[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
    #[non_exhaustive]
    #[serde(rename_all = "camelCase")]
    pub struct PositionUpdate {
        pub position: Vec3,
    }

    impl PositionUpdate {
        /// Create a new position frame.
        pub const fn new(position: Vec3) -> Self {
            Self { position }
        }
    }

    impl From<Vec3> for PositionUpdate {
        fn from(position: Vec3) -> Self {
            Self { position }
        }
    }

    /// An opaque payload addressed to another player in the same cell.
    #[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
    #[non_exhaustive]
    #[serde(rename_all = "camelCase")]
    pub struct SignalRequest {
        pub target_id: String,
        pub payload: Value,
    }

    impl SignalRequest {
        /// Create a new signal frame addressed to the target player.
        pub fn new(target_id: impl Into<String>, payload: Value) -> Self {
            Self {
                target_id: target_id.into(),
                payload,
            }
        }
    }
}

mod server {
    use crate::geometry::Vec3;
    use serde::{Deserialize, Serialize};
    use serde_json::Value;
    use std::collections::HashMap;

    /// A frame sent by a cell to one of its players.
    #[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
    #[non_exhaustive]
    #[serde(tag = "type", rename_all = "kebab-case")]
    pub enum ServerEvent {
        /// The register frame was accepted.
        Registered(Registered),
        /// The observer's in-range peer set, with deltas since the prior frame.
        Peers(PeerDiff),
        /// An opaque payload relayed from another player.
        Signal(SignalDelivery),
        /// A signal's target wasn't registered in this cell at dispatch time.
        SignalDeliveryFailed(SignalDeliveryFailed),
        /// The previous frame couldn't be honored.
        Error(ErrorReply),
    }

    impl From<Registered> for ServerEvent {
        fn from(event: Registered) -> Self {
            Self::Registered(event)
        }
    }

    impl From<PeerDiff> for ServerEvent {
        fn from(event: PeerDiff) -> Self {
            Self::Peers(event)
        }
    }

    impl From<SignalDelivery> for ServerEvent {
        fn from(event: SignalDelivery) -> Self {
            Self::Signal(event)
        }
    }

    impl From<SignalDeliveryFailed> for ServerEvent {
        fn from(event: SignalDeliveryFailed) -> Self {
            Self::SignalDeliveryFailed(event)
        }
    }

    impl From<ErrorReply> for ServerEvent {
        fn from(event: ErrorReply) -> Self {
            Self::Error(event)
        }
    }

    /// Acknowledgment that a register frame consumed its pending session.
    #[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
    #[non_exhaustive]
    #[serde(rename_all = "camelCase")]
    pub struct Registered {
        pub player_id: String,
    }

    impl Registered {
        /// Create a new acknowledgment for the player.
        pub fn new(player_id: impl Into<String>) -> Self {
            Self {
                player_id: player_id.into(),
            }
        }
    }

    /// The observer's current peer set plus deltas relative to the prior
    /// frame sent to the same observer.
    ///
    /// `added` and `removed` are present only when non-empty; `distances`
    /// and `positions` are keyed by the players in `peers`.
    #[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct PeerDiff {
        pub peers: Vec<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        pub added: Vec<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        pub removed: Vec<String>,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        pub distances: HashMap<String, f64>,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        pub positions: HashMap<String, Vec3>,
        pub total_players: usize,
    }

    /// An opaque payload relayed from another player in the same cell.
    #[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
    #[non_exhaustive]
    #[serde(rename_all = "camelCase")]
    pub struct SignalDelivery {
        pub from: String,
        pub payload: Value,
    }

    impl SignalDelivery {
        /// Create a new delivery from the source player.
        pub fn new(from: impl Into<String>, payload: Value) -> Self {
            Self {
                from: from.into(),
                payload,
            }
        }
    }

    /// The target of a signal wasn't registered in this cell.
    #[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
    #[non_exhaustive]
    #[serde(rename_all = "camelCase")]
    pub struct SignalDeliveryFailed {
        pub target_id: String,
    }

    impl SignalDeliveryFailed {
        /// Create a new failure notice for the target player.
        pub fn new(target_id: impl Into<String>) -> Self {
            Self {
                target_id: target_id.into(),
            }
        }
    }

    /// A human-readable reason the previous frame couldn't be honored.
    #[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
    #[non_exhaustive]
    #[serde(rename_all = "camelCase")]
    pub struct ErrorReply {
        pub message: String,
    }

    impl ErrorReply {
        /// Create a new error reply.
        pub fn new(message: impl Into<String>) -> Self {
            Self {
                message: message.into(),
            }
        }
    }
}

pub use self::{client::*, server::*};
