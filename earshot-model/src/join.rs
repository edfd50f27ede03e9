//! Request and response bodies for the admission endpoint.

use crate::{geometry::CellId, geometry::Vec3, ice::IceServer};
use serde::{Deserialize, Serialize};

/// Body of a `POST /join` request.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    pub player_id: String,
    pub position: Vec3,
    /// Carried for deployments that terminate authentication upstream of the
    /// cell server; the cell server itself does not consult it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

impl JoinRequest {
    /// Create a new request without an auth token.
    pub fn new(player_id: impl Into<String>, position: Vec3) -> Self {
        Self {
            player_id: player_id.into(),
            position,
            auth_token: None,
        }
    }
}

/// Successful admission: where to connect and the one-time token to use.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinResponse {
    pub cell_id: CellId,
    pub cell_web_socket_url: String,
    pub session_token: String,
    pub transport_mode: TransportMode,
    pub ice_servers: Vec<IceServer>,
}

/// How clients should move media once peers are decided.
///
/// The cell server advertises the mode; only peer-to-peer transport is
/// implemented by the media layer today.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    P2p,
    Sfu,
}

/// Body of an admission failure.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    /// Create a new failure body.
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
