//! Wire types for the provisioning API.
//!
//! The API nests payloads under an `attributes` object; power state comes
//! back as a free-form string alongside an `is_installing` flag.

use serde::{Deserialize, Serialize};

use fleet_state::InstanceRole;

/// Power signal accepted by the power endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerSignal {
    Start,
    Stop,
}

/// Body of `POST /api/servers/{id}/power`.
#[derive(Debug, Serialize)]
pub struct PowerRequest {
    pub signal: PowerSignal,
}

/// Body of `POST /api/servers`.
#[derive(Debug, Serialize)]
pub struct CreateServerRequest<'a> {
    pub name: &'a str,
    pub role: InstanceRole,
}

/// Provider-assigned identifiers returned on create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedServer {
    /// String id used for power and status calls.
    pub external_id: String,
    /// Numeric id used for deletion calls.
    pub internal_id: i64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateServerResponse {
    pub attributes: CreatedAttributes,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreatedAttributes {
    pub identifier: String,
    pub id: i64,
}

impl From<CreateServerResponse> for CreatedServer {
    fn from(resp: CreateServerResponse) -> Self {
        Self {
            external_id: resp.attributes.identifier,
            internal_id: resp.attributes.id,
        }
    }
}

/// Real power state of a server as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    Running,
    Starting,
    Stopping,
    /// Not running, or an unrecognized state string.
    Offline,
}

impl PowerState {
    /// Parse the provider's `current_state` string. Unknown values map to
    /// `Offline`: the provider answered, the server is not up.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "running" => PowerState::Running,
            "starting" => PowerState::Starting,
            "stopping" => PowerState::Stopping,
            _ => PowerState::Offline,
        }
    }
}

/// Point-in-time status of a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerStatus {
    pub state: PowerState,
    /// The provider is still installing the server image; power commands
    /// are pointless until this clears.
    pub installing: bool,
}

/// Result of one status query.
///
/// The three outcomes demand different reactions: a server the provider
/// does not know is gone for good, while an unreachable or misconfigured
/// provider says nothing about the server at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusQuery {
    /// The provider answered with a concrete status.
    Found(ServerStatus),
    /// The provider does not know this server (404).
    NotFound,
    /// The query failed: network error, timeout, rejected credentials or a
    /// non-success answer. The server's real state is unknown.
    Unavailable,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResourcesResponse {
    pub attributes: ResourceAttributes,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResourceAttributes {
    pub current_state: String,
    #[serde(default)]
    pub is_installing: bool,
}

impl From<ResourcesResponse> for ServerStatus {
    fn from(resp: ResourcesResponse) -> Self {
        Self {
            state: PowerState::parse(&resp.attributes.current_state),
            installing: resp.attributes.is_installing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn power_state_parse_known_values() {
        assert_eq!(PowerState::parse("running"), PowerState::Running);
        assert_eq!(PowerState::parse("starting"), PowerState::Starting);
        assert_eq!(PowerState::parse("stopping"), PowerState::Stopping);
        assert_eq!(PowerState::parse("offline"), PowerState::Offline);
    }

    #[test]
    fn power_state_unknown_maps_to_offline() {
        assert_eq!(PowerState::parse("suspended"), PowerState::Offline);
        assert_eq!(PowerState::parse(""), PowerState::Offline);
    }

    #[test]
    fn power_request_serializes_lowercase_signal() {
        let body = serde_json::to_string(&PowerRequest {
            signal: PowerSignal::Start,
        })
        .unwrap();
        assert_eq!(body, r#"{"signal":"start"}"#);
    }

    #[test]
    fn resources_response_parses() {
        let json = r#"{"attributes":{"current_state":"running","is_installing":false}}"#;
        let resp: ResourcesResponse = serde_json::from_str(json).unwrap();
        let status = ServerStatus::from(resp);
        assert_eq!(status.state, PowerState::Running);
        assert!(!status.installing);
    }

    #[test]
    fn resources_response_missing_installing_defaults_false() {
        let json = r#"{"attributes":{"current_state":"starting"}}"#;
        let resp: ResourcesResponse = serde_json::from_str(json).unwrap();
        assert!(!resp.attributes.is_installing);
    }

    #[test]
    fn create_response_parses_both_ids() {
        let json = r#"{"attributes":{"identifier":"7f3de1ab","id":42,"name":"pool-7"}}"#;
        let resp: CreateServerResponse = serde_json::from_str(json).unwrap();
        let created = CreatedServer::from(resp);
        assert_eq!(created.external_id, "7f3de1ab");
        assert_eq!(created.internal_id, 42);
    }
}
