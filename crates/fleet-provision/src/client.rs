//! The provisioning client.
//!
//! [`HttpProvisioner`] speaks HTTP/1.1 with a bearer token, one connection
//! per request. Failures are downgraded to `false`/`None`/[`StatusQuery`]
//! results with a logged cause; a 401 is logged at the highest severity
//! because it is a configuration error that will make every future call
//! fail identically.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use tracing::{debug, error, info, warn};

use fleet_state::InstanceRole;

use crate::api::{
    CreateServerRequest, CreateServerResponse, CreatedServer, PowerRequest, PowerSignal,
    ResourcesResponse, StatusQuery,
};

/// The subset of the provisioning API the controller depends on.
///
/// All methods are non-throwing and never block their caller beyond their
/// own await.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Create a server. `None` on any failure.
    async fn create(&self, name: &str, role: InstanceRole) -> Option<CreatedServer>;

    /// Send the start signal.
    async fn start(&self, external_id: &str) -> bool;

    /// Send the stop signal.
    async fn stop(&self, external_id: &str) -> bool;

    /// Delete a server by its internal numeric id.
    async fn delete(&self, internal_id: i64) -> bool;

    /// Real status of a server. Distinguishes "the provider does not know
    /// this server" from "the query could not be answered".
    async fn status(&self, external_id: &str) -> StatusQuery;
}

/// Outcome of a single HTTP exchange.
enum Outcome {
    /// 2xx, with the collected response body.
    Success(Bytes),
    /// 404 — the resource does not exist on the provider.
    NotFound,
    /// 401 — fatal configuration error.
    Unauthorized,
    /// Network error, timeout, or any other non-success code.
    Failed,
}

/// HTTP+bearer implementation of [`Provisioner`].
pub struct HttpProvisioner {
    /// `host:port` of the provisioning panel.
    authority: String,
    token: String,
    timeout: Duration,
}

impl HttpProvisioner {
    /// Build a client for `base_url` (with or without an `http://` prefix).
    pub fn new(base_url: &str, token: impl Into<String>, timeout: Duration) -> Self {
        let authority = base_url
            .trim_start_matches("http://")
            .trim_end_matches('/')
            .to_string();
        Self {
            authority,
            token: token.into(),
            timeout,
        }
    }

    /// One request, one connection. Collapses every failure mode into an
    /// [`Outcome`] so callers never see a transport error.
    async fn send(&self, method: http::Method, path: &str, body: Option<Vec<u8>>) -> Outcome {
        let uri = format!("http://{}{}", self.authority, path);

        let exchange = tokio::time::timeout(self.timeout, async {
            let stream = match tokio::net::TcpStream::connect(&self.authority).await {
                Ok(s) => s,
                Err(e) => {
                    warn!(error = %e, %uri, "provisioning API connection failed");
                    return Outcome::Failed;
                }
            };

            let io = hyper_util::rt::TokioIo::new(stream);
            let (mut sender, conn) = match hyper::client::conn::http1::handshake(io).await {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, %uri, "provisioning API handshake failed");
                    return Outcome::Failed;
                }
            };

            // Drive the connection in the background.
            tokio::spawn(async move {
                let _ = conn.await;
            });

            let payload = Bytes::from(body.unwrap_or_default());
            let req = match http::Request::builder()
                .method(method)
                .uri(&uri)
                .header("host", &self.authority)
                .header("authorization", format!("Bearer {}", self.token))
                .header("accept", "application/json")
                .header("content-type", "application/json")
                .body(Full::new(payload))
            {
                Ok(r) => r,
                Err(e) => {
                    warn!(error = %e, %uri, "failed to build provisioning request");
                    return Outcome::Failed;
                }
            };

            let resp = match sender.send_request(req).await {
                Ok(r) => r,
                Err(e) => {
                    warn!(error = %e, %uri, "provisioning API request failed");
                    return Outcome::Failed;
                }
            };

            let status = resp.status();
            if status == http::StatusCode::UNAUTHORIZED {
                error!(
                    %uri,
                    "provisioning API rejected credentials (401); every call will \
                     fail until the token is fixed"
                );
                return Outcome::Unauthorized;
            }
            if status == http::StatusCode::NOT_FOUND {
                debug!(%uri, "provisioning API has no such resource");
                return Outcome::NotFound;
            }
            if !status.is_success() {
                warn!(%status, %uri, "provisioning API returned non-success");
                return Outcome::Failed;
            }

            match resp.collect().await {
                Ok(collected) => Outcome::Success(collected.to_bytes()),
                Err(e) => {
                    warn!(error = %e, %uri, "failed to read provisioning response body");
                    Outcome::Failed
                }
            }
        })
        .await;

        match exchange {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(%uri, "provisioning API request timed out");
                Outcome::Failed
            }
        }
    }

    async fn power(&self, external_id: &str, signal: PowerSignal) -> bool {
        let body = match serde_json::to_vec(&PowerRequest { signal }) {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, "failed to encode power request");
                return false;
            }
        };
        let path = format!("/api/servers/{external_id}/power");
        match self.send(http::Method::POST, &path, Some(body)).await {
            Outcome::Success(_) => {
                debug!(%external_id, ?signal, "power signal accepted");
                true
            }
            Outcome::NotFound | Outcome::Unauthorized | Outcome::Failed => false,
        }
    }
}

#[async_trait]
impl Provisioner for HttpProvisioner {
    async fn create(&self, name: &str, role: InstanceRole) -> Option<CreatedServer> {
        let body = match serde_json::to_vec(&CreateServerRequest { name, role }) {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, "failed to encode create request");
                return None;
            }
        };
        match self.send(http::Method::POST, "/api/servers", Some(body)).await {
            Outcome::Success(bytes) => {
                match serde_json::from_slice::<CreateServerResponse>(&bytes) {
                    Ok(resp) => {
                        let created = CreatedServer::from(resp);
                        info!(
                            %name,
                            external_id = %created.external_id,
                            internal_id = created.internal_id,
                            "server created"
                        );
                        Some(created)
                    }
                    Err(e) => {
                        warn!(error = %e, %name, "unparseable create response");
                        None
                    }
                }
            }
            Outcome::NotFound | Outcome::Unauthorized | Outcome::Failed => None,
        }
    }

    async fn start(&self, external_id: &str) -> bool {
        self.power(external_id, PowerSignal::Start).await
    }

    async fn stop(&self, external_id: &str) -> bool {
        self.power(external_id, PowerSignal::Stop).await
    }

    async fn delete(&self, internal_id: i64) -> bool {
        let path = format!("/api/servers/{internal_id}");
        match self.send(http::Method::DELETE, &path, None).await {
            Outcome::Success(_) => {
                info!(internal_id, "server deleted");
                true
            }
            // Already gone; deletion is idempotent by id.
            Outcome::NotFound => {
                debug!(internal_id, "server already absent on provider");
                true
            }
            Outcome::Unauthorized | Outcome::Failed => false,
        }
    }

    async fn status(&self, external_id: &str) -> StatusQuery {
        let path = format!("/api/servers/{external_id}/resources");
        match self.send(http::Method::GET, &path, None).await {
            Outcome::Success(bytes) => match serde_json::from_slice::<ResourcesResponse>(&bytes) {
                Ok(resp) => StatusQuery::Found(resp.into()),
                Err(e) => {
                    warn!(error = %e, %external_id, "unparseable resources response");
                    StatusQuery::Unavailable
                }
            },
            Outcome::NotFound => StatusQuery::NotFound,
            Outcome::Unauthorized | Outcome::Failed => StatusQuery::Unavailable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::PowerState;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// Serve exactly one connection with a canned raw HTTP response.
    async fn serve_once(raw_response: String) -> std::net::SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 8192];
            let _ = sock.read(&mut buf).await;
            let _ = sock.write_all(raw_response.as_bytes()).await;
            let _ = sock.shutdown().await;
        });
        addr
    }

    fn json_response(status_line: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {status_line}\r\ncontent-type: application/json\r\n\
             content-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        )
    }

    fn client_for(addr: std::net::SocketAddr) -> HttpProvisioner {
        HttpProvisioner::new(&addr.to_string(), "test-token", Duration::from_secs(2))
    }

    #[test]
    fn base_url_scheme_is_stripped() {
        let p = HttpProvisioner::new("http://panel.local:8080/", "t", Duration::from_secs(1));
        assert_eq!(p.authority, "panel.local:8080");
    }

    #[tokio::test]
    async fn status_parses_running_response() {
        let addr = serve_once(json_response(
            "200 OK",
            r#"{"attributes":{"current_state":"running","is_installing":false}}"#,
        ))
        .await;

        let StatusQuery::Found(status) = client_for(addr).status("abc123").await else {
            panic!("expected a concrete status");
        };
        assert_eq!(status.state, PowerState::Running);
        assert!(!status.installing);
    }

    #[tokio::test]
    async fn status_on_unauthorized_is_unavailable_not_not_found() {
        let addr = serve_once(json_response("401 Unauthorized", "{}")).await;
        assert_eq!(
            client_for(addr).status("abc123").await,
            StatusQuery::Unavailable
        );
    }

    #[tokio::test]
    async fn status_on_404_is_not_found() {
        let addr = serve_once(json_response("404 Not Found", "{}")).await;
        assert_eq!(
            client_for(addr).status("abc123").await,
            StatusQuery::NotFound
        );
    }

    #[tokio::test]
    async fn status_on_server_error_is_unavailable() {
        let addr = serve_once(json_response("502 Bad Gateway", "{}")).await;
        assert_eq!(
            client_for(addr).status("abc123").await,
            StatusQuery::Unavailable
        );
    }

    #[tokio::test]
    async fn status_against_closed_port_is_unavailable() {
        let p = HttpProvisioner::new("127.0.0.1:1", "t", Duration::from_millis(200));
        assert_eq!(p.status("abc123").await, StatusQuery::Unavailable);
    }

    #[tokio::test]
    async fn start_succeeds_on_no_content() {
        let addr = serve_once(
            "HTTP/1.1 204 No Content\r\nconnection: close\r\n\r\n".to_string(),
        )
        .await;
        assert!(client_for(addr).start("abc123").await);
    }

    #[tokio::test]
    async fn stop_fails_on_server_error() {
        let addr = serve_once(json_response("502 Bad Gateway", "{}")).await;
        assert!(!client_for(addr).stop("abc123").await);
    }

    #[tokio::test]
    async fn delete_against_closed_port_returns_false() {
        let p = HttpProvisioner::new("127.0.0.1:1", "t", Duration::from_millis(200));
        assert!(!p.delete(42).await);
    }

    #[tokio::test]
    async fn delete_of_absent_server_counts_as_done() {
        let addr = serve_once(json_response("404 Not Found", "{}")).await;
        assert!(client_for(addr).delete(42).await);
    }

    #[tokio::test]
    async fn create_parses_provider_ids() {
        let addr = serve_once(json_response(
            "200 OK",
            r#"{"attributes":{"identifier":"7f3de1ab","id":42}}"#,
        ))
        .await;

        let created = client_for(addr)
            .create("pool-7", InstanceRole::Pool)
            .await
            .unwrap();
        assert_eq!(created.external_id, "7f3de1ab");
        assert_eq!(created.internal_id, 42);
    }

    #[tokio::test]
    async fn create_with_garbage_body_returns_none() {
        let addr = serve_once(json_response("200 OK", "not json")).await;
        assert!(
            client_for(addr)
                .create("pool-7", InstanceRole::Pool)
                .await
                .is_none()
        );
    }
}
