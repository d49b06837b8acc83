//! HTTP webhook provisioner.
//!
//! Delegates resource management to an external service:
//!
//! ```text
//! POST   {base}/workloads              body: deploy payload   → {"identity": "..."}
//! DELETE {base}/workloads/{identity}                          → 2xx, or 404 if already gone
//! ```

use std::time::Duration;

use bytes::Bytes;
use http::header::{CONTENT_TYPE, USER_AGENT};
use http::{Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use lapse_core::{
    BoxFuture, DeployRequest, Deployment, ProvisionError, Provisioner, Teardown, TeardownError,
};
use serde::Deserialize;
use tracing::{debug, warn};

const AGENT: &str = concat!("lapsed/", env!("CARGO_PKG_VERSION"));
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

type HttpClient = Client<HttpConnector, Full<Bytes>>;

#[derive(Debug, Deserialize)]
struct Created {
    identity: String,
}

/// Provisioner backed by an HTTP service.
#[derive(Clone)]
pub struct WebhookProvisioner {
    base: String,
    client: HttpClient,
    timeout: Duration,
}

impl WebhookProvisioner {
    /// `base_url` is the service root, e.g. `http://provisioner:8000`.
    pub fn new(base_url: &str) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(CONNECT_TIMEOUT));
        Self {
            base: base_url.trim_end_matches('/').to_string(),
            client: Client::builder(TokioExecutor::new()).build(connector),
            timeout: REQUEST_TIMEOUT,
        }
    }

    /// Upper bound on one create call, response body included.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn create(&self, request: DeployRequest) -> Result<Deployment, ProvisionError> {
        match tokio::time::timeout(self.timeout, self.exchange(request)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    base = %self.base,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "provisioner timed out"
                );
                Err(ProvisionError::TimedOut(self.timeout))
            }
        }
    }

    async fn exchange(&self, request: DeployRequest) -> Result<Deployment, ProvisionError> {
        let payload =
            serde_json::to_vec(&request).map_err(|e| ProvisionError::InvalidRequest(e.to_string()))?;
        let uri = format!("{}/workloads", self.base);
        let req = Request::builder()
            .method(Method::POST)
            .uri(&uri)
            .header(CONTENT_TYPE, "application/json")
            .header(USER_AGENT, AGENT)
            .body(Full::new(Bytes::from(payload)))
            .map_err(|e| ProvisionError::Request(e.to_string()))?;

        let response = self
            .client
            .request(req)
            .await
            .map_err(|e| ProvisionError::Request(e.to_string()))?;
        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| ProvisionError::Response(e.to_string()))?
            .to_bytes();

        if !status.is_success() {
            return Err(ProvisionError::Status {
                status: status.as_u16(),
                message: String::from_utf8_lossy(&body).trim().to_string(),
            });
        }

        let created: Created =
            serde_json::from_slice(&body).map_err(|e| ProvisionError::Response(e.to_string()))?;
        if !is_path_safe(&created.identity) {
            return Err(ProvisionError::Response(format!(
                "unusable workload identity {:?}",
                created.identity
            )));
        }
        debug!(identity = %created.identity, %uri, "provisioner created workload");

        let handle = WebhookTeardown {
            uri: format!("{}/workloads/{}", self.base, created.identity),
            client: self.client.clone(),
        };
        Ok(Deployment {
            identity: created.identity,
            handle: Box::new(handle),
        })
    }
}

impl Provisioner for WebhookProvisioner {
    fn deploy(&self, request: DeployRequest) -> BoxFuture<'_, Result<Deployment, ProvisionError>> {
        Box::pin(self.create(request))
    }
}

impl std::fmt::Debug for WebhookProvisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookProvisioner")
            .field("base", &self.base)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

fn is_path_safe(identity: &str) -> bool {
    !identity.is_empty()
        && identity
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'.')
}

/// Deletes one workload through the provisioner.
pub struct WebhookTeardown {
    uri: String,
    client: HttpClient,
}

impl WebhookTeardown {
    async fn delete(&self) -> Result<(), TeardownError> {
        let req = Request::builder()
            .method(Method::DELETE)
            .uri(&self.uri)
            .header(USER_AGENT, AGENT)
            .body(Full::new(Bytes::new()))
            .map_err(|e| TeardownError::Request(e.to_string()))?;

        let response = self
            .client
            .request(req)
            .await
            .map_err(|e| TeardownError::Request(e.to_string()))?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => {
                debug!(uri = %self.uri, "workload already gone");
                Ok(())
            }
            status => Err(TeardownError::Status(status.as_u16())),
        }
    }
}

impl Teardown for WebhookTeardown {
    fn teardown(&self) -> BoxFuture<'_, Result<(), TeardownError>> {
        Box::pin(self.delete())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};

    use axum::Json;
    use axum::extract::{Path, State};
    use axum::routing::{delete, post};
    use lapse_core::DeployOption;
    use tokio::net::TcpListener;

    #[derive(Default)]
    struct Seen {
        created: Vec<serde_json::Value>,
        deleted: Vec<String>,
    }

    type Shared = Arc<Mutex<Seen>>;

    async fn create(State(seen): State<Shared>, Json(body): Json<serde_json::Value>) -> Json<serde_json::Value> {
        seen.lock().unwrap().created.push(body);
        Json(serde_json::json!({ "identity": "service-7f3a" }))
    }

    async fn remove(State(seen): State<Shared>, Path(identity): Path<String>) -> StatusCode {
        seen.lock().unwrap().deleted.push(identity.clone());
        match identity.as_str() {
            "service-7f3a" => StatusCode::NO_CONTENT,
            "service-broken" => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::NOT_FOUND,
        }
    }

    async fn spawn_provisioner() -> (SocketAddr, Shared) {
        let seen = Shared::default();
        let app = axum::Router::new()
            .route("/workloads", post(create))
            .route("/workloads/{identity}", delete(remove))
            .with_state(Arc::clone(&seen));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (addr, seen)
    }

    fn request() -> DeployRequest {
        DeployRequest {
            script: "cHJpbnQoMSk=".to_string(),
            dot_file: None,
            option: DeployOption {
                user: Some("ann".to_string()),
                replica: Some(1),
            },
        }
    }

    fn teardown_for(addr: SocketAddr, identity: &str) -> WebhookTeardown {
        let provisioner = WebhookProvisioner::new(&format!("http://{addr}"));
        WebhookTeardown {
            uri: format!("http://{addr}/workloads/{identity}"),
            client: provisioner.client,
        }
    }

    #[tokio::test]
    async fn deploy_posts_payload_and_returns_identity() {
        let (addr, seen) = spawn_provisioner().await;
        let provisioner = WebhookProvisioner::new(&format!("http://{addr}/"));

        let deployment = provisioner.deploy(request()).await.unwrap();
        assert_eq!(deployment.identity, "service-7f3a");

        let seen = seen.lock().unwrap();
        assert_eq!(seen.created.len(), 1);
        assert_eq!(seen.created[0]["script"], "cHJpbnQoMSk=");
        assert_eq!(seen.created[0]["option"]["user"], "ann");
    }

    #[tokio::test]
    async fn deployment_handle_deletes_workload() {
        let (addr, seen) = spawn_provisioner().await;
        let provisioner = WebhookProvisioner::new(&format!("http://{addr}"));

        let deployment = provisioner.deploy(request()).await.unwrap();
        deployment.handle.teardown().await.unwrap();

        assert_eq!(seen.lock().unwrap().deleted, vec!["service-7f3a".to_string()]);
    }

    #[tokio::test]
    async fn teardown_of_missing_workload_succeeds() {
        let (addr, _seen) = spawn_provisioner().await;
        assert!(teardown_for(addr, "service-gone").teardown().await.is_ok());
    }

    #[tokio::test]
    async fn teardown_server_error_is_reported() {
        let (addr, _seen) = spawn_provisioner().await;
        let err = teardown_for(addr, "service-broken").teardown().await.unwrap_err();
        assert!(matches!(err, TeardownError::Status(500)));
    }

    #[tokio::test]
    async fn rejected_deploy_carries_status_and_message() {
        let app = axum::Router::new().route(
            "/workloads",
            post(|| async { (StatusCode::UNPROCESSABLE_ENTITY, "image pull failed\n") }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let provisioner = WebhookProvisioner::new(&format!("http://{addr}"));
        match provisioner.deploy(request()).await {
            Err(ProvisionError::Status { status, message }) => {
                assert_eq!(status, 422);
                assert_eq!(message, "image pull failed");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_provisioner_is_a_request_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let provisioner = WebhookProvisioner::new(&format!("http://{addr}"));
        assert!(matches!(
            provisioner.deploy(request()).await,
            Err(ProvisionError::Request(_))
        ));
    }

    #[tokio::test]
    async fn stalled_provisioner_times_out() {
        let app = axum::Router::new().route(
            "/workloads",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Json(serde_json::json!({ "identity": "service-late" }))
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let provisioner =
            WebhookProvisioner::new(&format!("http://{addr}")).with_timeout(Duration::from_millis(200));
        let started = tokio::time::Instant::now();
        match provisioner.deploy(request()).await {
            Err(ProvisionError::TimedOut(t)) => assert_eq!(t, Duration::from_millis(200)),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn identities_must_be_path_safe() {
        assert!(is_path_safe("service-7f3a"));
        assert!(is_path_safe("svc_1.v2"));
        assert!(!is_path_safe(""));
        assert!(!is_path_safe("a/b"));
        assert!(!is_path_safe("a?b"));
        assert!(!is_path_safe("a b"));
    }
}
