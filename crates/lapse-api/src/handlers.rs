use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use lapse_core::{DeployRequest, Deployment, ProvisionError, Registration};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::ApiState;

/// Admin reply body, shared by success and failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployResponse {
    pub url: String,
    pub code: u16,
    pub message: String,
}

fn reply(status: StatusCode, url: String, message: impl Into<String>) -> Response {
    (
        status,
        Json(DeployResponse {
            url,
            code: status.as_u16(),
            message: message.into(),
        }),
    )
        .into_response()
}

fn provision_status(err: &ProvisionError) -> StatusCode {
    match err {
        ProvisionError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        ProvisionError::TimedOut(_) => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::BAD_GATEWAY,
    }
}

/// GET /health
pub async fn health() -> &'static str {
    "ok"
}

// ── Deploy ─────────────────────────────────────────────────────

/// POST /admin/deploy
pub async fn deploy(
    State(state): State<ApiState>,
    payload: Result<Json<DeployRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            return reply(StatusCode::BAD_REQUEST, String::new(), rejection.body_text());
        }
    };
    if let Err(e) = request.validate() {
        return reply(provision_status(&e), String::new(), e.to_string());
    }

    let Deployment { identity, handle } = match state.provisioner.deploy(request).await {
        Ok(deployment) => deployment,
        Err(e) => {
            warn!(error = %e, "deploy failed");
            return reply(provision_status(&e), String::new(), e.to_string());
        }
    };

    match state.reaper.register(&identity, handle) {
        Ok(outcome) => {
            let url = state.workload_url(&identity);
            info!(%identity, %url, "workload deployed");
            let message = match outcome {
                Registration::Inserted => "deployed",
                Registration::Refreshed => "already deployed",
            };
            reply(StatusCode::OK, url, message)
        }
        Err(rejected) => {
            // The fresh resources can never be registered: remove them now.
            warn!(%identity, reason = %rejected.reason, "deployment refused, tearing down");
            let _ = state.reaper.release(&identity, rejected.handle).await;
            reply(StatusCode::CONFLICT, String::new(), rejected.reason.to_string())
        }
    }
}

// ── Workloads ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadView {
    pub identity: String,
    pub url: String,
    pub idle_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadList {
    pub count: usize,
    pub workloads: Vec<WorkloadView>,
}

/// GET /admin/workloads
pub async fn list_workloads(State(state): State<ApiState>) -> impl IntoResponse {
    let workloads: Vec<WorkloadView> = state
        .reaper
        .workloads()
        .into_iter()
        .map(|w| WorkloadView {
            url: state.workload_url(&w.identity),
            identity: w.identity,
            idle_secs: w.idle.as_secs(),
        })
        .collect();

    Json(WorkloadList {
        count: workloads.len(),
        workloads,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::Request;
    use lapse_core::{BoxFuture, Provisioner, Reaper, ReaperConfig, Teardown, TeardownError};
    use lapse_proxy::{Gateway, GatewayPrefix, StaticResolver};
    use tower::ServiceExt;

    use crate::build_router;

    #[derive(Default)]
    struct Counters {
        deploys: AtomicUsize,
        teardowns: AtomicUsize,
    }

    struct CountingTeardown(Arc<Counters>);

    impl Teardown for CountingTeardown {
        fn teardown(&self) -> BoxFuture<'_, Result<(), TeardownError>> {
            Box::pin(async move {
                self.0.teardowns.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }
    }

    /// Hands out `service-1`, `service-2`, ... unless pinned to one name.
    struct FakeProvisioner {
        counters: Arc<Counters>,
        fixed: Option<&'static str>,
        fail: bool,
    }

    impl Provisioner for FakeProvisioner {
        fn deploy(&self, _request: DeployRequest) -> BoxFuture<'_, Result<Deployment, ProvisionError>> {
            Box::pin(async move {
                let n = self.counters.deploys.fetch_add(1, Ordering::SeqCst) + 1;
                if self.fail {
                    return Err(ProvisionError::Status {
                        status: 500,
                        message: "quota exceeded".to_string(),
                    });
                }
                let identity = match self.fixed {
                    Some(name) => name.to_string(),
                    None => format!("service-{n}"),
                };
                Ok(Deployment {
                    identity,
                    handle: Box::new(CountingTeardown(Arc::clone(&self.counters))),
                })
            })
        }
    }

    fn test_state(fixed: Option<&'static str>, fail: bool) -> (ApiState, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        let reaper = Arc::new(Reaper::new(ReaperConfig::default()));
        let gateway = Gateway::new(
            GatewayPrefix::new("/gateway").unwrap(),
            Arc::new(StaticResolver::new()),
            Arc::clone(&reaper),
        );
        let state = ApiState {
            reaper,
            provisioner: Arc::new(FakeProvisioner {
                counters: Arc::clone(&counters),
                fixed,
                fail,
            }),
            gateway: Arc::new(gateway),
            public_url: "http://lapse.test/".to_string(),
        };
        (state, counters)
    }

    fn post_deploy(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/admin/deploy")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn read_json<T: serde::de::DeserializeOwned>(response: Response) -> T {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    const SCRIPT: &str = r#"{"script":"cHJpbnQoJ2hpJyk=","option":{"replica":1}}"#;

    #[tokio::test]
    async fn health_returns_ok() {
        let (state, _) = test_state(None, false);
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = build_router(state).oneshot(req).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"ok");
    }

    #[tokio::test]
    async fn deploy_registers_and_returns_url() {
        let (state, counters) = test_state(None, false);
        let reaper = Arc::clone(&state.reaper);

        let response = build_router(state).oneshot(post_deploy(SCRIPT)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body: DeployResponse = read_json(response).await;
        assert_eq!(body.url, "http://lapse.test/gateway/service-1");
        assert_eq!(body.code, 200);
        assert_eq!(body.message, "deployed");
        assert!(reaper.is_registered("service-1"));
        assert_eq!(counters.deploys.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn malformed_payload_is_rejected() {
        let (state, counters) = test_state(None, false);
        let response = build_router(state).oneshot(post_deploy("{not json")).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: DeployResponse = read_json(response).await;
        assert_eq!(body.code, 400);
        assert!(body.url.is_empty());
        assert_eq!(counters.deploys.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn multiple_replicas_are_rejected_before_provisioning() {
        let (state, counters) = test_state(None, false);
        let response = build_router(state)
            .oneshot(post_deploy(r#"{"script":"eA==","option":{"replica":3}}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(counters.deploys.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn provisioner_failure_is_bad_gateway() {
        let (state, _) = test_state(None, true);
        let reaper = Arc::clone(&state.reaper);

        let response = build_router(state).oneshot(post_deploy(SCRIPT)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let body: DeployResponse = read_json(response).await;
        assert_eq!(body.code, 502);
        assert!(body.message.contains("quota exceeded"));
        assert_eq!(reaper.live_count(), 0);
    }

    #[test]
    fn provision_errors_map_to_statuses() {
        let cases = [
            (ProvisionError::InvalidRequest("x".into()), StatusCode::BAD_REQUEST),
            (ProvisionError::Request("refused".into()), StatusCode::BAD_GATEWAY),
            (ProvisionError::TimedOut(Duration::from_secs(30)), StatusCode::GATEWAY_TIMEOUT),
        ];
        for (err, status) in cases {
            assert_eq!(provision_status(&err), status, "{err}");
        }
    }

    #[tokio::test]
    async fn redeploy_of_live_identity_refreshes() {
        let (state, counters) = test_state(Some("svc-fixed"), false);
        let app = build_router(state.clone());

        app.clone().oneshot(post_deploy(SCRIPT)).await.unwrap();
        let response = app.oneshot(post_deploy(SCRIPT)).await.unwrap();
        let body: DeployResponse = read_json(response).await;

        assert_eq!(body.message, "already deployed");
        assert_eq!(state.reaper.live_count(), 1);
        assert_eq!(counters.teardowns.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn reaped_identity_is_torn_down_again() {
        let (state, counters) = test_state(Some("svc-fixed"), false);
        let app = build_router(state.clone());

        app.clone().oneshot(post_deploy(SCRIPT)).await.unwrap();
        let later = tokio::time::Instant::now() + Duration::from_secs(60);
        let stats = state.reaper.sweep_at(later).await;
        assert_eq!(stats.torn_down, 1);

        let response = app.oneshot(post_deploy(SCRIPT)).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(counters.teardowns.load(Ordering::SeqCst), 2);
        assert!(!state.reaper.is_registered("svc-fixed"));
    }

    /// Returns a fixed identity, but sweeps the reaper far into the future
    /// first, so the identity is reaped while the deploy is in flight.
    struct SweepingProvisioner {
        reaper: Arc<Reaper>,
        counters: Arc<Counters>,
    }

    impl Provisioner for SweepingProvisioner {
        fn deploy(&self, _request: DeployRequest) -> BoxFuture<'_, Result<Deployment, ProvisionError>> {
            Box::pin(async move {
                let later = tokio::time::Instant::now() + Duration::from_secs(60);
                self.reaper.sweep_at(later).await;
                Ok(Deployment {
                    identity: "svc-fixed".to_string(),
                    handle: Box::new(CountingTeardown(Arc::clone(&self.counters))),
                })
            })
        }
    }

    #[tokio::test]
    async fn identity_reaped_mid_deploy_is_torn_down() {
        let (mut state, counters) = test_state(Some("svc-fixed"), false);
        build_router(state.clone()).oneshot(post_deploy(SCRIPT)).await.unwrap();
        assert!(state.reaper.is_registered("svc-fixed"));

        state.provisioner = Arc::new(SweepingProvisioner {
            reaper: Arc::clone(&state.reaper),
            counters: Arc::clone(&counters),
        });
        let response = build_router(state.clone()).oneshot(post_deploy(SCRIPT)).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body: DeployResponse = read_json(response).await;
        assert!(body.message.contains("svc-fixed"));

        // One teardown from the sweep, one for the refused deployment.
        assert_eq!(counters.teardowns.load(Ordering::SeqCst), 2);
        assert!(!state.reaper.is_registered("svc-fixed"));
    }

    #[tokio::test(start_paused = true)]
    async fn workloads_lists_idle_time() {
        let (state, _) = test_state(None, false);
        let app = build_router(state);

        app.clone().oneshot(post_deploy(SCRIPT)).await.unwrap();
        tokio::time::advance(Duration::from_secs(12)).await;
        app.clone().oneshot(post_deploy(SCRIPT)).await.unwrap();
        tokio::time::advance(Duration::from_secs(3)).await;

        let req = Request::builder().uri("/admin/workloads").body(Body::empty()).unwrap();
        let list: WorkloadList = read_json(app.oneshot(req).await.unwrap()).await;

        assert_eq!(list.count, 2);
        assert_eq!(list.workloads[0].identity, "service-1");
        assert_eq!(list.workloads[0].idle_secs, 15);
        assert_eq!(list.workloads[0].url, "http://lapse.test/gateway/service-1");
        assert_eq!(list.workloads[1].identity, "service-2");
        assert_eq!(list.workloads[1].idle_secs, 3);
    }

    #[tokio::test]
    async fn unknown_paths_fall_through_to_gateway() {
        let (state, _) = test_state(None, false);
        let app = build_router(state);

        let req = Request::builder().uri("/gateway/service-9/x").body(Body::empty()).unwrap();
        let response = app.clone().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let req = Request::builder().uri("/elsewhere").body(Body::empty()).unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
