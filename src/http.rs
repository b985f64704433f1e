use crate::auth::require_auth;
use crate::collectors::system::Sampler;
use crate::config::{CapacityConfig, Thresholds};
use crate::credentials::CredentialStore;
use crate::metrics::Metrics;
use crate::report::HostReport;
use axum::body::Body;
use axum::extract::State;
use axum::http::{header::CONTENT_TYPE, HeaderValue, StatusCode};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Json, Router};
use std::sync::Arc;

#[derive(Clone)]
pub struct HttpAppState {
    pub metrics: Arc<Metrics>,
    pub sampler: Arc<Sampler>,
    pub credentials: Arc<CredentialStore>,
    pub realm: Arc<str>,
    pub mountpoints: Arc<[String]>,
    pub thresholds: Arc<Thresholds>,
    pub capacity: Arc<CapacityConfig>,
}

impl HttpAppState {
    fn collect(&self) -> HostReport {
        let snapshot = self.sampler.snapshot(&self.mountpoints);
        let report = HostReport::build(snapshot, &self.thresholds, &self.capacity);
        self.metrics.update_from_report(&report);
        report
    }
}

pub fn build_router(state: HttpAppState) -> Router {
    let protected = Router::new()
        .route("/api/snapshot", get(snapshot_handler))
        .route("/metrics", get(metrics_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/healthz", get(healthz))
        .merge(protected)
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn snapshot_handler(State(state): State<HttpAppState>) -> Json<HostReport> {
    Json(state.collect())
}

async fn metrics_handler(State(state): State<HttpAppState>) -> Response {
    state.metrics.inc_scrape_count();
    state.collect();
    match state.metrics.encode_metrics() {
        Ok(encoded) => {
            let mut response = Response::new(Body::from(encoded));
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            response
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to encode metrics: {err}"),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::system::tests::healthy_counters;
    use crate::credentials::credential_line;
    use crate::credentials::tests::temp_users_file;
    use axum::body::to_bytes;
    use axum::http::header::{AUTHORIZATION, WWW_AUTHENTICATE};
    use axum::http::Request;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use std::path::PathBuf;
    use tower::ServiceExt;

    fn app_with_users(path: PathBuf) -> Router {
        let counters = healthy_counters();
        counters.push_stat("60 0 20 20");
        counters.push_stat("120 0 40 40");
        build_router(HttpAppState {
            metrics: Metrics::new().expect("metrics init"),
            sampler: Arc::new(Sampler::with_source(counters)),
            credentials: Arc::new(CredentialStore::new(path)),
            realm: Arc::from("lab"),
            mountpoints: Arc::from(vec!["/".to_string()]),
            thresholds: Arc::new(Thresholds::default()),
            capacity: Arc::new(CapacityConfig::default()),
        })
    }

    fn users_file() -> PathBuf {
        temp_users_file(&format!(
            "{}\n",
            credential_line("alice", &[7_u8; 16], "secret")
        ))
    }

    fn get_request(uri: &str, auth: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(raw) = auth {
            builder = builder.header(AUTHORIZATION, format!("Basic {}", STANDARD.encode(raw)));
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn healthz_is_public() {
        let path = users_file();
        let app = app_with_users(path.clone());

        let response = app.oneshot(get_request("/healthz", None)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "ok");
        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn missing_and_wrong_credentials_get_the_same_challenge() {
        let path = users_file();

        for auth in [None, Some("alice:nope"), Some("no-colon"), Some("mallory:secret")] {
            let app = app_with_users(path.clone());
            let response = app
                .oneshot(get_request("/api/snapshot", auth))
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(
                response.headers().get(WWW_AUTHENTICATE).unwrap(),
                "Basic realm=\"lab\", charset=\"UTF-8\""
            );
            assert_eq!(body_text(response).await, "Unauthorized\n");
        }
        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn snapshot_returns_json_with_unknowns_as_null() {
        let path = users_file();
        let app = app_with_users(path.clone());

        let response = app
            .oneshot(get_request("/api/snapshot", Some("alice:secret")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let value: serde_json::Value =
            serde_json::from_str(&body_text(response).await).expect("json body");
        assert_eq!(value["hostname"], "pve-01");
        assert!(value["cpu_usage_percent"].is_null());
        assert_eq!(value["mem_total_kb"], 2048);
        assert_eq!(value["disks"][0]["used_bytes"], 3_686_400);
        assert_eq!(value["status"]["cpu"]["level"], "unknown");
        assert_eq!(value["status"]["ram"]["used_percent"], 50.0);
        assert_eq!(value["status"]["disks"][0]["level"], "crit");
        assert_eq!(value["capacity"]["headroom"]["cores"], 7);
        assert_eq!(value["capacity"]["profiles"][1]["profile"], "light");
        assert_eq!(value["capacity"]["profiles"][1]["fits"], 0);
        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn metrics_requires_auth_and_exports_snapshot() {
        let path = users_file();
        let app = app_with_users(path.clone());

        let response = app
            .clone()
            .oneshot(get_request("/metrics", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .oneshot(get_request("/metrics", Some("alice:secret")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let text = body_text(response).await;
        assert!(text.contains("host_disk_total_bytes"));
        assert!(text.contains("host_disk_level{mountpoint=\"/\"} 2"));
        assert!(text.contains("host_capacity_vms{profile=\"standard\"} 0"));
        assert!(text.contains("agent_auth_requests_total{outcome=\"denied\"} 1"));
        assert!(text.contains("agent_auth_requests_total{outcome=\"granted\"} 1"));
        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn missing_users_file_is_service_unavailable() {
        let path = users_file();
        std::fs::remove_file(&path).unwrap();
        let app = app_with_users(path);

        let response = app
            .oneshot(get_request("/api/snapshot", Some("alice:secret")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(response.headers().get(WWW_AUTHENTICATE).is_none());
    }
}
