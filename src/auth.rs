use crate::credentials::{CredentialError, CredentialStore};
use crate::http::HttpAppState;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tracing::{debug, error};

pub const DEFAULT_REALM: &str = "proxreport";

#[derive(Debug)]
pub enum AuthOutcome {
    Granted { username: String },
    Denied,
    Unavailable(CredentialError),
}

impl AuthOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            AuthOutcome::Granted { .. } => "granted",
            AuthOutcome::Denied => "denied",
            AuthOutcome::Unavailable(_) => "unavailable",
        }
    }
}

/// Splits `Basic <base64(user:pass)>`. Anything malformed is `None`.
pub fn parse_basic_auth(header: &str) -> Option<(String, String)> {
    let (scheme, payload) = header.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(payload.trim()).ok()?;
    let raw = String::from_utf8(decoded).ok()?;
    let (username, password) = raw.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

/// A missing header, a header that does not parse and a wrong password all
/// come back as the same `Denied`.
pub fn authorize(headers: &HeaderMap, store: &CredentialStore) -> AuthOutcome {
    let Some((username, password)) = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_basic_auth)
    else {
        return AuthOutcome::Denied;
    };

    match store.verify(&username, &password) {
        Ok(true) => AuthOutcome::Granted { username },
        Ok(false) => AuthOutcome::Denied,
        Err(err) => AuthOutcome::Unavailable(err),
    }
}

pub fn unauthorized(realm: &str) -> Response {
    let challenge = format!("Basic realm=\"{realm}\", charset=\"UTF-8\"");
    let mut response = Response::new(Body::from("Unauthorized\n"));
    *response.status_mut() = StatusCode::UNAUTHORIZED;
    let headers = response.headers_mut();
    // Only reachable with a realm that skipped config validation.
    let value = HeaderValue::from_str(&challenge).unwrap_or_else(|_| {
        HeaderValue::from_static("Basic realm=\"proxreport\", charset=\"UTF-8\"")
    });
    headers.insert(WWW_AUTHENTICATE, value);
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

fn backend_unavailable() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        [(CONTENT_TYPE, "text/plain; charset=utf-8")],
        "auth backend unavailable\n",
    )
        .into_response()
}

pub async fn require_auth(
    State(state): State<HttpAppState>,
    request: Request,
    next: Next,
) -> Response {
    let outcome = authorize(request.headers(), &state.credentials);
    state.metrics.inc_auth_outcome(outcome.label());

    match outcome {
        AuthOutcome::Granted { username } => {
            debug!(user = %username, path = %request.uri().path(), "request authorized");
            next.run(request).await
        }
        AuthOutcome::Denied => unauthorized(&state.realm),
        AuthOutcome::Unavailable(err) => {
            error!(error = %err, "credential store unavailable");
            backend_unavailable()
        }
    }
}
