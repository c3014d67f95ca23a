//! Axum middleware that puts an admission backend in front of a router.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Redirect, Response};
use axum::{Json, Router};
use serde::Serialize;
use tracing::{trace, warn};

use super::identity::IdentitySource;
use super::matcher::PathMatcher;
use crate::config::{DenyAction, GateConfig};
use crate::ratelimit::AdmissionBackend;

/// Body of a rejected request.
#[derive(Debug, Serialize)]
pub struct RejectBody {
    pub error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

/// Admission gate state shared by every request.
pub struct Gate<R: AdmissionBackend> {
    backend: Arc<R>,
    matcher: Arc<PathMatcher>,
    identity: Arc<IdentitySource>,
    deny: DenyAction,
}

impl<R: AdmissionBackend> Clone for Gate<R> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            matcher: self.matcher.clone(),
            identity: self.identity.clone(),
            deny: self.deny.clone(),
        }
    }
}

impl<R: AdmissionBackend + 'static> Gate<R> {
    /// Create a gate from configuration.
    ///
    /// A redirect target is exempted from checks so denied clients can reach it.
    pub fn new(backend: Arc<R>, config: &GateConfig) -> Self {
        let mut matcher = PathMatcher::new(&config.paths);
        if let DenyAction::Redirect { location } = &config.deny {
            matcher = matcher.exempting(location.clone());
        }

        Self {
            backend,
            matcher: Arc::new(matcher),
            identity: Arc::new(IdentitySource::from_config(config)),
            deny: config.deny.clone(),
        }
    }

    /// Wrap every route of `router` with the admission check.
    pub fn layer<S>(self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        router.layer(middleware::from_fn_with_state(self, admission::<R>))
    }

    fn deny_response(&self, retry_after: Option<Duration>) -> Response {
        match &self.deny {
            DenyAction::Redirect { location } => Redirect::temporary(location).into_response(),
            DenyAction::Reject { status } => {
                let status = StatusCode::from_u16(*status).unwrap_or(StatusCode::TOO_MANY_REQUESTS);
                let retry_after_secs = retry_after.map(ceil_secs);

                let mut response = (
                    status,
                    Json(RejectBody {
                        error: "Too many requests",
                        retry_after_secs,
                    }),
                )
                    .into_response();

                if let Some(secs) = retry_after_secs {
                    response
                        .headers_mut()
                        .insert(header::RETRY_AFTER, HeaderValue::from(secs));
                }
                response
            }
        }
    }
}

/// Middleware function: checks matched paths and forwards or denies.
pub async fn admission<R: AdmissionBackend + 'static>(
    State(gate): State<Gate<R>>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path();
    if !gate.matcher.matches(path) {
        return next.run(request).await;
    }

    let identifier = gate.identity.identify(&request);
    let admission = gate.backend.check(&identifier, Instant::now());

    if admission.decision.is_allowed() {
        trace!(identifier = %identifier, path = %path, "Request admitted");
        next.run(request).await
    } else {
        warn!(identifier = %identifier, path = %path, "Rate limit exceeded");
        gate.deny_response(admission.retry_after)
    }
}

fn ceil_secs(duration: Duration) -> u64 {
    duration.as_secs() + u64::from(duration.subsec_nanos() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{Admission, Decision, Limiter};
    use axum::body::{to_bytes, Body};
    use axum::extract::ConnectInfo;
    use axum::routing::get;
    use std::net::SocketAddr;
    use tower::ServiceExt;

    fn app(limit: u32, config: &GateConfig) -> (Router, Arc<Limiter>) {
        let limiter = Arc::new(Limiter::new(limit, Duration::from_secs(60)));
        let router = Router::new()
            .route("/", get(|| async { "home" }))
            .route("/about", get(|| async { "about" }))
            .route("/blocked", get(|| async { "blocked" }));
        (Gate::new(limiter.clone(), config).layer(router), limiter)
    }

    fn get_from(path: &str, peer: &str) -> Request {
        let mut request = axum::http::Request::builder().uri(path).body(Body::empty()).unwrap();
        let addr: SocketAddr = peer.parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(addr));
        request
    }

    #[tokio::test]
    async fn test_admits_until_limit_then_redirects() {
        let (app, _) = app(2, &GateConfig::default());

        for _ in 0..2 {
            let response = app.clone().oneshot(get_from("/", "203.0.113.7:4000")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app.clone().oneshot(get_from("/", "203.0.113.7:4000")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(response.headers()[header::LOCATION], "/blocked");
    }

    #[tokio::test]
    async fn test_unmatched_paths_bypass_limiter() {
        let (app, limiter) = app(1, &GateConfig::default());

        for _ in 0..5 {
            let response = app.clone().oneshot(get_from("/about", "203.0.113.7:4000")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        assert!(limiter.is_empty());
    }

    #[tokio::test]
    async fn test_redirect_target_is_never_gated() {
        let config = GateConfig {
            paths: vec!["/*".to_string()],
            ..Default::default()
        };
        let (app, _) = app(1, &config);

        app.clone().oneshot(get_from("/", "203.0.113.7:4000")).await.unwrap();
        let denied = app.clone().oneshot(get_from("/about", "203.0.113.7:4000")).await.unwrap();
        assert_eq!(denied.status(), StatusCode::TEMPORARY_REDIRECT);

        let blocked = app.clone().oneshot(get_from("/blocked", "203.0.113.7:4000")).await.unwrap();
        assert_eq!(blocked.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_reject_returns_status_and_retry_after() {
        let config = GateConfig {
            deny: DenyAction::Reject { status: 429 },
            ..Default::default()
        };
        let (app, _) = app(1, &config);

        app.clone().oneshot(get_from("/", "198.51.100.2:1234")).await.unwrap();
        let response = app.clone().oneshot(get_from("/", "198.51.100.2:1234")).await.unwrap();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let retry_after: u64 = response.headers()[header::RETRY_AFTER]
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        assert!(retry_after > 0 && retry_after <= 60);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "Too many requests");
        assert_eq!(json["retry_after_secs"], retry_after);
    }

    #[tokio::test]
    async fn test_clients_are_limited_separately() {
        let (app, limiter) = app(1, &GateConfig::default());

        let first = app.clone().oneshot(get_from("/", "203.0.113.1:4000")).await.unwrap();
        let second = app.clone().oneshot(get_from("/", "203.0.113.2:4000")).await.unwrap();

        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(second.status(), StatusCode::OK);
        assert_eq!(limiter.len(), 2);
    }

    #[tokio::test]
    async fn test_unidentified_clients_share_fallback_counter() {
        let (app, limiter) = app(1, &GateConfig::default());
        let request = || axum::http::Request::builder().uri("/").body(Body::empty()).unwrap();

        let first = app.clone().oneshot(request()).await.unwrap();
        let second = app.clone().oneshot(request()).await.unwrap();

        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(second.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(limiter.count("127.0.0.1"), Some(1));
    }

    struct AlwaysDeny;

    impl AdmissionBackend for AlwaysDeny {
        fn admit(&self, _identifier: &str, _now: Instant) -> Decision {
            Decision::Deny
        }

        fn check(&self, _identifier: &str, _now: Instant) -> Admission {
            Admission {
                decision: Decision::Deny,
                retry_after: Some(Duration::from_millis(6_200)),
            }
        }
    }

    #[tokio::test]
    async fn test_retry_after_comes_from_the_denying_check() {
        let config = GateConfig {
            deny: DenyAction::Reject { status: 503 },
            ..Default::default()
        };
        let router = Router::new().route("/", get(|| async { "home" }));
        let app = Gate::new(Arc::new(AlwaysDeny), &config).layer(router);

        let response = app.oneshot(get_from("/", "192.0.2.10:5000")).await.unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[header::RETRY_AFTER], "7");
    }

    #[tokio::test]
    async fn test_backend_without_retry_info_omits_header() {
        struct DenyOnly;
        impl AdmissionBackend for DenyOnly {
            fn admit(&self, _identifier: &str, _now: Instant) -> Decision {
                Decision::Deny
            }
        }

        let config = GateConfig {
            deny: DenyAction::Reject { status: 429 },
            ..Default::default()
        };
        let router = Router::new().route("/", get(|| async { "home" }));
        let app = Gate::new(Arc::new(DenyOnly), &config).layer(router);

        let response = app.oneshot(get_from("/", "192.0.2.10:5000")).await.unwrap();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().get(header::RETRY_AFTER).is_none());
    }

    #[test]
    fn test_ceil_secs() {
        assert_eq!(ceil_secs(Duration::ZERO), 0);
        assert_eq!(ceil_secs(Duration::from_millis(1)), 1);
        assert_eq!(ceil_secs(Duration::from_secs(3)), 3);
        assert_eq!(ceil_secs(Duration::from_millis(3_001)), 4);
    }
}
