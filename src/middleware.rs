//! Tower middleware that admits or rejects HTTP requests.
//!
//! The layer resolves the caller's identity (see [`IdentityResolver`]), runs one admission
//! check, and then either forwards the request or answers `429 Too Many Requests` itself. Both
//! paths carry the same `X-RateLimit-*` headers. When the counter store fails loud the layer
//! answers `503 Service Unavailable` rather than letting traffic through unchecked.
//!
//! ```rust
//! use gatekeeper::middleware::AdmissionLayer;
//! use gatekeeper::{AdmissionController, InMemoryCounterStore, Policy};
//! use std::sync::Arc;
//! use tower::{service_fn, ServiceBuilder, ServiceExt};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let controller = AdmissionController::new(Arc::new(InMemoryCounterStore::new()));
//! let svc = ServiceBuilder::new()
//!     .layer(AdmissionLayer::new(controller, Policy::new(60, 60, "api")?, "default")?)
//!     .service(service_fn(|_req: http::Request<String>| async {
//!         Ok::<_, std::convert::Infallible>(http::Response::new(String::from("ok")))
//!     }));
//!
//! let response = svc.oneshot(http::Request::new(String::new())).await?;
//! assert_eq!(response.headers()["x-ratelimit-remaining"], "59");
//! # Ok(())
//! # }
//! ```

use http::header::{HeaderValue, CONTENT_TYPE, RETRY_AFTER};
use http::{Extensions, HeaderName, Request, Response, StatusCode};
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower_layer::Layer;
use tower_service::Service;
use tracing::{debug, error};

use crate::error::ConfigError;
use crate::headers::RateLimitHeaders;
use crate::limiter::{validate_route_class, AdmissionController, Decision};
use crate::policy::Policy;

const ANONYMOUS: &str = "anonymous";

/// Explicit caller identity placed in request extensions by an upstream layer (for example an
/// authenticated user id). Takes precedence over the network address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity(pub String);

/// Reads the connecting peer's address from request extensions.
pub type PeerAddrExtractor = fn(&Extensions) -> Option<IpAddr>;

#[cfg(feature = "axum")]
fn connect_info_peer(extensions: &Extensions) -> Option<IpAddr> {
    extensions.get::<axum::extract::ConnectInfo<SocketAddr>>().map(|info| info.0.ip())
}

#[cfg(not(feature = "axum"))]
fn connect_info_peer(_extensions: &Extensions) -> Option<IpAddr> {
    None
}

/// Default [`PeerAddrExtractor`]: axum's `ConnectInfo<SocketAddr>` (with the `axum` feature),
/// then a bare `SocketAddr` extension.
pub fn connection_peer(extensions: &Extensions) -> Option<IpAddr> {
    connect_info_peer(extensions).or_else(|| extensions.get::<SocketAddr>().map(SocketAddr::ip))
}

/// Decides which identity a request is counted against.
///
/// Resolution order: explicit [`ClientIdentity`], then each trusted proxy header in the order
/// it was added (first address of a comma-separated list), then the connecting peer address,
/// then `"anonymous"`. No header is trusted by default: a header only identifies the client when
/// a proxy in front of this service overwrites it.
#[derive(Debug, Clone)]
pub struct IdentityResolver {
    trusted_proxy_headers: Vec<HeaderName>,
    peer_addr: PeerAddrExtractor,
}

impl Default for IdentityResolver {
    fn default() -> Self {
        Self { trusted_proxy_headers: Vec::new(), peer_addr: connection_peer }
    }
}

impl IdentityResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trust `header` (e.g. `x-forwarded-for`, `x-real-ip`) to carry the client address.
    pub fn trust_proxy_header(mut self, header: HeaderName) -> Self {
        self.trusted_proxy_headers.push(header);
        self
    }

    /// Replace how the peer address is read from request extensions.
    pub fn with_peer_addr(mut self, extractor: PeerAddrExtractor) -> Self {
        self.peer_addr = extractor;
        self
    }

    pub fn resolve<B>(&self, req: &Request<B>) -> String {
        if let Some(ClientIdentity(id)) = req.extensions().get::<ClientIdentity>() {
            return id.clone();
        }
        self.trusted_proxy_headers
            .iter()
            .filter_map(|name| req.headers().get(name))
            .filter_map(|value| value.to_str().ok())
            .find_map(first_hop)
            .or_else(|| (self.peer_addr)(req.extensions()))
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| ANONYMOUS.to_string())
    }
}

fn first_hop(value: &str) -> Option<IpAddr> {
    value.split(',').next().and_then(|hop| hop.trim().parse().ok())
}

fn json_response<B: From<String>>(status: StatusCode, body: serde_json::Value) -> Response<B> {
    let mut response = Response::new(B::from(body.to_string()));
    *response.status_mut() = status;
    response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// `429` answer for a denied request.
pub fn rejection<B: From<String>>(policy: &Policy, decision: &Decision, now: u64) -> Response<B> {
    let mut response = json_response(
        StatusCode::TOO_MANY_REQUESTS,
        serde_json::json!({
            "error": "rate_limited",
            "message": "Too many requests",
            "reset": decision.reset_at,
        }),
    );
    RateLimitHeaders::new(policy, decision).apply(response.headers_mut());
    response.headers_mut().insert(RETRY_AFTER, HeaderValue::from(decision.retry_after_secs(now)));
    response
}

fn unavailable<B: From<String>>() -> Response<B> {
    json_response(
        StatusCode::SERVICE_UNAVAILABLE,
        serde_json::json!({
            "error": "rate_limiter_unavailable",
            "message": "Admission control is temporarily unavailable",
        }),
    )
}

/// Layer applying one policy to one route class.
#[derive(Clone, Debug)]
pub struct AdmissionLayer {
    controller: AdmissionController,
    policy: Arc<Policy>,
    route_class: Arc<str>,
    identity: Arc<IdentityResolver>,
}

impl AdmissionLayer {
    /// Fails if `route_class` is empty or contains `:`.
    pub fn new(
        controller: AdmissionController,
        policy: Policy,
        route_class: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let route_class = route_class.into();
        validate_route_class(&route_class)?;
        Ok(Self {
            controller,
            policy: Arc::new(policy),
            route_class: Arc::from(route_class),
            identity: Arc::new(IdentityResolver::default()),
        })
    }

    /// Resolve identities with `resolver` instead of the peer-address default.
    pub fn with_identity(mut self, resolver: IdentityResolver) -> Self {
        self.identity = Arc::new(resolver);
        self
    }
}

impl<S> Layer<S> for AdmissionLayer {
    type Service = AdmissionService<S>;

    fn layer(&self, service: S) -> Self::Service {
        AdmissionService {
            inner: service,
            controller: self.controller.clone(),
            policy: self.policy.clone(),
            route_class: self.route_class.clone(),
            identity: self.identity.clone(),
        }
    }
}

/// Middleware service produced by [`AdmissionLayer`].
#[derive(Clone, Debug)]
pub struct AdmissionService<S> {
    inner: S,
    controller: AdmissionController,
    policy: Arc<Policy>,
    route_class: Arc<str>,
    identity: Arc<IdentityResolver>,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for AdmissionService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    ReqBody: Send + 'static,
    ResBody: From<String> + Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        // Take the service that was driven to readiness and leave a fresh clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let controller = self.controller.clone();
        let policy = self.policy.clone();
        let route_class = self.route_class.clone();
        let identity = self.identity.resolve(&req);

        Box::pin(async move {
            match controller.check(&policy, &route_class, &identity).await {
                Ok(decision) if decision.allowed => {
                    let mut response = inner.call(req).await?;
                    RateLimitHeaders::new(&policy, &decision).apply(response.headers_mut());
                    Ok(response)
                }
                Ok(decision) => {
                    debug!(
                        target: "gatekeeper::middleware",
                        route_class = %route_class,
                        identity = %identity,
                        total = decision.total,
                        "rejecting request: too many requests"
                    );
                    Ok(rejection(&policy, &decision, controller.now()))
                }
                Err(err) => {
                    error!(
                        target: "gatekeeper::middleware",
                        route_class = %route_class,
                        error = %err,
                        "admission check failed; rejecting request"
                    );
                    Ok(unavailable())
                }
            }
        })
    }
}
