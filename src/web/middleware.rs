//! Client info middleware
//!
//! Resolves the client IP, user agent and caller identity once per request
//! and stores them in the request extensions for the handlers.

use axum::{
    async_trait,
    body::Body,
    extract::{ConnectInfo, FromRequestParts},
    http::{request::Parts, HeaderMap, HeaderName, Request},
};
use std::{
    convert::Infallible,
    net::{IpAddr, SocketAddr},
    sync::Arc,
    task::{Context, Poll},
};
use tower::{Layer, Service};

/// Who is calling, as far as this service can tell
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientInfo {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    /// Authenticated account id asserted by the upstream auth layer
    pub account_id: Option<i64>,
}

/// Get the real client IP address, checking proxy headers first
/// Priority: X-Real-IP > X-Forwarded-For (first IP) > ConnectInfo
fn get_real_ip(headers: &HeaderMap, fallback_ip: Option<String>) -> Option<String> {
    // Try X-Real-IP first (set by Caddy/nginx)
    if let Some(ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        let ip = ip.trim();
        if !ip.is_empty() {
            return Some(ip.to_string());
        }
    }

    // X-Forwarded-For may be a chain, the first entry is the original client
    if let Some(ips) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first_ip) = ips.split(',').next() {
            let ip = first_ip.trim();
            if !ip.is_empty() {
                return Some(ip.to_string());
            }
        }
    }

    fallback_ip
}

fn header_string(headers: &HeaderMap, name: &HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

/// Account id from the identity header, honoured only when the socket peer
/// is a trusted proxy (any peer when none are configured). An unparsable
/// value is treated as anonymous.
fn caller_identity(
    headers: &HeaderMap,
    identity_header: &HeaderName,
    peer: Option<IpAddr>,
    trusted_proxies: &[IpAddr],
) -> Option<i64> {
    let trusted = trusted_proxies.is_empty() || peer.is_some_and(|ip| trusted_proxies.contains(&ip));
    if !trusted {
        return None;
    }
    header_string(headers, identity_header).and_then(|v| v.parse().ok())
}

/// Layer that stamps a [`ClientInfo`] on every request
#[derive(Clone)]
pub struct ClientInfoLayer {
    identity_header: HeaderName,
    trusted_proxies: Arc<[IpAddr]>,
}

impl ClientInfoLayer {
    pub fn new(identity_header: HeaderName, trusted_proxies: &[IpAddr]) -> Self {
        Self {
            identity_header,
            trusted_proxies: trusted_proxies.into(),
        }
    }
}

impl<S> Layer<S> for ClientInfoLayer {
    type Service = ClientInfoMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ClientInfoMiddleware {
            inner,
            identity_header: self.identity_header.clone(),
            trusted_proxies: self.trusted_proxies.clone(),
        }
    }
}

#[derive(Clone)]
pub struct ClientInfoMiddleware<S> {
    inner: S,
    identity_header: HeaderName,
    trusted_proxies: Arc<[IpAddr]>,
}

impl<S> Service<Request<Body>> for ClientInfoMiddleware<S>
where
    S: Service<Request<Body>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<Body>) -> Self::Future {
        let headers = request.headers();

        let peer = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());

        let info = ClientInfo {
            ip: get_real_ip(headers, peer.map(|ip| ip.to_string())),
            user_agent: header_string(headers, &axum::http::header::USER_AGENT),
            account_id: caller_identity(headers, &self.identity_header, peer, &self.trusted_proxies),
        };

        request.extensions_mut().insert(info);
        self.inner.call(request)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for ClientInfo
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts.extensions.get::<ClientInfo>().cloned().unwrap_or_default())
    }
}
