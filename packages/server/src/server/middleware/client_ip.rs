//! Client IP extraction.
//!
//! The source IP is the transport-layer peer address with any IPv6-mapped
//! IPv4 prefix stripped. In trusted-proxy mode the last hop in
//! `x-forwarded-for` from the single trusted proxy is honored instead.

use axum::extract::{ConnectInfo, Request};
use axum::middleware::Next;
use axum::response::Response;
use std::net::{IpAddr, SocketAddr};

/// Extension carrying the resolved client IP.
#[derive(Clone, Debug)]
pub struct ClientIp(pub IpAddr);

impl ClientIp {
    pub fn to_key(&self) -> String {
        self.0.to_string()
    }
}

/// Strip the `::ffff:` IPv6-mapped prefix so v4 clients get stable keys.
pub fn normalize_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        },
        v4 => v4,
    }
}

/// Resolve the client IP for one request.
pub fn resolve_client_ip(
    peer: SocketAddr,
    forwarded_for: Option<&str>,
    trust_proxy: bool,
) -> IpAddr {
    if trust_proxy {
        // One trusted hop: take the first address the proxy reports.
        if let Some(forwarded) = forwarded_for {
            if let Some(ip) = forwarded
                .split(',')
                .next()
                .and_then(|s| s.trim().parse::<IpAddr>().ok())
            {
                return normalize_ip(ip);
            }
        }
    }
    normalize_ip(peer.ip())
}

/// Middleware factory: stores `ClientIp` in request extensions.
pub fn layer(
    trust_proxy: bool,
) -> impl Clone
       + Send
       + Sync
       + 'static
       + Fn(ConnectInfo<SocketAddr>, Request, Next) -> futures::future::BoxFuture<'static, Response>
{
    move |ConnectInfo(peer): ConnectInfo<SocketAddr>, mut request: Request, next: Next| {
        let forwarded = request
            .headers()
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let ip = resolve_client_ip(peer, forwarded.as_deref(), trust_proxy);
        request.extensions_mut().insert(ClientIp(ip));

        Box::pin(next.run(request))
    }
}
