//! Plain HTTP forwarding.
//!
//! Handles every non-CONNECT request:
//!
//! 1. Client sends `GET http://api.example.com/v1 HTTP/1.1` (or an
//!    origin-form request with a `Host` header)
//! 2. The target host is checked against the allowlist
//! 3. If denied: `403 Forbidden`, the origin is never contacted
//! 4. If allowed: hop-by-hop proxy headers are removed and the request is
//!    forwarded; the origin's response streams back unbuffered
//!
//! Upstream failures become `502 Bad Gateway`, or `504 Gateway Timeout`
//! when the connect or response deadline passes.

use super::error::{ProxyError, ProxyResult};
use super::matcher::HostMatcher;
use super::policy;
use super::response::{forbidden_response, ProxyBody};
use crate::telemetry::{self, AuditEvent, Decision, Protocol};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::header::{HeaderName, CONNECTION, HOST};
use hyper::{HeaderMap, Request, Response, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::error::Error as StdError;
use std::time::Duration;
use tracing::debug;

/// Pooled client used to reach origin servers.
pub type HttpClient = Client<HttpConnector, Incoming>;

/// Headers that only apply to the client-proxy hop.
const HOP_BY_HOP: &[&str] = &[
    "proxy-connection",
    "proxy-authorization",
    "proxy-authenticate",
    "connection",
    "keep-alive",
];

/// Build the upstream client with a bounded connect time.
pub fn build_client(connect_timeout: Duration) -> HttpClient {
    let mut connector = HttpConnector::new();
    connector.set_connect_timeout(Some(connect_timeout));
    Client::builder(TokioExecutor::new()).build(connector)
}

/// Handle plain HTTP proxy request (non-CONNECT).
///
/// Denials are answered here and are not errors. `Err` means the request
/// could not be served and maps to a status via [`ProxyError::status`].
pub async fn handle_http(
    mut req: Request<Incoming>,
    matcher: &HostMatcher,
    client: &HttpClient,
    request_timeout: Duration,
) -> ProxyResult<Response<ProxyBody>> {
    let target = target_host(req.uri(), req.headers())?;
    let hostname = policy::hostname(&target).to_string();

    debug!("HTTP {} {}", req.method(), req.uri());

    let allowed = policy::is_allowed(matcher, &target);
    telemetry::audit(&AuditEvent::new(
        Protocol::Http,
        Decision::from(allowed),
        hostname.as_str(),
    ));

    if !allowed {
        return Ok(forbidden_response());
    }

    if let Some(pattern) = matcher.matching_pattern(&hostname) {
        debug!("{} matched pattern '{}'", hostname, pattern);
    }

    let uri = upstream_uri(req.uri(), &target)?;
    *req.uri_mut() = uri;
    strip_hop_by_hop(req.headers_mut());

    let response = match tokio::time::timeout(request_timeout, client.request(req)).await {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => return Err(classify_client_error(&target, &e, request_timeout)),
        Err(_) => {
            return Err(ProxyError::UpstreamTimeout {
                addr: target,
                timeout: request_timeout,
            })
        }
    };

    debug!("HTTP {} -> {}", target, response.status());

    Ok(response.map(|body| body.boxed()))
}

/// The `host[:port]` a request is aimed at: the URI authority, else `Host`.
fn target_host(uri: &Uri, headers: &HeaderMap) -> ProxyResult<String> {
    if let Some(authority) = uri.authority() {
        let host = policy::strip_userinfo(authority.as_str());
        if !host.is_empty() {
            return Ok(host.to_string());
        }
    }

    headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(str::to_string)
        .ok_or(ProxyError::MissingHost)
}

/// Absolute `http://` URI the request is forwarded to.
fn upstream_uri(uri: &Uri, target: &str) -> ProxyResult<Uri> {
    match uri.scheme_str() {
        None | Some("http") => {}
        Some(other) => return Err(ProxyError::UnsupportedScheme(other.to_string())),
    }

    let path = uri.path_and_query().map_or("/", |p| p.as_str());

    Uri::builder()
        .scheme("http")
        .authority(target)
        .path_and_query(path)
        .build()
        .map_err(|_| ProxyError::InvalidTarget(target.to_string()))
}

/// Remove hop-by-hop headers, including any named by `Connection`.
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}

/// Map a client failure to 504 when a timeout is anywhere in its cause chain.
fn classify_client_error(
    addr: &str,
    err: &hyper_util::client::legacy::Error,
    timeout: Duration,
) -> ProxyError {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::TimedOut {
                return ProxyError::UpstreamTimeout {
                    addr: addr.to_string(),
                    timeout,
                };
            }
        }
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }

    ProxyError::UpstreamConnect {
        addr: addr.to_string(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::HeaderValue;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(
                HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn test_target_from_absolute_uri() {
        let uri: Uri = "http://api.example.com:8080/v1".parse().unwrap();
        let host = target_host(&uri, &headers(&[("host", "other.example.com")])).unwrap();
        assert_eq!(host, "api.example.com:8080");
    }

    #[test]
    fn test_target_from_host_header() {
        let uri: Uri = "/v1?x=1".parse().unwrap();
        let host = target_host(&uri, &headers(&[("host", "api.example.com")])).unwrap();
        assert_eq!(host, "api.example.com");
    }

    #[test]
    fn test_target_drops_userinfo() {
        let uri: Uri = "http://user:pw@api.example.com/".parse().unwrap();
        assert_eq!(target_host(&uri, &HeaderMap::new()).unwrap(), "api.example.com");
    }

    #[test]
    fn test_missing_host() {
        let uri: Uri = "/v1".parse().unwrap();
        assert!(matches!(
            target_host(&uri, &HeaderMap::new()),
            Err(ProxyError::MissingHost)
        ));
        assert!(matches!(
            target_host(&uri, &headers(&[("host", "  ")])),
            Err(ProxyError::MissingHost)
        ));
    }

    #[test]
    fn test_upstream_uri_from_origin_form() {
        let uri: Uri = "/v1/models?limit=5".parse().unwrap();
        let upstream = upstream_uri(&uri, "api.example.com:8080").unwrap();
        assert_eq!(upstream.to_string(), "http://api.example.com:8080/v1/models?limit=5");
    }

    #[test]
    fn test_upstream_uri_keeps_absolute_form() {
        let uri: Uri = "http://api.example.com/v1".parse().unwrap();
        let upstream = upstream_uri(&uri, "api.example.com").unwrap();
        assert_eq!(upstream.to_string(), "http://api.example.com/v1");
    }

    #[test]
    fn test_upstream_uri_rejects_other_schemes() {
        let uri: Uri = "https://api.example.com/v1".parse().unwrap();
        assert!(matches!(
            upstream_uri(&uri, "api.example.com"),
            Err(ProxyError::UnsupportedScheme(s)) if s == "https"
        ));
    }

    #[test]
    fn test_strip_hop_by_hop() {
        let mut map = headers(&[
            ("proxy-connection", "keep-alive"),
            ("proxy-authorization", "Basic Zm9vOmJhcg=="),
            ("connection", "keep-alive, x-trace"),
            ("keep-alive", "timeout=5"),
            ("x-trace", "abc"),
            ("accept", "*/*"),
            ("user-agent", "curl/8.0"),
        ]);

        strip_hop_by_hop(&mut map);

        assert_eq!(map.len(), 2);
        assert!(map.contains_key("accept"));
        assert!(map.contains_key("user-agent"));
    }
}
