//! Response bodies and canned responses shared by both proxy paths.

use bytes::Bytes;
use http_body_util::{combinators::BoxBody, BodyExt, Empty, Full};
use hyper::header::{HeaderValue, CONNECTION, CONTENT_TYPE};
use hyper::{Response, StatusCode};

/// Body type of every response the proxy produces.
pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

/// Body of every rejection response.
pub const FORBIDDEN_BODY: &str = "Forbidden";

/// Create an empty response body.
pub fn empty_body() -> ProxyBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed()
}

/// Create a response body with content.
pub fn full_body(content: impl Into<Bytes>) -> ProxyBody {
    Full::new(content.into())
        .map_err(|never| match never {})
        .boxed()
}

/// A `text/plain` response with the given status and body.
pub fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<ProxyBody> {
    let mut response = Response::new(full_body(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}

/// The 403 rejection response.
pub fn forbidden_response() -> Response<ProxyBody> {
    text_response(StatusCode::FORBIDDEN, FORBIDDEN_BODY)
}

/// The 403 rejection response, asking the client connection to close.
pub fn forbidden_close_response() -> Response<ProxyBody> {
    let mut response = forbidden_response();
    response
        .headers_mut()
        .insert(CONNECTION, HeaderValue::from_static("close"));
    response
}

/// Response for a failed request, carrying the status's reason phrase.
pub fn status_response(status: StatusCode) -> Response<ProxyBody> {
    text_response(status, status.canonical_reason().unwrap_or("Error"))
}
