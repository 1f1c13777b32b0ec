use bytes::Bytes;
use http::HeaderMap;
use http::Method;
use tracing::debug;

/// Headers that describe the connection rather than the request; they must
/// not travel to the upstream child.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "host",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "upgrade",
];

/// Forward a request to a service child listening on a local port.
///
/// Method, headers, and body are copied 1-for-1; the reply is returned
/// verbatim for the caller to stream back. A transport error maps to
/// `502 Service unavailable` at the HTTP layer and leaves the child alone.
pub async fn forward(
    client: &reqwest::Client,
    port: u16,
    method: Method,
    path_and_query: &str,
    headers: HeaderMap,
    body: Bytes,
) -> Result<reqwest::Response, reqwest::Error> {
    let url = format!("http://127.0.0.1:{port}{path_and_query}");
    debug!(%url, %method, "forwarding to service child");

    let mut upstream_headers = HeaderMap::with_capacity(headers.len());
    for (name, value) in &headers {
        if HOP_BY_HOP.contains(&name.as_str()) {
            continue;
        }
        upstream_headers.append(name, value.clone());
    }

    client
        .request(method, url)
        .headers(upstream_headers)
        .body(body)
        .send()
        .await
}
