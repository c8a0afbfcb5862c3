//! Shared HTTPS-capable hyper client.

use std::sync::Arc;
use std::time::Duration;

use hyper::body::{Bytes, HttpBody};
use hyper::client::HttpConnector;
use hyper::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap};
use hyper::{Body, Client, Request, StatusCode, Uri};
use hyper_rustls::HttpsConnector;
use rustls::{ClientConfig, OwnedTrustAnchor, RootCertStore};
use tokio::time::timeout;
use webpki_roots::TLS_SERVER_ROOTS;

use crate::traits::{AdapterError, AdapterResult};

/// Largest response body accepted from any endpoint.
pub const MAX_RESPONSE_BYTES: usize = 4 * 1024 * 1024;

/// Hyper client able to reach both `http://` and `https://` endpoints.
pub type HyperClient = Client<HttpsConnector<HttpConnector>, Body>;

/// Builds the client used by adapters and the tool dispatcher.
///
/// # Errors
///
/// Currently infallible; the signature leaves room for custom trust stores.
#[allow(clippy::unnecessary_wraps)]
pub fn build_https_client() -> AdapterResult<HyperClient> {
    let mut roots = RootCertStore::empty();
    roots.add_trust_anchors(TLS_SERVER_ROOTS.iter().map(|anchor| {
        OwnedTrustAnchor::from_subject_spki_name_constraints(
            anchor.subject,
            anchor.spki,
            anchor.name_constraints,
        )
    }));

    let config = ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(roots)
        .with_no_client_auth();

    let mut http = HttpConnector::new();
    http.enforce_http(false);
    http.set_connect_timeout(Some(Duration::from_secs(5)));

    let connector = HttpsConnector::from((http, Arc::new(config)));

    Ok(Client::builder()
        .pool_idle_timeout(Duration::from_secs(30))
        .build::<_, Body>(connector))
}

/// Raw response returned by [`post_json`] and [`get`].
#[derive(Debug)]
pub struct RawResponse {
    /// HTTP status code.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Fully buffered body, at most [`MAX_RESPONSE_BYTES`] long.
    pub body: Bytes,
}

/// Posts a JSON body with an optional bearer token under a deadline.
///
/// # Errors
///
/// Returns [`AdapterError::Transport`] when the request cannot be sent, the
/// deadline elapses before the whole body is read, or the body cannot be
/// read. Returns [`AdapterError::Response`] when the body is larger than
/// [`MAX_RESPONSE_BYTES`]. Non-success statuses are returned to the caller
/// untouched.
pub async fn post_json(
    client: &HyperClient,
    endpoint: &Uri,
    api_key: Option<&str>,
    body: Vec<u8>,
    deadline: Duration,
    provider: &str,
) -> AdapterResult<RawResponse> {
    let mut builder = Request::post(endpoint.clone()).header(CONTENT_TYPE, "application/json");
    if let Some(key) = api_key {
        builder = builder.header(AUTHORIZATION, format!("Bearer {key}"));
    }

    let request = builder.body(Body::from(body)).map_err(|err| {
        AdapterError::transport(format!("failed to build {provider} request: {err}"))
    })?;

    send(client, request, deadline, provider).await
}

/// Issues a GET request under a deadline.
///
/// # Errors
///
/// Returns [`AdapterError::Transport`] on the same conditions as [`post_json`].
pub async fn get(
    client: &HyperClient,
    endpoint: &Uri,
    deadline: Duration,
    provider: &str,
) -> AdapterResult<RawResponse> {
    let request = Request::get(endpoint.clone())
        .body(Body::empty())
        .map_err(|err| {
            AdapterError::transport(format!("failed to build {provider} request: {err}"))
        })?;
    send(client, request, deadline, provider).await
}

async fn send(
    client: &HyperClient,
    request: Request<Body>,
    deadline: Duration,
    provider: &str,
) -> AdapterResult<RawResponse> {
    let exchange = async {
        let response = client
            .request(request)
            .await
            .map_err(|err| AdapterError::transport(format!("{provider} request failed: {err}")))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = read_limited(response.into_body(), MAX_RESPONSE_BYTES, provider).await?;

        Ok::<_, AdapterError>(RawResponse {
            status,
            headers,
            body,
        })
    };

    timeout(deadline, exchange)
        .await
        .map_err(|_| AdapterError::transport(format!("{provider} request timed out")))?
}

async fn read_limited(mut body: Body, limit: usize, provider: &str) -> AdapterResult<Bytes> {
    let too_large = || AdapterError::response(format!("{provider} response exceeds {limit} bytes"));

    let declared = usize::try_from(body.size_hint().lower()).unwrap_or(usize::MAX);
    if declared > limit {
        return Err(too_large());
    }

    let mut buffer = Vec::with_capacity(declared);
    while let Some(chunk) = body.data().await {
        let chunk = chunk.map_err(|err| {
            AdapterError::transport(format!("failed to read {provider} response: {err}"))
        })?;
        if buffer.len() + chunk.len() > limit {
            return Err(too_large());
        }
        buffer.extend_from_slice(&chunk);
    }
    Ok(Bytes::from(buffer))
}

/// Normalises a base URL so that relative paths can be appended.
///
/// # Errors
///
/// Returns [`AdapterError::Configuration`] when the scheme is not HTTP(S) or
/// the URL does not parse.
pub fn sanitize_base_url(input: &str, provider: &str) -> AdapterResult<String> {
    let mut base = input.trim().to_owned();
    if !(base.starts_with("http://") || base.starts_with("https://")) {
        return Err(AdapterError::configuration(format!(
            "{provider} base URL must start with http:// or https://"
        )));
    }
    if !base.ends_with('/') {
        base.push('/');
    }
    base.parse::<Uri>().map_err(|err| {
        AdapterError::configuration(format!("invalid {provider} base URL: {err}"))
    })?;
    Ok(base)
}
