//! [`Transport`] implementation backed by `reqwest`.
//!
//! Redirects are followed by hand so that the client can rewrite the headers
//! of every redirect target before it is requested.

use std::sync::Arc;

use futures_util::StreamExt;
use http::{
    HeaderMap, HeaderValue, Method, StatusCode,
    header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, COOKIE, LOCATION, PROXY_AUTHORIZATION},
};
use reqwest::{Client, Response, Url, redirect::Policy};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    error::{EventSourceError, EventSourceResult},
    transport::{
        ResponseDisposition, StreamRequest, Transport, TransportDelegate, TransportTask,
    },
};

/// Maximum number of redirect hops followed for one request.
pub const MAX_REDIRECTS: usize = 10;

/// Streams responses with a shared `reqwest::Client`.
///
/// Each started request runs on its own Tokio task, so `start` must be
/// called from within a Tokio runtime.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Create a transport with a fresh client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new() -> EventSourceResult<Self> {
        let client = Client::builder()
            .redirect(Policy::none())
            .build()
            .map_err(|e| EventSourceError::config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Use an existing client.
    ///
    /// The client should have automatic redirects disabled, otherwise the
    /// configured headers are not re-applied to redirect targets.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

struct HttpTask {
    token: CancellationToken,
}

impl TransportTask for HttpTask {
    fn cancel(&self) {
        self.token.cancel();
    }
}

impl Transport for HttpTransport {
    fn start(
        &self,
        request: StreamRequest,
        delegate: Arc<dyn TransportDelegate>,
    ) -> Box<dyn TransportTask> {
        let token = CancellationToken::new();
        tokio::spawn(drive_request(
            self.client.clone(),
            request,
            delegate,
            token.clone(),
        ));
        Box::new(HttpTask { token })
    }
}

/// Runs one request to completion and reports exactly one `completed`.
async fn drive_request(
    client: Client,
    request: StreamRequest,
    delegate: Arc<dyn TransportDelegate>,
    token: CancellationToken,
) {
    let url = request.url.clone();
    let mut status = None;
    let error = tokio::select! {
        biased;

        () = token.cancelled() => {
            debug!(url = %url, "Event stream request cancelled");
            Some(EventSourceError::Cancelled)
        }
        result = stream_response(&client, request, delegate.as_ref(), &mut status) => {
            result.err()
        }
    };

    match &error {
        None => info!(url = %url, status = ?status, "Event stream ended"),
        Some(err) if err.is_cancelled() => {}
        Some(err) => warn!(url = %url, status = ?status, error = %err, "Event stream failed"),
    }
    delegate.completed(status, error);
}

async fn stream_response(
    client: &Client,
    mut request: StreamRequest,
    delegate: &dyn TransportDelegate,
    status: &mut Option<StatusCode>,
) -> EventSourceResult<()> {
    let mut hops = 0;
    let response = loop {
        let response = send(client, &request).await?;
        *status = Some(response.status());

        if !response.status().is_redirection() {
            break response;
        }
        let Some(location) = response.headers().get(LOCATION) else {
            break response;
        };
        if hops == MAX_REDIRECTS {
            return Err(EventSourceError::TooManyRedirects {
                limit: MAX_REDIRECTS,
            });
        }
        hops += 1;

        let target = redirect_target(&request, response.status(), location)?;
        debug!(from = %request.url, to = %target.url, status = %response.status(), "Event stream redirected");
        match delegate.redirected(target) {
            Some(next) => request = next,
            None => break response,
        }
    };

    if delegate.headers_received(response.status()) == ResponseDisposition::Cancel {
        return Err(EventSourceError::Cancelled);
    }

    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        delegate.data_received(chunk?);
    }
    Ok(())
}

async fn send(client: &Client, request: &StreamRequest) -> EventSourceResult<Response> {
    let mut builder = client
        .request(request.method.clone(), &request.url)
        .headers(request.headers.clone());
    if let Some(body) = &request.body {
        builder = builder.body(body.clone());
    }

    info!(url = %request.url, method = %request.method, "Event stream connecting");
    let response = match request.connect_timeout {
        Some(limit) => timeout(limit, builder.send())
            .await
            .map_err(|_| EventSourceError::timeout(limit))??,
        None => builder.send().await?,
    };
    debug!(url = %request.url, status = %response.status(), "Event stream response received");
    Ok(response)
}

/// Build the request a redirect points at.
///
/// Headers carry over, except credentials when the origin changes. `303`
/// (and `301`/`302` after a `POST`) switch to a bodiless `GET`.
fn redirect_target(
    current: &StreamRequest,
    status: StatusCode,
    location: &HeaderValue,
) -> EventSourceResult<StreamRequest> {
    let base = Url::parse(&current.url)
        .map_err(|e| EventSourceError::config(format!("Invalid URL {}: {e}", current.url)))?;
    let location = location
        .to_str()
        .map_err(|_| EventSourceError::invalid_header(LOCATION.as_str()))?;
    let next = base
        .join(location)
        .map_err(|e| EventSourceError::config(format!("Invalid redirect target {location}: {e}")))?;

    let mut target = current.clone();
    if next.origin() != base.origin() {
        strip_credentials(&mut target.headers);
    }
    let switch_to_get = status == StatusCode::SEE_OTHER
        || (current.method == Method::POST
            && matches!(status, StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND));
    if switch_to_get {
        target.method = Method::GET;
        target.body = None;
        target.headers.remove(CONTENT_TYPE);
        target.headers.remove(CONTENT_LENGTH);
    }
    target.url = next.into();
    Ok(target)
}

fn strip_credentials(headers: &mut HeaderMap) {
    for name in [AUTHORIZATION, COOKIE, PROXY_AUTHORIZATION] {
        headers.remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(url: &str, method: Method) -> StreamRequest {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer sk"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("x-trace", HeaderValue::from_static("1"));
        StreamRequest {
            url: url.to_string(),
            method,
            headers,
            body: Some(bytes::Bytes::from_static(b"{}")),
            connect_timeout: None,
        }
    }

    #[test]
    fn test_redirect_relative_location_keeps_request() {
        let current = request("http://localhost:8080/a/stream", Method::POST);
        let target = redirect_target(
            &current,
            StatusCode::TEMPORARY_REDIRECT,
            &HeaderValue::from_static("../b/stream?x=1"),
        )
        .expect("valid redirect");

        assert_eq!(target.url, "http://localhost:8080/b/stream?x=1");
        assert_eq!(target.method, Method::POST);
        assert!(target.body.is_some());
        assert!(target.headers.contains_key(AUTHORIZATION));
        assert!(target.headers.contains_key(CONTENT_TYPE));
    }

    #[test]
    fn test_redirect_see_other_switches_to_get() {
        let current = request("http://localhost/stream", Method::POST);
        let target = redirect_target(
            &current,
            StatusCode::SEE_OTHER,
            &HeaderValue::from_static("/other"),
        )
        .expect("valid redirect");

        assert_eq!(target.url, "http://localhost/other");
        assert_eq!(target.method, Method::GET);
        assert!(target.body.is_none());
        assert!(!target.headers.contains_key(CONTENT_TYPE));
        assert!(target.headers.contains_key("x-trace"));
    }

    #[test]
    fn test_redirect_to_other_origin_drops_credentials() {
        let current = request("https://a.example.com/stream", Method::GET);
        let target = redirect_target(
            &current,
            StatusCode::MOVED_PERMANENTLY,
            &HeaderValue::from_static("https://b.example.com/stream"),
        )
        .expect("valid redirect");

        assert_eq!(target.method, Method::GET);
        assert!(!target.headers.contains_key(AUTHORIZATION));
        assert!(target.headers.contains_key("x-trace"));
    }

    #[test]
    fn test_redirect_invalid_base_url() {
        let current = request("not a url", Method::GET);
        let result = redirect_target(
            &current,
            StatusCode::FOUND,
            &HeaderValue::from_static("/x"),
        );
        assert!(matches!(result, Err(EventSourceError::Config { .. })));
    }

    #[test]
    fn test_new_transport() {
        assert!(HttpTransport::new().is_ok());
    }
}
