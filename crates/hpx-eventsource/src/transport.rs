//! Transport capability consumed by the connection state machine.
//!
//! A [`Transport`] performs the HTTP request and reports progress to a
//! [`TransportDelegate`]. Notifications for one started request must be
//! delivered serially and in receipt order; the state machine relies on it.
//! [`HttpTransport`](crate::HttpTransport) is the bundled implementation, and
//! tests can substitute a fake that calls the delegate directly.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};

use crate::error::EventSourceError;

/// Outgoing request for an event stream.
#[derive(Clone, Debug)]
pub struct StreamRequest {
    /// Target URL.
    pub url: String,
    /// HTTP method.
    pub method: Method,
    /// Fully merged request headers.
    pub headers: HeaderMap,
    /// Optional request body.
    pub body: Option<Bytes>,
    /// Limit on receiving the response head.
    pub connect_timeout: Option<Duration>,
}

/// What the transport should do after the response head has been received.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseDisposition {
    /// Keep streaming the response body.
    Allow,
    /// Stop and report completion.
    Cancel,
}

/// Receiver of transport notifications for one started request.
pub trait TransportDelegate: Send + Sync {
    /// The final response head arrived.
    fn headers_received(&self, status: StatusCode) -> ResponseDisposition;

    /// A chunk of the response body arrived.
    fn data_received(&self, chunk: Bytes);

    /// The server redirected to `target`.
    ///
    /// Returns the request to follow, or `None` to stop at the redirect
    /// response.
    fn redirected(&self, target: StreamRequest) -> Option<StreamRequest>;

    /// The request finished: the peer closed the stream, the network failed,
    /// or the request was cancelled. Called at most once.
    fn completed(&self, status: Option<StatusCode>, error: Option<EventSourceError>);
}

/// Handle to a started request.
pub trait TransportTask: Send + Sync {
    /// Ask the transport to stop. Completion is still reported to the
    /// delegate.
    fn cancel(&self);
}

/// Something that can run a [`StreamRequest`].
pub trait Transport: Send + Sync + 'static {
    /// Start `request`, reporting to `delegate`.
    fn start(
        &self,
        request: StreamRequest,
        delegate: Arc<dyn TransportDelegate>,
    ) -> Box<dyn TransportTask>;
}

impl<T: Transport> Transport for Arc<T> {
    fn start(
        &self,
        request: StreamRequest,
        delegate: Arc<dyn TransportDelegate>,
    ) -> Box<dyn TransportTask> {
        (**self).start(request, delegate)
    }
}
