//! HTTP/1.1 delivery to a supervised instance over a fresh TCP connection.
//!
//! One connection per call: the instance is local and requests are few, so
//! there is no pool to keep warm across suspensions.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use http::header::{ACCEPT, CONNECTION, HOST, TE, TRAILER, TRANSFER_ENCODING, UPGRADE};
use http::{HeaderMap, HeaderValue, Method, Request, Uri};
use http_body_util::{BodyExt, BodyStream, Empty, Full};
use hyper::body::Incoming;
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;

use crate::backend::{BodyError, EventByteStream, ForwardRequest, ForwardResponse};
use crate::error::BackendError;

/// Send `request` to `addr` and return as soon as the response head arrives.
///
/// Status, end-to-end headers and body come back as the instance produced
/// them; the body streams through unbuffered. Hop-by-hop headers are
/// dropped in both directions. `timeout` bounds connect, handshake and the
/// wait for the response head, not the body.
pub async fn send(
    addr: SocketAddr,
    request: ForwardRequest,
    timeout: Duration,
) -> Result<ForwardResponse, BackendError> {
    let (mut parts, body) = request.into_parts();
    parts.uri = origin_form(&parts.uri)?;
    strip_hop_by_hop(&mut parts.headers);
    parts.headers.insert(HOST, host_header(addr)?);

    let response = round_trip(addr, Request::from_parts(parts, Full::new(body)), timeout).await?;
    let (mut parts, body) = response.into_parts();
    strip_hop_by_hop(&mut parts.headers);
    let body = body.map_err(BodyError::from).boxed_unsync();
    Ok(http::Response::from_parts(parts, body))
}

/// GET `path` on `addr` and hand back the body as a byte stream.
///
/// Non-2xx answers are errors; the connection stays open for as long as the
/// stream is polled.
pub async fn open_stream(
    addr: SocketAddr,
    path: &str,
    timeout: Duration,
) -> Result<EventByteStream, BackendError> {
    let request = Request::builder()
        .method(Method::GET)
        .uri(path)
        .header(HOST, host_header(addr)?)
        .header(ACCEPT, "text/event-stream")
        .body(Empty::<Bytes>::new())
        .map_err(|e| BackendError::Transport(format!("building event request: {e}")))?;

    let response = round_trip(addr, request, timeout).await?;
    if !response.status().is_success() {
        return Err(BackendError::EventStreamStatus(response.status().as_u16()));
    }

    let body = BodyStream::new(response.into_body()).filter_map(|frame| async move {
        match frame {
            Ok(frame) => frame.into_data().ok().map(Ok),
            Err(e) => Some(Err(std::io::Error::other(e))),
        }
    });
    Ok(Box::pin(body))
}

async fn round_trip<B>(
    addr: SocketAddr,
    request: Request<B>,
    timeout: Duration,
) -> Result<http::Response<Incoming>, BackendError>
where
    B: hyper::body::Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<BodyError>,
{
    tokio::time::timeout(timeout, exchange(addr, request))
        .await
        .map_err(|_| BackendError::ResponseTimeout { timeout })?
}

async fn exchange<B>(addr: SocketAddr, request: Request<B>) -> Result<http::Response<Incoming>, BackendError>
where
    B: hyper::body::Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<BodyError>,
{
    let stream = TcpStream::connect(addr).await?;
    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .map_err(|e| BackendError::Transport(format!("handshake with {addr}: {e}")))?;

    tokio::spawn(async move {
        if let Err(e) = conn.await {
            tracing::debug!(%addr, "instance connection closed: {e}");
        }
    });

    sender
        .send_request(request)
        .await
        .map_err(|e| BackendError::Transport(format!("request to {addr}: {e}")))
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in [CONNECTION, TE, TRAILER, TRANSFER_ENCODING, UPGRADE] {
        headers.remove(name);
    }
    headers.remove("keep-alive");
    headers.remove("proxy-connection");
}

fn origin_form(uri: &Uri) -> Result<Uri, BackendError> {
    let path = uri.path_and_query().map_or("/", |pq| pq.as_str());
    path.parse()
        .map_err(|e| BackendError::Transport(format!("invalid request path {path:?}: {e}")))
}

fn host_header(addr: SocketAddr) -> Result<HeaderValue, BackendError> {
    HeaderValue::from_str(&addr.to_string())
        .map_err(|e| BackendError::Transport(format!("invalid host {addr}: {e}")))
}
