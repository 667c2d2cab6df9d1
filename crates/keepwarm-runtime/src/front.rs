//! HTTP front server: accepts inbound requests and hands each one to the
//! singleton router.

use std::convert::Infallible;
use std::net::SocketAddr;

use http::header::CONTENT_TYPE;
use http::{HeaderValue, Request, Response, StatusCode};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::backend::{ResponseBody, full_body};
use crate::router::SingletonRouter;

pub struct FrontServer {
    addr: SocketAddr,
    router: SingletonRouter,
    cancel: CancellationToken,
}

impl FrontServer {
    pub fn new(addr: SocketAddr, router: SingletonRouter, cancel: CancellationToken) -> Self {
        Self { addr, router, cancel }
    }

    /// Bind and serve until the cancellation token fires.
    pub async fn run(&self) -> std::io::Result<()> {
        let (listener, _) = self.bind().await?;
        self.serve(listener).await
    }

    /// Bind to the configured address and return the actual local address.
    pub async fn bind(&self) -> std::io::Result<(TcpListener, SocketAddr)> {
        let listener = TcpListener::bind(self.addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(addr = %local_addr, "front server listening");
        Ok((listener, local_addr))
    }

    /// Accept loop on a pre-bound listener. In-flight connections are left
    /// to finish on their own after cancellation.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            tracing::debug!(%peer, "front: connection accepted");
                            let router = self.router.clone();
                            tokio::spawn(async move {
                                let service = service_fn(move |req| {
                                    let router = router.clone();
                                    async move { Ok::<_, Infallible>(handle(&router, req).await) }
                                });
                                if let Err(e) = http1::Builder::new()
                                    .serve_connection(TokioIo::new(stream), service)
                                    .await
                                {
                                    tracing::debug!(%peer, "front connection ended with error: {e}");
                                }
                            });
                        }
                        Err(e) => tracing::error!("front: TCP accept failed: {e}"),
                    }
                }
                () = self.cancel.cancelled() => {
                    tracing::info!("front server: cancellation requested, shutting down");
                    break;
                }
            }
        }
        Ok(())
    }
}

/// Request bodies are collected before routing; response bodies stream
/// straight back to the caller.
async fn handle(router: &SingletonRouter, request: Request<Incoming>) -> Response<ResponseBody> {
    let (parts, body) = request.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            tracing::debug!("failed to read request body: {e}");
            return text_response(StatusCode::BAD_REQUEST, "failed to read request body\n".to_owned());
        }
    };

    match router.route(Request::from_parts(parts, body)).await {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(stage = %e.stage(), "request failed: {e}");
            text_response(StatusCode::SERVICE_UNAVAILABLE, format!("{e}\n"))
        }
    }
}

fn text_response(status: StatusCode, body: String) -> Response<ResponseBody> {
    let mut response = Response::new(full_body(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    response
}
