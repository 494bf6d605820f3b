use crate::http::transport::BODY_SIZE_HEADER;
use crate::server::selector::PayloadSet;
use crate::timing::TRACE_TARGET;
use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderValue};
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Incoming};
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use rustls::ServerConfig;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Answers one request from the shared payload set.
///
/// Any request body is drained first so uploads complete before the payload
/// is sent back.
pub async fn dispatch<B>(
    payloads: &PayloadSet,
    req: Request<B>,
) -> Result<Response<Full<Bytes>>, Infallible>
where
    B: Body,
    B::Error: std::fmt::Display,
{
    info!("Request: {:?} {} {}", req.version(), req.method(), req.uri());
    let (parts, body) = req.into_parts();
    match body.collect().await {
        Ok(collected) => {
            let received = collected.to_bytes().len();
            if received > 0 {
                debug!("Received {} request body bytes", received);
            }
        }
        Err(e) => warn!("Failed to read request body: {}", e),
    }

    let response = match payloads.select(parts.uri.path()) {
        Ok(payload) => {
            debug!("Serving {} bytes for {}", payload.len(), parts.uri.path());
            Response::builder()
                .status(StatusCode::OK)
                .header(CONTENT_TYPE, "application/octet-stream")
                .header(BODY_SIZE_HEADER, HeaderValue::from(payload.len()))
                .body(Full::new(payload.clone()))
        }
        Err(e) => {
            warn!("Rejecting {}: {}", parts.uri.path(), e);
            Response::builder()
                .status(StatusCode::BAD_REQUEST)
                .header(CONTENT_TYPE, "text/plain")
                .body(Full::new(Bytes::from(format!("{}\n", e))))
        }
    };
    trace!(target: TRACE_TARGET, path = parts.uri.path(), "response ready");
    Ok(response.unwrap_or_else(|e| {
        error!("Failed to build response: {}", e);
        let mut res = Response::new(Full::new(Bytes::new()));
        *res.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        res
    }))
}

pub struct PayloadServer {
    listener: TcpListener,
    payloads: Arc<PayloadSet>,
    tls: Option<TlsAcceptor>,
}

impl PayloadServer {
    pub async fn bind(
        addr: &str,
        payloads: Arc<PayloadSet>,
        tls: Option<Arc<ServerConfig>>,
    ) -> Result<Self, anyhow::Error> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| anyhow!("Failed to listen on {}: {}", addr, e))?;
        Ok(Self {
            listener,
            payloads,
            tls: tls.map(TlsAcceptor::from),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, anyhow::Error> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections until `shutdown` fires. Connections already being
    /// served are left to finish on their own.
    pub async fn serve(self, shutdown: CancellationToken) -> Result<(), anyhow::Error> {
        info!(
            "Server listening on {} ({}), payload tiers {:?}",
            self.local_addr()?,
            if self.tls.is_some() { "https" } else { "http" },
            self.payloads.sizes()
        );
        loop {
            let (stream, peer) = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("Failed to accept connection: {}", e);
                        continue;
                    }
                },
            };
            let payloads = self.payloads.clone();
            let tls = self.tls.clone();
            tokio::spawn(
                async move {
                    if let Err(e) = serve_connection(stream, tls, payloads).await {
                        debug!("Connection closed with error: {:#}", e);
                    }
                }
                .instrument(info_span!("conn", remoteAddr = %peer)),
            );
        }
        info!("Server finished");
        Ok(())
    }
}

async fn serve_connection(
    stream: TcpStream,
    tls: Option<TlsAcceptor>,
    payloads: Arc<PayloadSet>,
) -> Result<(), anyhow::Error> {
    trace!(target: TRACE_TARGET, "connection accepted");
    stream.set_nodelay(true)?;
    let service = service_fn(move |req: Request<Incoming>| {
        let payloads = payloads.clone();
        async move { dispatch(&payloads, req).await }
    });
    let builder = auto::Builder::new(TokioExecutor::new());
    match tls {
        Some(acceptor) => {
            let tls_stream = acceptor.accept(stream).await?;
            trace!(target: TRACE_TARGET, "handshake done");
            builder
                .serve_connection(TokioIo::new(tls_stream), service)
                .await
                .map_err(|e| anyhow!("{}", e))?;
        }
        None => {
            builder
                .serve_connection(TokioIo::new(stream), service)
                .await
                .map_err(|e| anyhow!("{}", e))?;
        }
    }
    trace!(target: TRACE_TARGET, "connection closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(method: &str, path: &str, body: &'static [u8]) -> Request<Full<Bytes>> {
        Request::builder()
            .method(method)
            .uri(path)
            .body(Full::new(Bytes::from_static(body)))
            .unwrap()
    }

    #[tokio::test]
    async fn serves_selected_tier_with_size_header() {
        let payloads = PayloadSet::generate(1000).unwrap();
        let res = dispatch(&payloads, request("GET", "/2", b"")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()[BODY_SIZE_HEADER], "2000");
        let body = res.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body, payloads.get(2).unwrap());
    }

    #[tokio::test]
    async fn response_size_ignores_request_body() {
        let payloads = PayloadSet::generate(10).unwrap();
        let res = dispatch(&payloads, request("POST", "/4", b"0123456789abcdef"))
            .await
            .unwrap();
        assert_eq!(res.headers()[BODY_SIZE_HEADER], "80");
    }

    #[tokio::test]
    async fn bad_index_is_a_client_error() {
        let payloads = PayloadSet::generate(10).unwrap();
        for path in ["/0", "/5", "/abc", "/"] {
            let res = dispatch(&payloads, request("GET", path, b"")).await.unwrap();
            assert_eq!(res.status(), StatusCode::BAD_REQUEST, "path {path}");
            assert!(res.headers().get(BODY_SIZE_HEADER).is_none());
        }
        // Still serving after rejections.
        let res = dispatch(&payloads, request("GET", "/1", b"")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }
}
