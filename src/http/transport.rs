use crate::http::resolver::resolve;
use crate::timing::{Phase, PhaseTimer};
use anyhow::Context;
use bytes::Bytes;
use http::header::{CONTENT_TYPE, HOST, HeaderValue, USER_AGENT};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode, Uri, Version};
use hyper_util::rt::{TokioExecutor, TokioIo};
use rustls::ClientConfig;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::Instrument;

pub const BODY_SIZE_HEADER: &str = "x-body-size";

/// One benchmark request: the target URI and the body to upload.
#[derive(Debug, Clone)]
pub struct ExperimentRequest {
    pub task_id: usize,
    pub uri: Uri,
    pub body: Bytes,
}

impl ExperimentRequest {
    pub fn method(&self) -> Method {
        if self.body.is_empty() {
            Method::GET
        } else {
            Method::POST
        }
    }

    fn to_http(&self, version: Version) -> Result<Request<Full<Bytes>>, anyhow::Error> {
        // HTTP/1.1 origin servers get origin-form; HTTP/2 needs the full URI
        // for its :scheme and :authority pseudo-headers.
        let target = if version == Version::HTTP_11 {
            let path = self
                .uri
                .path_and_query()
                .map(|p| p.as_str())
                .unwrap_or("/");
            path.parse::<Uri>()?
        } else {
            self.uri.clone()
        };
        let mut builder = Request::builder()
            .method(self.method())
            .uri(target)
            .version(version)
            .header(
                USER_AGENT,
                HeaderValue::from_static(concat!("phasebench/", env!("CARGO_PKG_VERSION"))),
            );
        if version == Version::HTTP_11 {
            let authority = self.uri.authority().ok_or(anyhow!("no host"))?;
            builder = builder.header(HOST, HeaderValue::from_str(authority.as_str())?);
        }
        if !self.body.is_empty() {
            builder = builder.header(CONTENT_TYPE, "application/octet-stream");
        }
        Ok(builder.body(Full::new(self.body.clone()))?)
    }
}

#[derive(Debug, Clone)]
pub struct ExchangeResponse {
    pub version: Version,
    pub status: StatusCode,
    pub body_len: usize,
    /// The payload length the server announced in `X-Body-Size`.
    pub body_size_header: Option<usize>,
}

/// Performs a single request/response exchange and reports every phase
/// boundary to `timer`.
///
/// All events of an exchange must have been delivered by the time the
/// returned future resolves, and the response body must be fully read.
pub trait Transport: Send + Sync + 'static {
    fn exchange<'a>(
        &'a self,
        request: &'a ExperimentRequest,
        timer: &'a mut PhaseTimer,
    ) -> impl Future<Output = Result<ExchangeResponse, anyhow::Error>> + Send + 'a;
}

/// Opens a fresh connection per exchange: DNS, TCP, TLS (for `https`) and
/// then HTTP/2 or HTTP/1.1 depending on ALPN.
#[derive(Debug, Clone)]
pub struct HyperTransport {
    tls: Option<Arc<ClientConfig>>,
}

impl HyperTransport {
    pub fn new(tls: Option<Arc<ClientConfig>>) -> Self {
        Self { tls }
    }

    pub fn plaintext() -> Self {
        Self { tls: None }
    }
}

impl Transport for HyperTransport {
    async fn exchange<'a>(
        &'a self,
        request: &'a ExperimentRequest,
        timer: &'a mut PhaseTimer,
    ) -> Result<ExchangeResponse, anyhow::Error> {
        timer.on_event(Phase::AcquireStart);
        let uri = &request.uri;
        let host = uri.host().ok_or(anyhow!("uri has no host"))?;
        let https = uri.scheme_str() == Some("https");
        let port = uri.port_u16().unwrap_or(if https { 443 } else { 80 });

        timer.on_event(Phase::DnsStart);
        let addrs = resolve(host, port).await?;
        timer.on_event(Phase::DnsDone);

        timer.on_event(Phase::ConnectStart);
        let stream = TcpStream::connect(&addrs[..])
            .await
            .with_context(|| format!("Failed to connect to {}:{}", host, port))?;
        stream.set_nodelay(true)?;
        timer.on_event(Phase::ConnectDone);
        let local_addr = stream.local_addr()?.to_string();
        let remote_addr = stream.peer_addr()?.to_string();
        let span = info_span!("conn", task = request.task_id, localAddr = %local_addr, remoteAddr = %remote_addr);

        if https {
            let tls_config = self
                .tls
                .clone()
                .ok_or(anyhow!("https requested but no TLS configuration was given"))?;
            timer.on_event(Phase::HandshakeStart);
            let connector = TlsConnector::from(tls_config);
            let domain = pki_types::ServerName::try_from(host.to_string())
                .map_err(|e| anyhow!("{}", e))?;
            let tls_stream = connector
                .connect(domain, stream)
                .await
                .context("TLS handshake failed")?;
            timer.on_event(Phase::HandshakeDone);
            let h2 = tls_stream.get_ref().1.alpn_protocol() == Some(b"h2".as_slice());
            send(TokioIo::new(tls_stream), h2, request, timer)
                .instrument(span)
                .await
        } else {
            send(TokioIo::new(stream), false, request, timer)
                .instrument(span)
                .await
        }
    }
}

async fn send<T>(
    io: T,
    h2: bool,
    request: &ExperimentRequest,
    timer: &mut PhaseTimer,
) -> Result<ExchangeResponse, anyhow::Error>
where
    T: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static,
{
    let res: Response<Incoming> = if h2 {
        let (mut sender, conn) = hyper::client::conn::http2::handshake(TokioExecutor::new(), io)
            .instrument(info_span!("Http2 Handshake"))
            .await?;
        tokio::spawn(
            async move {
                if let Err(err) = conn.await {
                    debug!("Connection closed with error: {:?}", err);
                }
            }
            .in_current_span(),
        );
        timer.on_event(Phase::Acquired);
        sender.send_request(request.to_http(Version::HTTP_2)?).await?
    } else {
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .instrument(info_span!("Http1 Handshake"))
            .await?;
        tokio::spawn(
            async move {
                if let Err(err) = conn.await {
                    debug!("Connection closed with error: {:?}", err);
                }
            }
            .in_current_span(),
        );
        timer.on_event(Phase::Acquired);
        sender.send_request(request.to_http(Version::HTTP_11)?).await?
    };
    timer.on_event(Phase::FirstResponseByte);

    let (parts, incoming) = res.into_parts();
    let body = incoming
        .collect()
        .await
        .context("Failed to read response body")?
        .to_bytes();
    timer.on_event(Phase::ResponseRead);

    let body_size_header = parts
        .headers
        .get(BODY_SIZE_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<usize>().ok());
    trace!("< {:?} {} ({} bytes)", parts.version, parts.status, body.len());

    Ok(ExchangeResponse {
        version: parts.version,
        status: parts.status,
        body_len: body.len(),
        body_size_header,
    })
}
