// ABOUTME: Plain HTTP/1.1 GET probe used by validate tasks.
// ABOUTME: Opens a TCP connection per request and drives it with hyper's low-level client.

use async_trait::async_trait;
use http_body_util::BodyExt;
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;

use super::{HttpProbe, ProbeError, ProbeResponse};

/// Reading stops once this much of the body has arrived.
const MAX_BODY_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Default)]
pub struct HyperProbe;

impl HyperProbe {
    pub fn new() -> Self {
        Self
    }
}

/// Split an `http://` URL into the connect address, Host header, and request path.
fn target(url: &str) -> Result<(String, String, String), ProbeError> {
    let invalid = |reason: &str| ProbeError::InvalidUrl {
        url: url.to_string(),
        reason: reason.to_string(),
    };

    let uri: hyper::Uri = url.parse().map_err(|_| invalid("not a valid URI"))?;
    if uri.scheme_str() != Some("http") {
        return Err(invalid("only http is supported"));
    }
    let host = uri.host().ok_or_else(|| invalid("missing host"))?;
    let port = uri.port_u16().unwrap_or(80);
    let path = uri
        .path_and_query()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let authority = uri
        .authority()
        .map(|a| a.as_str().to_string())
        .unwrap_or_else(|| host.to_string());

    Ok((format!("{}:{}", host, port), authority, path))
}

#[async_trait]
impl HttpProbe for HyperProbe {
    async fn get(&self, url: &str) -> Result<ProbeResponse, ProbeError> {
        let (address, authority, path) = target(url)?;

        let stream = TcpStream::connect(address.as_str())
            .await
            .map_err(|source| ProbeError::Connect {
                address: address.clone(),
                source,
            })?;
        let io = TokioIo::new(stream);

        let (mut sender, conn) = hyper::client::conn::http1::handshake(io).await?;

        tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::debug!("probe connection error: {}", e);
            }
        });

        let req = hyper::Request::builder()
            .method("GET")
            .uri(path)
            .header("Host", authority)
            .header("User-Agent", concat!("meshvm/", env!("CARGO_PKG_VERSION")))
            .body(http_body_util::Empty::<bytes::Bytes>::new())?;

        let resp = sender.send_request(req).await?;
        let status = resp.status().as_u16();

        let body = read_capped(resp.into_body(), MAX_BODY_BYTES).await?;

        tracing::debug!("GET {} -> {}", url, status);
        Ok(ProbeResponse {
            status,
            body: String::from_utf8_lossy(&body).into_owned(),
        })
    }
}

/// Read at most `limit` bytes of a body, dropping the rest unread.
async fn read_capped<B>(mut body: B, limit: usize) -> Result<Vec<u8>, B::Error>
where
    B: hyper::body::Body<Data = bytes::Bytes> + Unpin,
{
    let mut out = Vec::new();
    while out.len() < limit {
        let Some(frame) = body.frame().await else {
            break;
        };
        if let Ok(data) = frame?.into_data() {
            let take = data.len().min(limit - out.len());
            out.extend_from_slice(&data[..take]);
        }
    }
    Ok(out)
}
