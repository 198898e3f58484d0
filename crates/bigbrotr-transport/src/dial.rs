//! WebSocket dial over clearnet or a per-network SOCKS5 proxy (§4.3
//! "Proxy selection", "WebSocket dial"), generalizing
//! `obiverse-beenode::nostr::client::RelayClient::connect` from a single
//! always-clearnet dial into a network-aware one.

use crate::error::TransportError;
use crate::network::NetworkConfig;
use bigbrotr_models::Network;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_socks::tcp::Socks5Stream;
use tokio_tungstenite::{client_async_tls, MaybeTlsStream, WebSocketStream};

/// Any stream a raw TCP or SOCKS5 connect can hand us, boxed so the
/// dialer doesn't need to name the concrete type per network.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

pub type BoxedStream = Box<dyn AsyncStream>;
pub type DialedStream = WebSocketStream<MaybeTlsStream<BoxedStream>>;

/// Dials `relay_url` over the proxy (if any) configured for `network`,
/// bounded by that network's dial timeout. DNS resolution for overlay
/// networks is delegated entirely to the SOCKS5 proxy: the hostname is
/// handed to the proxy unresolved, never looked up locally.
pub async fn dial(relay_url: &str, network: Network, config: &NetworkConfig) -> Result<DialedStream, TransportError> {
    let timeout_dur = config.timeout_for(network);
    let parsed = url::Url::parse(relay_url).map_err(|e| TransportError::Protocol { reason: e.to_string() })?;
    let host = parsed.host_str().ok_or_else(|| TransportError::Protocol { reason: format!("no host in {relay_url}") })?.to_string();
    let default_port = if parsed.scheme() == "wss" { 443 } else { 80 };
    let port = parsed.port().unwrap_or(default_port);

    let raw = timeout(timeout_dur, connect_raw(&host, port, network, config))
        .await
        .map_err(|_| TransportError::Timeout { target: relay_url.to_string(), timeout_ms: timeout_dur.as_millis() as u64 })??;

    let (ws, _response) = timeout(timeout_dur, client_async_tls(relay_url, raw))
        .await
        .map_err(|_| TransportError::Timeout { target: relay_url.to_string(), timeout_ms: timeout_dur.as_millis() as u64 })?
        .map_err(|e| classify_tungstenite_err(relay_url, e))?;

    Ok(ws)
}

async fn connect_raw(host: &str, port: u16, network: Network, config: &NetworkConfig) -> Result<BoxedStream, TransportError> {
    match config.proxy_for(network) {
        None => {
            let stream = TcpStream::connect((host, port)).await.map_err(|e| classify_io_err(host, e))?;
            Ok(Box::new(stream))
        }
        Some(proxy) => {
            let stream = Socks5Stream::connect(proxy.address.as_str(), (host, port)).await.map_err(|e| TransportError::Proxy {
                target: format!("{host}:{port}"),
                proxy: proxy.address.clone(),
                reason: e.to_string(),
            })?;
            Ok(Box::new(stream))
        }
    }
}

fn classify_io_err(target: &str, e: std::io::Error) -> TransportError {
    match e.kind() {
        std::io::ErrorKind::TimedOut => TransportError::Timeout { target: target.to_string(), timeout_ms: 0 },
        std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::ConnectionAborted => {
            TransportError::ConnectionReset { target: target.to_string(), reason: e.to_string() }
        }
        _ => TransportError::Dns { host: target.to_string(), reason: e.to_string(), permanent: false },
    }
}

fn classify_tungstenite_err(target: &str, e: tokio_tungstenite::tungstenite::Error) -> TransportError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match e {
        WsError::Tls(inner) => TransportError::Tls { host: target.to_string(), reason: inner.to_string() },
        WsError::Io(io_err) => classify_io_err(target, io_err),
        other => TransportError::WebSocket { reason: other.to_string() },
    }
}
