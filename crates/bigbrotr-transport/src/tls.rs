//! TLS certificate introspection for Monitor's NIP-66 SSL check (§4.7).
//! Reads the peer certificate chain already captured during the
//! `tokio-tungstenite` TLS handshake performed by [`crate::dial::dial`] —
//! no second connection is opened.

use crate::dial::DialedStream;
use crate::error::TransportError;
use serde::{Deserialize, Serialize};
use tokio_tungstenite::MaybeTlsStream;
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::{FromDer, X509Certificate};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TlsInfo {
    pub issuer: String,
    pub subject: String,
    pub not_after: String,
    pub not_after_unix: i64,
    pub san: Vec<String>,
}

/// Extracts leaf-certificate metadata from an open `wss://` connection.
/// Returns a [`TransportError::Tls`] if the stream is plain (no TLS
/// layer, i.e. `ws://`) rather than panicking.
pub fn inspect(stream: &DialedStream) -> Result<TlsInfo, TransportError> {
    let leaf_der = match stream.get_ref() {
        MaybeTlsStream::Rustls(tls_stream) => tls_stream
            .get_ref()
            .1
            .peer_certificates()
            .and_then(|certs| certs.first())
            .map(|cert| cert.as_ref().to_vec())
            .ok_or_else(|| TransportError::Tls { host: String::new(), reason: "no peer certificate in rustls session".into() })?,
        _ => return Err(TransportError::Tls { host: String::new(), reason: "connection is not TLS (ws://, not wss://)".into() }),
    };

    let (_, parsed) = X509Certificate::from_der(&leaf_der).map_err(|e| TransportError::Tls { host: String::new(), reason: e.to_string() })?;

    let not_after = parsed.validity().not_after.to_string();
    let not_after_unix = parsed.validity().not_after.timestamp();
    let issuer = parsed.issuer().to_string();
    let subject = parsed.subject().to_string();
    let san = parsed
        .subject_alternative_name()
        .ok()
        .flatten()
        .map(|ext| {
            ext.value
                .general_names
                .iter()
                .filter_map(|name| match name {
                    GeneralName::DNSName(s) => Some(s.to_string()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(TlsInfo { issuer, subject, not_after, not_after_unix, san })
}
