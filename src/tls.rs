//! TLS external interface (SPEC_FULL.md SS1, SS6).
//!
//! The handshake *implementation* is out of scope (spec.md SS1); this
//! module defines the handshake record the rest of the engine consumes and
//! wires up `rustls` as the concrete default provider, plus the
//! certificate pinner / chain cleaner described in spec.md SS6.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::{Arc, OnceLock};

use sha2::{Digest, Sha256};

use crate::error::Error;

/// The record produced by a completed TLS handshake.
#[derive(Clone)]
pub struct Handshake {
    pub tls_version: &'static str,
    pub cipher_suite: String,
    pub peer_certificates: Vec<Vec<u8>>,
    pub local_certificates: Vec<Vec<u8>>,
}

impl fmt::Debug for Handshake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handshake")
            .field("tls_version", &self.tls_version)
            .field("cipher_suite", &self.cipher_suite)
            .field("peer_certificates", &self.peer_certificates.len())
            .finish()
    }
}

/// A bidirectional, already-connected byte stream: either plaintext TCP or
/// a TLS session layered over it. `Carrier` in SS-GLOSSARY owns one of
/// these per connection.
pub enum Stream {
    Plain(TcpStream),
    Tls(Box<rustls::StreamOwned<rustls::ClientConnection, TcpStream>>),
}

impl Stream {
    pub fn peer_addr(&self) -> io::Result<std::net::SocketAddr> {
        match self {
            Stream::Plain(s) => s.peer_addr(),
            Stream::Tls(s) => s.sock.peer_addr(),
        }
    }

    pub fn set_read_timeout(&self, dur: Option<std::time::Duration>) -> io::Result<()> {
        match self {
            Stream::Plain(s) => s.set_read_timeout(dur),
            Stream::Tls(s) => s.sock.set_read_timeout(dur),
        }
    }

    pub fn set_write_timeout(&self, dur: Option<std::time::Duration>) -> io::Result<()> {
        match self {
            Stream::Plain(s) => s.set_write_timeout(dur),
            Stream::Tls(s) => s.sock.set_write_timeout(dur),
        }
    }

    pub fn try_clone(&self) -> io::Result<TcpStream> {
        match self {
            Stream::Plain(s) => s.try_clone(),
            Stream::Tls(s) => s.sock.try_clone(),
        }
    }

    /// The negotiated ALPN protocol, if any (used to pick HTTP/1 vs HTTP/2).
    pub fn negotiated_alpn(&self) -> Option<Vec<u8>> {
        match self {
            Stream::Plain(_) => None,
            Stream::Tls(s) => s.conn.alpn_protocol().map(|p| p.to_vec()),
        }
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Stream::Plain(s) => s.read(buf),
            Stream::Tls(s) => s.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Stream::Plain(s) => s.write(buf),
            Stream::Tls(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Stream::Plain(s) => s.flush(),
            Stream::Tls(s) => s.flush(),
        }
    }
}

/// Default, process-wide root certificate store (native + webpki roots).
fn default_root_store() -> &'static rustls::RootCertStore {
    static STORE: OnceLock<rustls::RootCertStore> = OnceLock::new();
    STORE.get_or_init(|| {
        let mut store = rustls::RootCertStore::empty();
        store.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
            rustls::OwnedTrustAnchor::from_subject_spki_name_constraints(
                ta.subject,
                ta.spki,
                ta.name_constraints,
            )
        }));
        if let Ok(native) = rustls_native_certs::load_native_certs() {
            for cert in native {
                let _ = store.add(&rustls::Certificate(cert.0));
            }
        }
        store
    })
}

/// TLS configuration: trust roots, ALPN protocol preference, and an
/// optional certificate pinner (spec.md SS6).
#[derive(Clone)]
pub struct TlsConfig {
    alpn_protocols: Vec<Vec<u8>>,
    certificate_pinner: Option<Arc<CertificatePinner>>,
}

impl Default for TlsConfig {
    fn default() -> Self {
        TlsConfig {
            alpn_protocols: vec![b"h2".to_vec(), b"http/1.1".to_vec()],
            certificate_pinner: None,
        }
    }
}

impl TlsConfig {
    pub fn with_certificate_pinner(mut self, pinner: CertificatePinner) -> Self {
        self.certificate_pinner = Some(Arc::new(pinner));
        self
    }

    pub fn with_alpn_protocols(mut self, protocols: Vec<Vec<u8>>) -> Self {
        self.alpn_protocols = protocols;
        self
    }

    /// Perform a blocking TLS client handshake over `tcp`, verifying the
    /// peer name and, if configured, the certificate pins.
    pub fn handshake(&self, tcp: TcpStream, server_name: &str) -> Result<(Stream, Handshake), Error> {
        let mut config = rustls::ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(default_root_store().clone())
            .with_no_client_auth();
        config.alpn_protocols = self.alpn_protocols.clone();

        let name = rustls::ServerName::try_from(server_name)
            .map_err(|e| Error::tls(e))?;
        let conn = rustls::ClientConnection::new(Arc::new(config), name)
            .map_err(|e| Error::tls(e))?;
        let mut tls = rustls::StreamOwned::new(conn, tcp);

        // Force the handshake to complete now rather than lazily on first
        // read/write, so TLS errors surface as a connect-time failure.
        tls.conn.complete_io(&mut tls.sock).map_err(Error::io)?;

        let peer_certificates: Vec<Vec<u8>> = tls
            .conn
            .peer_certificates()
            .map(|certs| certs.iter().map(|c| c.0.clone()).collect())
            .unwrap_or_default();

        if let Some(pinner) = &self.certificate_pinner {
            pinner.check(server_name, &peer_certificates)?;
        }

        let handshake = Handshake {
            tls_version: tls
                .conn
                .protocol_version()
                .map(protocol_version_name)
                .unwrap_or("unknown"),
            cipher_suite: tls
                .conn
                .negotiated_cipher_suite()
                .map(|cs| format!("{:?}", cs.suite()))
                .unwrap_or_default(),
            peer_certificates,
            local_certificates: Vec::new(),
        };

        Ok((Stream::Tls(Box::new(tls)), handshake))
    }
}

fn protocol_version_name(v: rustls::ProtocolVersion) -> &'static str {
    match v {
        rustls::ProtocolVersion::TLSv1_2 => "TLSv1.2",
        rustls::ProtocolVersion::TLSv1_3 => "TLSv1.3",
        _ => "unknown",
    }
}

/// `(hostname pattern, pin-hash)` pairs, checked against the cleaned
/// leaf-to-root chain (spec.md SS6).
pub struct CertificatePinner {
    pins: Vec<(String, [u8; 32])>,
}

impl CertificatePinner {
    pub fn new() -> CertificatePinner {
        CertificatePinner { pins: Vec::new() }
    }

    /// `pin` is a `sha256/BASE64` pin, OkHttp-style.
    pub fn add_pin(mut self, hostname_pattern: impl Into<String>, pin_sha256: [u8; 32]) -> Self {
        self.pins.push((hostname_pattern.into(), pin_sha256));
        self
    }

    fn matches_hostname(pattern: &str, hostname: &str) -> bool {
        if let Some(suffix) = pattern.strip_prefix("*.") {
            hostname.ends_with(suffix) && hostname.len() > suffix.len() + 1
        } else {
            pattern.eq_ignore_ascii_case(hostname)
        }
    }

    /// Clean the chain (drop unrelated certs, cap length at 10) and check
    /// pins for `hostname`. Errors with `Kind::Tls` ("peer unverified") on
    /// mismatch or an oversize chain.
    pub fn check(&self, hostname: &str, der_chain: &[Vec<u8>]) -> Result<(), Error> {
        let applicable: Vec<&(String, [u8; 32])> = self
            .pins
            .iter()
            .filter(|(pattern, _)| Self::matches_hostname(pattern, hostname))
            .collect();
        if applicable.is_empty() {
            return Ok(());
        }

        let cleaned = clean_chain(der_chain)?;
        for cert in &cleaned {
            let digest: [u8; 32] = Sha256::digest(cert).into();
            if applicable.iter().any(|(_, pin)| *pin == digest) {
                return Ok(());
            }
        }

        Err(Error::tls(PeerUnverified))
    }
}

impl Default for CertificatePinner {
    fn default() -> Self {
        CertificatePinner::new()
    }
}

/// Caps chain length at 10, per spec.md SS6 and the boundary test in SS8.
fn clean_chain(der_chain: &[Vec<u8>]) -> Result<Vec<Vec<u8>>, Error> {
    if der_chain.len() > 10 {
        return Err(Error::tls(ChainTooLong));
    }
    Ok(der_chain.to_vec())
}

#[derive(Debug)]
struct PeerUnverified;

impl fmt::Display for PeerUnverified {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("certificate pinning failure: peer unverified")
    }
}

impl std::error::Error for PeerUnverified {}

#[derive(Debug)]
struct ChainTooLong;

impl fmt::Display for ChainTooLong {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("certificate chain longer than 10 is rejected by the chain cleaner")
    }
}

impl std::error::Error for ChainTooLong {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_long_chains() {
        let chain: Vec<Vec<u8>> = (0..11).map(|i| vec![i as u8]).collect();
        assert!(clean_chain(&chain).is_err());
    }

    #[test]
    fn wildcard_hostname_match() {
        assert!(CertificatePinner::matches_hostname("*.example.com", "api.example.com"));
        assert!(!CertificatePinner::matches_hostname("*.example.com", "example.com"));
    }
}
