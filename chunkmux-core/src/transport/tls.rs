//! TLS transport using rustls

use super::socket_tuning::configure_socket_silent;
use super::BoxedStream;
use chunkmux_common::TlsConfig;
use rustls::crypto::ring;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

#[derive(Debug, Clone, Default)]
pub struct TlsTransportConfig {
    pub ca_cert_path: Option<PathBuf>,
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
    pub server_name: Option<String>,
}

impl From<&TlsConfig> for TlsTransportConfig {
    fn from(config: &TlsConfig) -> Self {
        Self {
            ca_cert_path: config.ca_cert_path.clone(),
            cert_path: config.cert_path.clone(),
            key_path: config.key_path.clone(),
            server_name: config.server_name.clone(),
        }
    }
}

fn invalid_data(msg: String) -> io::Error {
    io::Error::new(ErrorKind::InvalidData, msg)
}

fn load_certs(path: &Path) -> io::Result<Vec<CertificateDer<'static>>> {
    CertificateDer::pem_file_iter(path)
        .map_err(|e| invalid_data(format!("{}: {e}", path.display())))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| invalid_data(format!("{}: {e}", path.display())))
}

fn load_private_key(path: &Path) -> io::Result<PrivateKeyDer<'static>> {
    PrivateKeyDer::from_pem_file(path).map_err(|e| invalid_data(format!("{}: {e}", path.display())))
}

fn require<'a>(path: Option<&'a PathBuf>, what: &str) -> io::Result<&'a Path> {
    path.map(PathBuf::as_path).ok_or_else(|| {
        io::Error::new(ErrorKind::InvalidInput, format!("{what} path required for TLS"))
    })
}

pub fn create_client_config(config: &TlsTransportConfig) -> io::Result<Arc<ClientConfig>> {
    let mut root_store = RootCertStore::empty();

    let ca_path = require(config.ca_cert_path.as_ref(), "CA certificate")?;
    for cert in load_certs(ca_path)? {
        root_store
            .add(cert)
            .map_err(|e| invalid_data(format!("invalid CA cert: {e}")))?;
    }

    let client_config = ClientConfig::builder_with_provider(Arc::new(ring::default_provider()))
        .with_safe_default_protocol_versions()
        .map_err(|e| invalid_data(format!("TLS config error: {e}")))?
        .with_root_certificates(root_store)
        .with_no_client_auth();

    Ok(Arc::new(client_config))
}

pub fn create_server_config(config: &TlsTransportConfig) -> io::Result<Arc<ServerConfig>> {
    let certs = load_certs(require(config.cert_path.as_ref(), "certificate")?)?;
    let key = load_private_key(require(config.key_path.as_ref(), "private key")?)?;

    let server_config = ServerConfig::builder_with_provider(Arc::new(ring::default_provider()))
        .with_safe_default_protocol_versions()
        .map_err(|e| invalid_data(format!("TLS config error: {e}")))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| invalid_data(format!("TLS config error: {e}")))?;

    Ok(Arc::new(server_config))
}

fn server_name(config: &TlsTransportConfig, host: &str) -> io::Result<ServerName<'static>> {
    let name = config.server_name.as_deref().unwrap_or(host);
    let name = name.trim_start_matches('[').trim_end_matches(']');
    ServerName::try_from(name.to_string())
        .map_err(|e| io::Error::new(ErrorKind::InvalidInput, format!("invalid server name: {e}")))
}

pub async fn connect(addr: &str, config: &TlsTransportConfig) -> io::Result<BoxedStream> {
    let tcp_stream = TcpStream::connect(addr).await?;
    configure_socket_silent(&tcp_stream);

    let host = addr.rsplit_once(':').map_or(addr, |(host, _)| host);
    connect_over(Box::pin(tcp_stream), host, config).await
}

/// Run the client handshake over an existing stream.
pub async fn connect_over(
    stream: BoxedStream,
    host: &str,
    config: &TlsTransportConfig,
) -> io::Result<BoxedStream> {
    let connector = TlsConnector::from(create_client_config(config)?);
    let tls_stream = connector.connect(server_name(config, host)?, stream).await?;
    Ok(Box::pin(tls_stream))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config_requires_ca() {
        let err = create_client_config(&TlsTransportConfig::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_server_config_missing_files() {
        let config = TlsTransportConfig {
            cert_path: Some(PathBuf::from("/nonexistent/cert.pem")),
            key_path: Some(PathBuf::from("/nonexistent/key.pem")),
            ..TlsTransportConfig::default()
        };
        assert!(create_server_config(&config).is_err());
    }

    #[test]
    fn test_server_name_fallback() {
        let config = TlsTransportConfig::default();
        assert!(server_name(&config, "relay.example.com").is_ok());
        assert!(server_name(&config, "[::1]").is_ok());

        let config = TlsTransportConfig {
            server_name: Some("override.example.com".to_string()),
            ..TlsTransportConfig::default()
        };
        let name = server_name(&config, "10.0.0.1").unwrap();
        assert!(matches!(name, ServerName::DnsName(ref d) if d.as_ref() == "override.example.com"));
    }
}
