use crate::tls::cert_verifier::BenchCertVerifier;
use anyhow::Context;
use pki_types::{CertificateDer, PrivateKeyDer};
use rustls::crypto::CryptoProvider;
use rustls::crypto::ring::{DEFAULT_CIPHER_SUITES, default_provider};
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

pub const ALPN_PROTOCOLS: [&[u8]; 2] = [b"h2", b"http/1.1"];

fn provider() -> Arc<CryptoProvider> {
    Arc::new(CryptoProvider {
        cipher_suites: DEFAULT_CIPHER_SUITES.to_vec(),
        ..default_provider()
    })
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, anyhow::Error> {
    let f = File::open(path)
        .with_context(|| format!("Failed to open certificate file {}", path.display()))?;
    let mut rd = BufReader::new(f);
    let certs = rustls_pemfile::certs(&mut rd).collect::<Result<Vec<_>, _>>()?;
    ensure!(!certs.is_empty(), "No certificate found in {}", path.display());
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, anyhow::Error> {
    let f = File::open(path)
        .with_context(|| format!("Failed to open private key file {}", path.display()))?;
    let mut rd = BufReader::new(f);
    rustls_pemfile::private_key(&mut rd)?
        .ok_or(anyhow!("No private key found in {}", path.display()))
}

pub fn client_config(
    skip_validate: bool,
    certificate_path: Option<&Path>,
) -> Result<ClientConfig, anyhow::Error> {
    let mut root_store = RootCertStore::empty();
    if let Some(file_path) = certificate_path {
        for cert in load_certs(file_path)? {
            root_store.add(cert)?;
        }
    } else {
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    };

    let provider = provider();
    let verifier = BenchCertVerifier::new(skip_validate, provider.clone(), &root_store)?;
    if skip_validate {
        warn!("Server certificate validation is disabled");
    }

    let mut tls_config = ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(rustls::DEFAULT_VERSIONS)?
        .with_root_certificates(root_store)
        .with_no_client_auth();
    tls_config
        .dangerous()
        .set_certificate_verifier(Arc::new(verifier));
    tls_config.alpn_protocols = ALPN_PROTOCOLS.iter().map(|p| p.to_vec()).collect();
    Ok(tls_config)
}

pub fn server_config(cert_path: &Path, key_path: &Path) -> Result<ServerConfig, anyhow::Error> {
    let certs = load_certs(cert_path)?;
    let key = load_key(key_path)?;
    let mut tls_config = ServerConfig::builder_with_provider(provider())
        .with_protocol_versions(rustls::DEFAULT_VERSIONS)?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("Invalid certificate or private key")?;
    tls_config.alpn_protocols = ALPN_PROTOCOLS.iter().map(|p| p.to_vec()).collect();
    Ok(tls_config)
}
