use pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::DigitallySignedStruct;
use rustls::Error;
use rustls::RootCertStore;
use rustls::SignatureScheme;
use rustls::client::danger::HandshakeSignatureValid;
use rustls::client::danger::ServerCertVerified;
use rustls::client::danger::ServerCertVerifier;
use rustls::crypto::CryptoProvider;
use std::sync::Arc;

/// WebPKI verification that can be switched off for benchmark deployments
/// running on self-signed certificates. Handshake signatures are always
/// checked so the handshake still does its real work.
#[derive(Debug)]
pub struct BenchCertVerifier {
    verifier: Arc<dyn ServerCertVerifier>,
    skip_validate: bool,
}

impl BenchCertVerifier {
    pub fn new(
        skip_validate: bool,
        provider: Arc<CryptoProvider>,
        root_store: &RootCertStore,
    ) -> Result<Self, anyhow::Error> {
        let verifier = rustls::client::WebPkiServerVerifier::builder_with_provider(
            root_store.clone().into(),
            provider,
        )
        .build()?;

        Ok(Self {
            verifier,
            skip_validate,
        })
    }
}

impl ServerCertVerifier for BenchCertVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, Error> {
        if self.skip_validate {
            trace!("Skipping certificate validation for {:?}", server_name);
            Ok(ServerCertVerified::assertion())
        } else {
            self.verifier
                .verify_server_cert(end_entity, intermediates, server_name, ocsp, now)
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        self.verifier.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        self.verifier.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.verifier.supported_verify_schemes()
    }
}
