//! TLS context lifecycle: self-signed material bootstrap, persistence, and
//! the pinned TLS-1.3-only server/client configs peers are wrapped in.
//!
//! Grounded in the original's OpenSSL bootstrap
//! (`examples/original_source/src/app/network/secure.cpp`): `rcgen` replaces
//! the `EVP_PKEY`/`X509` generation calls, `rustls-pemfile` replaces
//! `PEM_read_X509`/`PEM_read_PrivateKey`, and `rustls::ServerConfig`/
//! `ClientConfig` replace `SSL_CTX`. Peers trust each other by possession of
//! an encrypted channel, not by a shared certificate authority — the
//! original only ever checks a certificate against its own key
//! (`X509_verify`), never against a CA chain, so the client side here
//! likewise accepts any well-formed server certificate.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use pkcs8::der::pem::LineEnding;
use pkcs8::{EncryptedPrivateKeyInfo, PrivateKeyInfo};
use rand::rngs::OsRng;
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::{info, warn};

use crate::config::TlsConfig;
use crate::error::{Error, Result};

const CERTIFICATE_FILE_NAME: &str = "cert.pem";
const PRIVATE_KEY_FILE_NAME: &str = "key.pem";
const CERTIFICATE_VALIDITY_DAYS: i64 = 365;
const CERTIFICATE_COMMON_NAME: &str = "node";
/// PEM label rustls-pemfile doesn't itself decode; seeing it in key.pem
/// tells [`load_tls_material`] to route through [`decrypt_private_key_pem`]
/// instead (spec.md §6: "AES-256-CBC-encrypted when a password is configured").
const ENCRYPTED_KEY_LABEL: &str = "ENCRYPTED PRIVATE KEY";

/// Loaded or freshly-generated TLS material, ready to build configs from.
pub struct TlsMaterial {
    pub cert_chain: Vec<CertificateDer<'static>>,
    pub private_key: PrivateKeyDer<'static>,
}

/// Loads `cert.pem`/`key.pem` from `config.directory`, generating and
/// persisting a fresh self-signed pair if either is missing or unreadable.
/// `confirm_regeneration` is asked before anything is (re)written, mirroring
/// the operator prompt in the original bootstrap; tests and unattended
/// deployments pass a closure that always returns `true`.
pub fn ensure_tls_material(config: &TlsConfig, confirm_regeneration: impl FnOnce() -> bool) -> Result<TlsMaterial> {
    match load_tls_material(config) {
        Ok(material) => {
            info!(directory = %config.directory.display(), "loaded existing TLS material");
            Ok(material)
        }
        Err(err) => {
            warn!(directory = %config.directory.display(), error = %err, "TLS material missing or invalid");
            if !confirm_regeneration() {
                return Err(Error::Tls("operator declined certificate regeneration".to_string()));
            }
            generate_and_store_tls_material(config)
        }
    }
}

fn load_tls_material(config: &TlsConfig) -> Result<TlsMaterial> {
    let cert_path = config.directory.join(CERTIFICATE_FILE_NAME);
    let key_path = config.directory.join(PRIVATE_KEY_FILE_NAME);

    let cert_bytes = fs::read(&cert_path).map_err(|e| Error::Tls(format!("reading {}: {e}", cert_path.display())))?;
    let key_bytes = fs::read(&key_path).map_err(|e| Error::Tls(format!("reading {}: {e}", key_path.display())))?;

    let cert_chain: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut cert_bytes.as_slice())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Tls(format!("parsing certificate PEM: {e}")))?;
    if cert_chain.is_empty() {
        return Err(Error::Tls("certificate file contains no certificates".to_string()));
    }

    let private_key = if key_bytes.windows(ENCRYPTED_KEY_LABEL.len()).any(|w| w == ENCRYPTED_KEY_LABEL.as_bytes()) {
        let password = config
            .key_password
            .as_deref()
            .ok_or_else(|| Error::Tls("key.pem is encrypted but no tls.key_password is configured".to_string()))?;
        decrypt_private_key_pem(&key_bytes, password)?
    } else {
        rustls_pemfile::private_key(&mut key_bytes.as_slice())
            .map_err(|e| Error::Tls(format!("parsing private key PEM: {e}")))?
            .ok_or_else(|| Error::Tls("private key file contains no key".to_string()))?
    };

    Ok(TlsMaterial { cert_chain, private_key })
}

fn generate_and_store_tls_material(config: &TlsConfig) -> Result<TlsMaterial> {
    fs::create_dir_all(&config.directory)
        .map_err(|e| Error::Tls(format!("creating {}: {e}", config.directory.display())))?;

    let key_pair = KeyPair::generate().map_err(|e| Error::Tls(format!("generating key pair: {e}")))?;

    let mut params = CertificateParams::new(vec![CERTIFICATE_COMMON_NAME.to_string()])
        .map_err(|e| Error::Tls(format!("building certificate params: {e}")))?;
    params.distinguished_name = DistinguishedName::new();
    params.distinguished_name.push(DnType::CommonName, CERTIFICATE_COMMON_NAME);
    params.not_before = OffsetDateTime::now_utc();
    params.not_after = OffsetDateTime::now_utc() + TimeDuration::days(CERTIFICATE_VALIDITY_DAYS);

    let cert = params.self_signed(&key_pair).map_err(|e| Error::Tls(format!("self-signing certificate: {e}")))?;

    let cert_pem = cert.pem();
    let key_pem = match &config.key_password {
        Some(password) => encrypt_private_key_pem(&key_pair.serialize_der(), password)?,
        None => key_pair.serialize_pem(),
    };

    fs::write(config.directory.join(CERTIFICATE_FILE_NAME), &cert_pem)
        .map_err(|e| Error::Tls(format!("writing cert.pem: {e}")))?;
    fs::write(config.directory.join(PRIVATE_KEY_FILE_NAME), &key_pem)
        .map_err(|e| Error::Tls(format!("writing key.pem: {e}")))?;

    info!(
        directory = %config.directory.display(),
        encrypted = config.key_password.is_some(),
        "generated new self-signed TLS material"
    );
    load_tls_material(config)
}

/// AES-256-CBC-encrypts a freshly-generated PKCS#8 private key under
/// `password`, PBES2-wrapped per PKCS#8/PKCS#5 (spec.md §6). Uses the same
/// RustCrypto crate family already relied on for the hash engines.
fn encrypt_private_key_pem(der: &[u8], password: &str) -> Result<String> {
    let info = PrivateKeyInfo::try_from(der).map_err(|e| Error::Tls(format!("parsing generated key as PKCS#8: {e}")))?;
    let encrypted =
        info.encrypt(OsRng, password.as_bytes()).map_err(|e| Error::Tls(format!("encrypting private key: {e}")))?;
    encrypted
        .to_pem(ENCRYPTED_KEY_LABEL, LineEnding::LF)
        .map(|pem| pem.to_string())
        .map_err(|e| Error::Tls(format!("encoding encrypted key PEM: {e}")))
}

fn decrypt_private_key_pem(pem_bytes: &[u8], password: &str) -> Result<PrivateKeyDer<'static>> {
    let pem_str = std::str::from_utf8(pem_bytes).map_err(|e| Error::Tls(format!("key.pem is not valid UTF-8: {e}")))?;
    let (_label, der) =
        pkcs8::der::pem::decode_vec(pem_str.as_bytes()).map_err(|e| Error::Tls(format!("decoding encrypted key PEM: {e}")))?;
    let encrypted = EncryptedPrivateKeyInfo::try_from(der.as_slice())
        .map_err(|e| Error::Tls(format!("parsing encrypted PKCS#8 structure: {e}")))?;
    let decrypted = encrypted
        .decrypt(password.as_bytes())
        .map_err(|_| Error::Tls("decrypting private key failed (wrong tls.key_password?)".to_string()))?;
    Ok(PrivateKeyDer::Pkcs8(decrypted.as_bytes().to_vec().into()))
}

/// Builds the server-side TLS-1.3-only config peers are accepted through.
pub fn build_server_config(material: &TlsMaterial) -> Result<Arc<ServerConfig>> {
    let config = ServerConfig::builder_with_protocol_versions(&[&rustls::version::TLS13])
        .with_no_client_auth()
        .with_single_cert(material.cert_chain.clone(), material.private_key.clone_key())
        .map_err(|e| Error::Tls(format!("building server config: {e}")))?;
    Ok(Arc::new(config))
}

/// Builds the client-side TLS-1.3-only config used to dial peers. Accepts
/// any server certificate: this network has no certificate authority, so
/// peer identity is established by the protocol handshake, not by PKI trust.
pub fn build_client_config() -> Arc<ClientConfig> {
    let config = ClientConfig::builder_with_protocol_versions(&[&rustls::version::TLS13])
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
        .with_no_client_auth();
    Arc::new(config)
}

#[derive(Debug)]
struct AcceptAnyServerCert;

impl rustls::client::danger::ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &rustls::crypto::ring::default_provider().signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &rustls::crypto::ring::default_provider().signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider().signature_verification_algorithms.supported_schemes()
    }
}

/// An empty root store, since [`AcceptAnyServerCert`] never consults it; kept
/// around only to satisfy APIs that want a [`RootCertStore`] by value.
pub fn empty_root_store() -> RootCertStore {
    RootCertStore::empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TlsConfig;

    #[test]
    fn generates_and_reloads_material() {
        let dir = std::env::temp_dir().join(format!("net-tls-test-{}", std::process::id()));
        let config = TlsConfig { directory: dir.clone(), key_password: None };

        let material = ensure_tls_material(&config, || true).expect("generate material");
        assert!(!material.cert_chain.is_empty());

        let reloaded = ensure_tls_material(&config, || panic!("should not need to regenerate")).unwrap();
        assert_eq!(reloaded.cert_chain.len(), material.cert_chain.len());

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn declining_regeneration_is_an_error() {
        let dir = std::env::temp_dir().join(format!("net-tls-test-decline-{}", std::process::id()));
        let config = TlsConfig { directory: dir.clone(), key_password: None };
        let err = ensure_tls_material(&config, || false).unwrap_err();
        assert!(err.to_string().contains("declined"));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn password_protected_key_round_trips() {
        let dir = std::env::temp_dir().join(format!("net-tls-test-encrypted-{}", std::process::id()));
        let config = TlsConfig { directory: dir.clone(), key_password: Some("correct horse battery staple".to_string()) };

        let material = ensure_tls_material(&config, || true).expect("generate encrypted material");
        let key_bytes = fs::read(dir.join(PRIVATE_KEY_FILE_NAME)).unwrap();
        assert!(key_bytes.windows(ENCRYPTED_KEY_LABEL.len()).any(|w| w == ENCRYPTED_KEY_LABEL.as_bytes()));

        let reloaded = ensure_tls_material(&config, || panic!("should not need to regenerate")).unwrap();
        assert_eq!(reloaded.cert_chain.len(), material.cert_chain.len());

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn wrong_password_fails_to_decrypt() {
        let dir = std::env::temp_dir().join(format!("net-tls-test-wrongpw-{}", std::process::id()));
        let config = TlsConfig { directory: dir.clone(), key_password: Some("right-password".to_string()) };
        ensure_tls_material(&config, || true).expect("generate encrypted material");

        let wrong = TlsConfig { directory: dir.clone(), key_password: Some("wrong-password".to_string()) };
        let err = load_tls_material(&wrong).unwrap_err();
        assert!(err.to_string().contains("wrong tls.key_password"));

        let _ = fs::remove_dir_all(&dir);
    }
}
