// Self-signed TLS material for loopback clusters, demos, and tests.
use anyhow::{Context, Result};
use quinn::{ClientConfig, ServerConfig};
use rcgen::generate_simple_self_signed;
use rustls::RootCertStore;
use rustls::pki_types::{CertificateDer, PrivatePkcs8KeyDer};
use std::sync::Arc;

/// Build a server config with a fresh self-signed certificate for `server_name`, and a
/// client config that trusts exactly that certificate.
pub fn self_signed_pair(server_name: &str) -> Result<(ServerConfig, ClientConfig)> {
    let cert = generate_simple_self_signed(vec![server_name.to_string()])
        .context("generate self-signed cert")?;
    let cert_der = CertificateDer::from(cert.serialize_der().context("serialize cert")?);
    let key_der = PrivatePkcs8KeyDer::from(cert.get_key_pair().serialize_der());
    let server_config = ServerConfig::with_single_cert(vec![cert_der.clone()], key_der.into())
        .context("build server config")?;

    let mut roots = RootCertStore::empty();
    roots.add(cert_der).context("add root cert")?;
    let client_config =
        ClientConfig::with_root_certificates(Arc::new(roots)).context("build client config")?;
    Ok((server_config, client_config))
}
