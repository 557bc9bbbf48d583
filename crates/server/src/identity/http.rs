//! Outbound HTTPS plumbing for provider calls.

use bytes::Bytes;
use http_body_util::Full;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::{Client, connect::HttpConnector};
use hyper_util::rt::TokioExecutor;
use once_cell::sync::OnceCell;
use rustls::{ClientConfig, RootCertStore};
use std::sync::Arc;

pub(crate) type HttpsClient = Client<HttpsConnector<HttpConnector>, Full<Bytes>>;

/// Shared TLS configuration so the root store is built once per process.
static TLS_CONFIG: OnceCell<Arc<ClientConfig>> = OnceCell::new();

fn shared_tls_config() -> Result<Arc<ClientConfig>, rustls::Error> {
    TLS_CONFIG
        .get_or_try_init(|| {
            let mut root_cert_store = RootCertStore::empty();
            root_cert_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

            let config = ClientConfig::builder_with_provider(Arc::new(
                rustls::crypto::ring::default_provider(),
            ))
            .with_safe_default_protocol_versions()?
            .with_root_certificates(root_cert_store)
            .with_no_client_auth();

            Ok(Arc::new(config))
        })
        .cloned()
}

/// Client that speaks HTTPS to real providers and plain HTTP to local stand-ins.
pub(crate) fn build_client() -> Result<HttpsClient, rustls::Error> {
    let tls = shared_tls_config()?;
    let connector = HttpsConnectorBuilder::new()
        .with_tls_config((*tls).clone())
        .https_or_http()
        .enable_http1()
        .build();

    Ok(Client::builder(TokioExecutor::new()).build(connector))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tls_config_is_shared() {
        let first = shared_tls_config().unwrap();
        let second = shared_tls_config().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }
}
