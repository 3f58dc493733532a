//! TLS provider setup for the HTTP client

use std::sync::Once;

static INSTALL: Once = Once::new();

/// Install the `ring` rustls provider as the process default
///
/// reqwest is built without a bundled provider, so one has to be installed
/// before the first HTTPS client is created. An already installed provider is
/// left in place.
pub fn ensure_crypto_provider() {
    INSTALL.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
