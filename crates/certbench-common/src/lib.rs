mod error;
mod tls;
mod verifier;

pub use error::TlsError;
pub use tls::{
    build_client_config, crypto_provider, load_certs, load_certs_from_pem, load_private_key,
    load_private_key_from_pem, load_root_store, load_root_store_dir, ClientTrust,
};
pub use verifier::{AcceptAnyServerCert, SelfSignedAwareVerifier};
