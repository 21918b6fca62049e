//! Common types and functions for sending large objects to Google APIs using resumable upload
//! sessions.
//!
//! An upload session is started by a call to an API method with `uploadType=resumable`; the
//! server answers with the session URI in the `Location:` header. [`ResumableUpload`] then
//! transmits the content in sequential chunks to that URI and returns the created resource.

pub use hyper;
pub use serde;
pub use serde_json;
pub use tokio_util::sync::CancellationToken;

pub use anyhow::{Error, Result};
pub use serde::{de::DeserializeOwned, Deserialize, Serialize};

pub type TlsClient = hyper::Client<TlsConnr, hyper::Body>;
pub type TlsConnr = hyper_rustls::HttpsConnector<hyper::client::HttpConnector>;

/// Create a new HTTPS client using the platform's root certificates. Plain `http://` URIs are
/// accepted as well.
pub fn https_client() -> TlsClient {
    let conn = hyper_rustls::HttpsConnectorBuilder::new()
        .with_native_roots()
        .https_or_http()
        .enable_http1()
        .enable_http2()
        .build();
    hyper::Client::builder().build(conn)
}

mod error;
mod http;
mod media;
mod retry;
mod upload;

pub use error::ApiError;
pub use media::{detect_media_type, sniff_media_type, SNIFF_LEN};
pub use retry::{is_retryable_status, RetryPolicy};
pub use upload::*;
