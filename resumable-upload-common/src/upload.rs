use crate::error::{is_canceled, is_retryable, ApiError};
use crate::http::{self, body_to_str, ChunkResponse};
use crate::media;
use crate::retry::RetryPolicy;
use crate::*;

use anyhow::Context;
use hyper::body::Bytes;
use hyper::client::connect::Connect;
use log::{debug, warn};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt};

/// Chunk sizes must be a multiple of this.
pub const CHUNK_GRANULARITY: usize = 256 * 1024;
/// 5 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 20 * CHUNK_GRANULARITY;

/// Where an upload is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    NotStarted,
    /// The server has persisted this many bytes.
    Uploading(u64),
    Completed,
    Failed,
    Canceled,
}

/// Called with the number of bytes persisted by the server after each acknowledged chunk.
pub type ProgressCallback<'a> = Box<dyn FnMut(u64) + Send + 'a>;

/// A resumable upload in progress, useful for sending large objects.
///
/// Data is sent in sequential chunks of at most `max_chunksize` bytes to the session URI; only
/// one request is in flight at any time. The server answers each intermediate chunk with `308
/// Resume Incomplete` and the final chunk with the created resource, which is returned as
/// `Response`.
pub struct ResumableUpload<'client, Response, C = TlsConnr> {
    dest: hyper::Uri,
    cl: &'client hyper::Client<C, hyper::Body>,
    max_chunksize: usize,
    media_type: String,
    retry: RetryPolicy,
    timeout: Option<Duration>,
    progress: Option<ProgressCallback<'client>>,
    cancel: CancellationToken,
    state: UploadState,
    _resp: std::marker::PhantomData<Response>,
}

impl<'client, Response, C> ResumableUpload<'client, Response, C>
where
    Response: DeserializeOwned + Default,
    C: Connect + Clone + Send + Sync + 'static,
{
    pub fn new(
        to: hyper::Uri,
        cl: &'client hyper::Client<C, hyper::Body>,
    ) -> ResumableUpload<'client, Response, C> {
        ResumableUpload {
            dest: to,
            cl: cl,
            max_chunksize: DEFAULT_CHUNK_SIZE,
            media_type: String::new(),
            retry: RetryPolicy::default(),
            timeout: None,
            progress: None,
            cancel: CancellationToken::new(),
            state: UploadState::NotStarted,
            _resp: Default::default(),
        }
    }

    /// Start from the session URI as returned in the `Location:` header of the initiating
    /// request.
    pub fn from_session_uri(
        uri: &str,
        cl: &'client hyper::Client<C, hyper::Body>,
    ) -> Result<ResumableUpload<'client, Response, C>> {
        if uri.is_empty() {
            return Err(
                ApiError::InputDataError("ResumableUpload: empty session URI.".into()).into(),
            );
        }
        let dest: hyper::Uri = uri
            .parse()
            .map_err(|e| ApiError::InputDataError(format!("ResumableUpload: {}: {}", uri, e)))?;
        if dest.scheme().is_none() || dest.host().is_none() {
            return Err(ApiError::InputDataError(format!(
                "ResumableUpload: session URI {} is not absolute.",
                uri
            ))
            .into());
        }
        Ok(Self::new(dest, cl))
    }

    pub fn set_max_chunksize(&mut self, size: usize) -> Result<&mut Self> {
        if size == 0 || size % CHUNK_GRANULARITY != 0 {
            Err(ApiError::InputDataError(
                "ResumableUpload: max_chunksize must be multiple of 256 KiB.".into(),
            )
            .into())
        } else {
            self.max_chunksize = size;
            Ok(self)
        }
    }

    /// Set the media type sent with each chunk. If unset or empty, it is detected from the
    /// first bytes of the content before the upload starts.
    pub fn set_media_type<S: Into<String>>(&mut self, media_type: S) -> &mut Self {
        self.media_type = media_type.into();
        self
    }

    pub fn set_retry_policy(&mut self, policy: RetryPolicy) -> &mut Self {
        self.retry = policy;
        self
    }

    /// Give up on a single request if its complete response, body included, didn't arrive
    /// within `timeout`. A timed out request counts as a transport error.
    pub fn set_request_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.timeout = Some(timeout);
        self
    }

    /// The callback runs on the upload's control path and should return quickly.
    pub fn set_progress_callback<F: FnMut(u64) + Send + 'client>(&mut self, f: F) -> &mut Self {
        self.progress = Some(Box::new(f));
        self
    }

    /// The token is checked before each chunk and while waiting for a retry; a request that
    /// has been sent is not interrupted.
    pub fn set_cancellation_token(&mut self, token: CancellationToken) -> &mut Self {
        self.cancel = token;
        self
    }

    pub fn state(&self) -> UploadState {
        self.state
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    /// Upload content from a file. The size is taken from the file's metadata.
    pub async fn upload_file(&mut self, f: tokio::fs::File) -> Result<Response> {
        let len = f.metadata().await?.len();
        self.upload(f, len).await
    }

    /// Upload `size` bytes from `src`, starting at offset 0. The source is seeked whenever the
    /// server didn't accept all data of a chunk.
    pub async fn upload<R: AsyncRead + AsyncSeek + std::marker::Unpin>(
        &mut self,
        mut src: R,
        size: u64,
    ) -> Result<Response> {
        if self.state != UploadState::NotStarted {
            return Err(ApiError::InputDataError(format!(
                "ResumableUpload: upload to {} was already started ({:?}).",
                self.dest, self.state
            ))
            .into());
        }

        let result = self.run(&mut src, size).await;
        self.state = match &result {
            Ok(_) => UploadState::Completed,
            Err(e) if is_canceled(e) => UploadState::Canceled,
            Err(_) => UploadState::Failed,
        };
        if let Err(e) = &result {
            debug!("upload: Upload to {} ended with {:?}: {:#}", self.dest, self.state, e);
        }
        result
    }

    async fn run<R: AsyncRead + AsyncSeek + std::marker::Unpin>(
        &mut self,
        src: &mut R,
        size: u64,
    ) -> Result<Response> {
        if self.media_type.is_empty() {
            self.media_type = media::sniff_media_type(src, size).await?.to_string();
            debug!("upload: Detected media type {}", self.media_type);
        }

        // Bytes persisted by the server.
        let mut current = 0;
        // End of the chunk sent last, exclusive.
        let mut last_end = 0;
        // Set after a transient failure: ask the server how much it got before sending more.
        let mut query_status = false;
        let mut retries = 0;
        self.state = UploadState::Uploading(0);

        loop {
            self.check_canceled()?;

            let result = if query_status {
                debug!("upload: Querying status of {}", self.dest);
                http::put_to_session(
                    self.cl,
                    &self.dest,
                    http::format_empty_content_range(size),
                    None,
                    vec![],
                    self.timeout,
                )
                .await
            } else {
                let chunksize = (size - current).min(self.max_chunksize as u64);
                src.seek(std::io::SeekFrom::Start(current)).await?;
                let mut buf = vec![0 as u8; chunksize as usize];
                src.read_exact(&mut buf)
                    .await
                    .with_context(|| format!("reading {} bytes at offset {}", chunksize, current))?;

                let range = if chunksize == 0 {
                    http::format_empty_content_range(size)
                } else {
                    http::format_content_range(current, current + chunksize - 1, size)
                };
                last_end = current + chunksize;
                http::put_to_session(
                    self.cl,
                    &self.dest,
                    range,
                    Some(self.media_type.as_str()),
                    buf,
                    self.timeout,
                )
                .await
            };

            match result {
                Ok(ChunkResponse::Complete(body)) => {
                    if last_end != size {
                        return Err(ApiError::ProtocolError(format!(
                            "upload finalized after {} of {} bytes",
                            last_end, size
                        ))
                        .into());
                    }
                    debug!("upload: Upload of {} bytes to {} complete", size, self.dest);
                    if size > current {
                        self.advance(size);
                    }
                    return decode_response(body);
                }
                Ok(ChunkResponse::Incomplete(persisted)) => {
                    // A status query may report no progress; a chunk must make some.
                    let no_progress =
                        persisted < current || (!query_status && persisted == current);
                    if no_progress || persisted > last_end {
                        return Err(ApiError::ProtocolError(format!(
                            "server reports {} bytes persisted; expected {} < n <= {}",
                            persisted, current, last_end
                        ))
                        .into());
                    }
                    if persisted == size {
                        return Err(ApiError::ProtocolError(format!(
                            "server persisted all {} bytes but didn't finalize the upload",
                            size
                        ))
                        .into());
                    }
                    debug!(
                        "upload: Sent up to {} (persisted: {}) of total {} to {}",
                        last_end, persisted, size, self.dest
                    );
                    query_status = false;
                    if persisted > current {
                        retries = 0;
                        self.advance(persisted);
                    }
                    current = persisted;
                }
                Err(e) if is_retryable(&e) && retries < self.retry.max_retries => {
                    let delay = self.retry.backoff(retries);
                    retries += 1;
                    warn!(
                        "upload: Transient error at offset {} of {} ({:#}); retry {}/{} in {:?}",
                        current, size, e, retries, self.retry.max_retries, delay
                    );
                    self.sleep_or_cancel(delay).await?;
                    query_status = true;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn advance(&mut self, persisted: u64) {
        self.state = UploadState::Uploading(persisted);
        if let Some(cb) = self.progress.as_mut() {
            cb(persisted);
        }
    }

    fn check_canceled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            debug!("upload: Upload to {} canceled", self.dest);
            Err(ApiError::Canceled.into())
        } else {
            Ok(())
        }
    }

    async fn sleep_or_cancel(&self, delay: Duration) -> Result<()> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(Error::from(ApiError::Canceled)),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

fn decode_response<Response: DeserializeOwned + Default>(body: Bytes) -> Result<Response> {
    if body.is_empty() {
        return Ok(Default::default());
    }
    serde_json::from_slice(body.as_ref())
        .map_err(|e| anyhow::Error::from(e).context(body_to_str(body)))
}
