use crate::error::ApiError;
use crate::Result;

use hyper::body::Bytes;
use hyper::client::connect::Connect;
use log::debug;
use std::time::Duration;

pub(crate) fn body_to_str(b: Bytes) -> String {
    String::from_utf8(b.to_vec()).unwrap_or("[UTF-8 decode failed]".into())
}

/// `from` and `to` are inclusive.
pub(crate) fn format_content_range(from: u64, to: u64, total: u64) -> String {
    format!("bytes {}-{}/{}", from, to, total)
}

/// Range header for a request without content: an empty upload, or a status query.
pub(crate) fn format_empty_content_range(total: u64) -> String {
    format!("bytes */{}", total)
}

/// Parse a `Range: bytes=a-b` response header into the inclusive range `(a, b)`.
pub(crate) fn parse_response_range(rng: &str) -> Option<(u64, u64)> {
    let main = rng.trim().strip_prefix("bytes=")?;
    let mut parts = main.splitn(2, '-');
    let first = parts.next()?.trim().parse::<u64>().ok()?;
    let second = parts.next()?.trim().parse::<u64>().ok()?;
    if second < first {
        return None;
    }
    Some((first, second))
}

/// What the upload session answered to a PUT.
#[derive(Debug)]
pub(crate) enum ChunkResponse {
    /// 308 Resume Incomplete, with the number of bytes the server has persisted.
    Incomplete(u64),
    /// 2xx; the body contains the created resource.
    Complete(Bytes),
}

/// Translate the `Range:` header of a 308 response into the number of persisted bytes. A missing
/// header means that nothing has been persisted yet.
fn persisted_size(headers: &hyper::HeaderMap) -> Result<u64> {
    let rng = match headers.get(hyper::header::RANGE) {
        None => return Ok(0),
        Some(rng) => rng,
    };
    let rng = rng
        .to_str()
        .map_err(|_| ApiError::ProtocolError(format!("non-ASCII Range header: {:?}", rng)))?;
    match parse_response_range(rng) {
        // Uploads are sequential, so the persisted range always starts at zero.
        Some((0, to)) => Ok(to + 1),
        _ => Err(ApiError::ProtocolError(format!("unexpected Range header: {}", rng)).into()),
    }
}

/// Send one PUT to an upload session and classify the answer. Transport failures become
/// `ApiError::TransportError`, unexpected statuses `ApiError::HTTPResponseError`.
pub(crate) async fn put_to_session<C>(
    cl: &hyper::Client<C, hyper::Body>,
    dest: &hyper::Uri,
    content_range: String,
    media_type: Option<&str>,
    data: Vec<u8>,
    timeout: Option<Duration>,
) -> Result<ChunkResponse>
where
    C: Connect + Clone + Send + Sync + 'static,
{
    let mut reqb = hyper::Request::builder()
        .uri(dest.clone())
        .method(hyper::Method::PUT)
        .header(hyper::header::CONTENT_LENGTH, data.len())
        .header(hyper::header::CONTENT_RANGE, content_range);
    if let Some(mt) = media_type {
        reqb = reqb.header(hyper::header::CONTENT_TYPE, mt);
    }
    let request = reqb.body(hyper::Body::from(data))?;
    debug!("put_to_session: Launching HTTP request: {:?}", request);

    let exchange = async {
        let response = cl
            .request(request)
            .await
            .map_err(|e| ApiError::TransportError(e.to_string()))?;
        debug!("put_to_session: Received response: {:?}", response);
        let (parts, body) = response.into_parts();
        let response_body = hyper::body::to_bytes(body)
            .await
            .map_err(|e| ApiError::TransportError(e.to_string()))?;
        Ok::<_, ApiError>((parts, response_body))
    };
    let (parts, response_body) = match timeout {
        Some(t) => tokio::time::timeout(t, exchange)
            .await
            .map_err(|_| ApiError::TransportError(format!("no response within {:?}", t)))?,
        None => exchange.await,
    }?;

    let status = parts.status;
    if status == hyper::StatusCode::PERMANENT_REDIRECT {
        persisted_size(&parts.headers).map(ChunkResponse::Incomplete)
    } else if status.is_success() {
        Ok(ChunkResponse::Complete(response_body))
    } else {
        debug!("put_to_session: Encountered error: {}", status);
        Err(ApiError::HTTPResponseError(status, body_to_str(response_body)).into())
    }
}
