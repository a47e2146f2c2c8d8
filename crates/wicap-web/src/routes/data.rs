//! Streaming of the virtual sample files.
//!
//! A GET opens a transfer slot, which freezes the file length, and the body
//! pulls chunks from that slot until it is exhausted, then closes it. A body
//! dropped mid-transfer leaves the slot open for the idle sweep to reclaim.

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
};
use futures::stream::{self, Stream};

use wicap_core::{Encoding, SlotId, StreamError};
use wicap_protocol::{DATA_BIN_PATH, DATA_TXT_PATH};

use super::NO_CACHE;
use crate::AppState;

/// Bytes pulled from a slot per body chunk.
pub const CHUNK_SIZE: usize = 960;

pub async fn data_bin_handler(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
) -> Response {
    serve(state, Encoding::Raw, DATA_BIN_PATH, &method, &headers).await
}

pub async fn data_txt_handler(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
) -> Response {
    serve(state, Encoding::Base64, DATA_TXT_PATH, &method, &headers).await
}

fn content_type(encoding: Encoding) -> &'static str {
    match encoding {
        Encoding::Raw => "application/octet-stream",
        Encoding::Base64 => "text/plain",
    }
}

async fn serve(
    state: AppState,
    encoding: Encoding,
    path: &str,
    method: &Method,
    headers: &HeaderMap,
) -> Response {
    let now = state.now_ms();
    let mut instrument = state.lock().await;

    // HEAD only needs the size; don't tie up a slot for it
    if *method == Method::HEAD {
        let stat = instrument.stat(encoding, path);
        return (
            NO_CACHE,
            [
                (header::CONTENT_TYPE, content_type(encoding).to_string()),
                (header::CONTENT_LENGTH, stat.size.to_string()),
            ],
        )
            .into_response();
    }

    let (id, total) = match instrument
        .open(encoding, path, now)
        .and_then(|id| instrument.output_length(id).map(|total| (id, total)))
    {
        Ok(opened) => opened,
        Err(e) => return stream_error_response(e),
    };

    let range = headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_range);
    let (status, start, len) = match range {
        Some((start, end)) if start < total => {
            let end = end.map_or(total - 1, |end| end.min(total - 1));
            if let Err(e) = instrument.seek(id, start, now) {
                let _ = instrument.close(id, now);
                return stream_error_response(e);
            }
            (StatusCode::PARTIAL_CONTENT, start, end - start + 1)
        }
        Some(_) => {
            let _ = instrument.close(id, now);
            return (
                StatusCode::RANGE_NOT_SATISFIABLE,
                [(header::CONTENT_RANGE, format!("bytes */{}", total))],
            )
                .into_response();
        }
        None => (StatusCode::OK, 0, total),
    };
    drop(instrument);

    let mut response = (
        status,
        NO_CACHE,
        [
            (header::CONTENT_TYPE, content_type(encoding).to_string()),
            (header::CONTENT_LENGTH, len.to_string()),
            (header::ACCEPT_RANGES, "bytes".to_string()),
        ],
        Body::from_stream(chunks(state, id, len)),
    )
        .into_response();
    if status == StatusCode::PARTIAL_CONTENT {
        if let Ok(value) = format!("bytes {}-{}/{}", start, start + len - 1, total).parse() {
            response.headers_mut().insert(header::CONTENT_RANGE, value);
        }
    }
    response
}

/// Body chunks for `len` bytes of slot `id`. The slot is closed once they
/// have all been produced or a read fails.
fn chunks(
    state: AppState,
    id: SlotId,
    len: usize,
) -> impl Stream<Item = Result<Vec<u8>, StreamError>> + Send + 'static {
    stream::unfold((state, len), move |(state, remaining)| async move {
        let now = state.now_ms();
        let item = {
            let mut instrument = state.lock().await;
            let mut buf = vec![0u8; remaining.min(CHUNK_SIZE)];
            match instrument.read(id, &mut buf, now) {
                Ok(0) => {
                    let _ = instrument.close(id, now);
                    None
                }
                Ok(n) => {
                    buf.truncate(n);
                    Some(Ok(buf))
                }
                Err(e) => {
                    tracing::warn!("Read on slot {} failed: {}", id.index(), e);
                    let _ = instrument.close(id, now);
                    None
                }
            }
        }?;
        let remaining = match &item {
            Ok(buf) => remaining - buf.len(),
            Err(_) => 0,
        };
        Some((item, (state, remaining)))
    })
}

/// Parse `bytes=N-` or `bytes=N-M`. Suffix and multi-part ranges are not
/// served and yield `None`.
fn parse_range(value: &str) -> Option<(usize, Option<usize>)> {
    let (start, end) = value.trim().strip_prefix("bytes=")?.split_once('-')?;
    let start = start.trim().parse().ok()?;
    let end = match end.trim() {
        "" => None,
        end => Some(end.parse().ok()?),
    };
    match end {
        Some(end) if end < start => None,
        _ => Some((start, end)),
    }
}

fn stream_error_response(e: StreamError) -> Response {
    tracing::warn!("{}", e);
    match e {
        StreamError::PoolExhausted => {
            (StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable\n").into_response()
        }
        StreamError::UnsupportedVariant(_) => (StatusCode::NOT_FOUND, "Not Found\n").into_response(),
        StreamError::SlotClosed(_) | StreamError::Encode(_) => {
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::tests::{body_bytes, get, handle, run_capture};
    use crate::{create_router, InstrumentHandle};
    use axum::http::Request;
    use pretty_assertions::assert_eq;
    use tower::ServiceExt;
    use wicap_core::sim::pattern_word;
    use wicap_core::stream::MAX_CONNS;
    use wicap_core::base64_length;

    async fn captured(samples: usize) -> InstrumentHandle {
        let state = handle();
        get(&state, &format!("/?xsamp={}&xrate=1000000&cmd=1", samples)).await;
        run_capture(&state).await;
        state
    }

    fn expected_raw(samples: usize) -> Vec<u8> {
        (0..samples)
            .flat_map(|i| pattern_word(i + wicap_core::capture::XSAMP_PRE).to_le_bytes())
            .collect()
    }

    #[test]
    fn test_parse_range() {
        assert_eq!(parse_range("bytes=100-"), Some((100, None)));
        assert_eq!(parse_range("bytes=0-99"), Some((0, Some(99))));
        assert_eq!(parse_range("bytes=-500"), None);
        assert_eq!(parse_range("bytes=9-3"), None);
        assert_eq!(parse_range("items=0-1"), None);
    }

    #[tokio::test]
    async fn test_raw_download() {
        let state = captured(1000).await;
        let response = get(&state, "/data.bin").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "2000");
        assert_eq!(response.headers()[header::PRAGMA], "no-cache");

        let body = body_bytes(response).await;
        assert_eq!(body, expected_raw(1000));
        assert_eq!(state.lock().await.open_transfers(), 0);
    }

    #[tokio::test]
    async fn test_base64_download() {
        let state = captured(100).await;
        let response = get(&state, "/data.txt").await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_bytes(response).await;
        assert_eq!(body.len(), base64_length(200));

        use base64::Engine;
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(&body)
            .unwrap();
        assert_eq!(decoded, expected_raw(100));
    }

    #[tokio::test]
    async fn test_range_restart() {
        let state = captured(1000).await;
        let request = Request::builder()
            .uri("/data.bin")
            .header(header::RANGE, "bytes=1500-")
            .body(Body::empty())
            .unwrap();
        let response = create_router(state.clone()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes 1500-1999/2000");
        assert_eq!(body_bytes(response).await, expected_raw(1000)[1500..].to_vec());
    }

    #[tokio::test]
    async fn test_range_past_end() {
        let state = captured(10).await;
        let request = Request::builder()
            .uri("/data.bin")
            .header(header::RANGE, "bytes=20-")
            .body(Body::empty())
            .unwrap();
        let response = create_router(state.clone()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(state.lock().await.open_transfers(), 0);
    }

    #[tokio::test]
    async fn test_head_uses_stat() {
        let state = captured(10).await;
        let request = Request::builder()
            .method(Method::HEAD)
            .uri("/data.txt")
            .body(Body::empty())
            .unwrap();
        let response = create_router(state.clone()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "28");
        assert_eq!(state.lock().await.open_transfers(), 0);
    }

    #[tokio::test]
    async fn test_pool_exhausted() {
        let state = captured(10).await;
        let mut held = Vec::new();
        for _ in 0..MAX_CONNS {
            let response = get(&state, "/data.bin").await;
            assert_eq!(response.status(), StatusCode::OK);
            held.push(response);
        }
        let response = get(&state, "/data.bin").await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        drop(held);
        let now = state.now_ms();
        assert_eq!(state.lock().await.sweep_idle(now + 31_000), MAX_CONNS);
        assert_eq!(get(&state, "/data.bin").await.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_failed_read_ends_body() {
        use futures::StreamExt;

        let state = captured(10).await;
        let now = state.now_ms();
        let stale = state.lock().await.open(Encoding::Raw, DATA_BIN_PATH, now).unwrap();
        let mut body = Box::pin(chunks(state.clone(), stale, 20));

        // Reclaimed, then reused by another reader
        assert_eq!(state.lock().await.sweep_idle(now + 31_000), 1);
        let other = state.lock().await.open(Encoding::Raw, DATA_BIN_PATH, now).unwrap();
        assert_eq!(other.index(), stale.index());

        assert!(body.next().await.is_none());
        let instrument = state.lock().await;
        assert_eq!(instrument.open_transfers(), 1);
        assert_eq!(instrument.output_length(other).unwrap(), 20);
    }

    #[tokio::test]
    async fn test_body_closes_slot_when_done() {
        use futures::StreamExt;

        let state = captured(10).await;
        let now = state.now_ms();
        let id = state.lock().await.open(Encoding::Raw, DATA_BIN_PATH, now).unwrap();
        let body: Vec<_> = chunks(state.clone(), id, 20).collect().await;
        assert_eq!(body.len(), 1);
        assert_eq!(state.lock().await.open_transfers(), 0);
    }

    #[test]
    fn test_error_mapping() {
        assert_eq!(
            stream_error_response(StreamError::UnsupportedVariant("/data.bin.gz".into())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            stream_error_response(StreamError::PoolExhausted).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
