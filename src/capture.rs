//! Request and response body capture.
//!
//! The request side is buffered in full and replayed, so downstream
//! handlers read an untouched stream from the start. The response side is
//! teed chunk by chunk while it streams to the client, with the copy
//! accumulated out of band.

use axum::body::{Body, Bytes, HttpBody};
use axum::extract::Request;
use bytes::BytesMut;
use futures::{stream, StreamExt};
use http_body_util::BodyExt;
use tokio::sync::mpsc;

/// Error yielded by the replacement request body after the original stream
/// failed mid-read.
#[derive(Debug, thiserror::Error)]
#[error("request body read failed: {0}")]
pub(crate) struct BodyReadError(String);

/// Reads the request body to completion and reinstalls a fresh in-memory
/// copy, returning the captured bytes.
///
/// If the read fails nothing is captured and the replacement body
/// reproduces the failure for whoever consumes it next.
pub(crate) async fn capture_request_body(request: &mut Request) -> Bytes {
    let body = std::mem::replace(request.body_mut(), Body::empty());
    match body.collect().await {
        Ok(collected) => {
            let bytes = collected.to_bytes();
            *request.body_mut() = Body::from(bytes.clone());
            bytes
        }
        Err(err) => {
            let failed = BodyReadError(err.to_string());
            *request.body_mut() = Body::from_stream(stream::once(async move {
                Err::<Bytes, BodyReadError>(failed)
            }));
            Bytes::new()
        }
    }
}

/// Accumulator side of a response body tee.
///
/// [`install_response_tap`] forwards every chunk to the real destination
/// unchanged and queues a copy here; [`ResponseTap::collected`] resolves
/// once the stream has been driven to its end or dropped, with everything
/// that was written up to that point.
pub(crate) struct ResponseTap {
    rx: mpsc::UnboundedReceiver<Bytes>,
}

impl ResponseTap {
    /// Concatenation of all mirrored chunks. The channel is unbounded;
    /// trimming happens at formatting time, not capture time.
    pub(crate) async fn collected(mut self) -> Bytes {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.rx.recv().await {
            buf.extend_from_slice(&chunk);
        }
        buf.freeze()
    }
}

/// Wraps `body` so every data chunk is mirrored into the returned tap on
/// its way to the client. Mirroring can never fail the forwarded write; a
/// dropped receiver just stops the accumulation.
pub(crate) fn install_response_tap<B>(body: B) -> (Body, ResponseTap)
where
    B: HttpBody<Data = Bytes, Error = axum::Error> + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();

    let tapped = body.into_data_stream().map(move |result| {
        if let Ok(chunk) = &result {
            let _ = tx.send(chunk.clone());
        }
        result
    });

    (Body::from_stream(tapped), ResponseTap { rx })
}
