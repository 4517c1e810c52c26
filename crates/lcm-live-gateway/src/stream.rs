//! Render loop: drains a session's frame slot, runs the transformer and
//! writes the results as a motion-JPEG (`multipart/x-mixed-replace`) body.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json,
    body::Body,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures::Stream;
use image::imageops::FilterType;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use lcm_live_core::config::Config;
use lcm_live_core::frame::{DEFAULT_JPEG_QUALITY, Frame, STREAM_CONTENT_TYPE, encode_jpeg, multipart_part};
use lcm_live_core::protocol::{MSG_SESSION_NOT_FOUND, StatusMessage};
use lcm_live_core::{Session, SessionId};
use lcm_live_pipeline::{FrameTransformer, TransformError, TransformOutcome, run_blocking};

use crate::state::GatewayState;

/// Per-stream output settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderSettings {
    /// Minimum spacing between two emitted parts.
    pub min_interval: Duration,
    pub jpeg_quality: u8,
    /// Resize input frames to this size before transforming.
    pub frame_size: Option<(u32, u32)>,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs_f64(1.0 / 120.0),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            frame_size: None,
        }
    }
}

impl RenderSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            min_interval: config.min_frame_interval(),
            jpeg_quality: config.jpeg_quality(),
            frame_size: config.pipeline().frame_size(),
        }
    }
}

/// The consumer half of one session.
pub struct RenderLoop {
    session: Arc<Session>,
    transformer: Arc<dyn FrameTransformer>,
    settings: RenderSettings,
    last_emit: Option<Instant>,
    emitted: u64,
}

impl RenderLoop {
    pub fn new(
        session: Arc<Session>,
        transformer: Arc<dyn FrameTransformer>,
        settings: RenderSettings,
    ) -> Self {
        Self {
            session,
            transformer,
            settings,
            last_emit: None,
            emitted: 0,
        }
    }

    /// Produce the next multipart part, or `None` once the session's slot is
    /// closed.
    ///
    /// Frames the safety filter rejects and frames the transformer fails on
    /// are skipped; the loop moves on to the next frame.
    pub async fn next_part(&mut self) -> Option<Bytes> {
        if let Some(last) = self.last_emit {
            let wait = self.settings.min_interval.saturating_sub(last.elapsed());
            tokio::time::sleep(wait).await;
        }

        let session_id = self.session.id();
        loop {
            let frame = self.session.slot().get().await?;
            let seq = frame.seq;
            let queued = frame.received_at.elapsed();
            debug!(
                session_id = %session_id,
                seq,
                width = frame.width(),
                height = frame.height(),
                queued_ms = queued.as_millis() as u64,
                "Rendering frame"
            );
            #[cfg(feature = "metrics")]
            crate::metrics::record_frame_staleness(queued);

            match self.render(frame).await {
                Ok(Some(jpeg)) => {
                    self.last_emit = Some(Instant::now());
                    self.emitted += 1;
                    #[cfg(feature = "metrics")]
                    crate::metrics::record_frame_emitted();
                    return Some(multipart_part(&jpeg));
                }
                Ok(None) => {
                    debug!(session_id = %session_id, seq, "Frame rejected by safety filter");
                    #[cfg(feature = "metrics")]
                    crate::metrics::record_content_rejected();
                }
                Err(e) => {
                    warn!(session_id = %session_id, seq, error = %e, "Transform failed, dropping frame");
                    #[cfg(feature = "metrics")]
                    crate::metrics::record_transform_error(self.transformer.id());
                }
            }
        }
    }

    /// Transform one frame and encode it. `Ok(None)` means rejected.
    async fn render(&self, frame: Frame) -> Result<Option<Bytes>, TransformError> {
        let mut image = frame.image;
        if let Some((width, height)) = self.settings.frame_size {
            if (image.width(), image.height()) != (width, height) {
                image = run_blocking(move || {
                    Ok(image.resize_exact(width, height, FilterType::Triangle))
                })
                .await?;
            }
        }

        let started = Instant::now();
        let outcome = self
            .transformer
            .transform(image, self.session.params())
            .await?;
        #[cfg(feature = "metrics")]
        crate::metrics::record_transform_duration(self.transformer.id(), started.elapsed());
        debug!(
            session_id = %self.session.id(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Frame transformed"
        );

        let image = match outcome {
            TransformOutcome::Image(image) => image,
            TransformOutcome::Rejected => return Ok(None),
        };

        let quality = self.settings.jpeg_quality;
        let jpeg = run_blocking(move || Ok(encode_jpeg(&image, quality)?)).await?;
        Ok(Some(jpeg))
    }

    /// Turn the loop into a body stream. Dropping the stream stops the loop.
    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
        futures::stream::unfold(self, |mut render| async move {
            let part = render.next_part().await?;
            Some((Ok(part), render))
        })
    }
}

impl Drop for RenderLoop {
    fn drop(&mut self) {
        info!(
            session_id = %self.session.id(),
            emitted = self.emitted,
            session_closed = self.session.slot().is_closed(),
            "Stream ended"
        );
    }
}

/// `GET /stream/{session_id}`
pub async fn stream_handler(
    Path(session_id): Path<String>,
    State(state): State<Arc<GatewayState>>,
) -> Response {
    let session = session_id
        .parse::<SessionId>()
        .ok()
        .and_then(|id| state.registry.lookup(&id));

    let Some(session) = session else {
        debug!(%session_id, "Stream requested for unknown session");
        return (
            StatusCode::NOT_FOUND,
            Json(StatusMessage::error(MSG_SESSION_NOT_FOUND)),
        )
            .into_response();
    };

    info!(session_id = %session.id(), pipeline = state.transformer.id(), "Stream started");
    let render = RenderLoop::new(session, state.transformer.clone(), state.render_settings());

    (
        [
            (header::CONTENT_TYPE, STREAM_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(render.into_stream()),
    )
        .into_response()
}
