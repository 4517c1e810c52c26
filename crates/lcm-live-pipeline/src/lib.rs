//! Frame transformer abstraction.
//!
//! The image model is an external collaborator. Each backend implements the
//! [`FrameTransformer`] trait: given a decoded frame and the session's
//! generation parameters it returns a new image, or reports that the model's
//! safety filter rejected the result.

use std::sync::Arc;

use async_trait::async_trait;
use image::DynamicImage;
use thiserror::Error;
use tracing::info;

use lcm_live_core::config::{PipelineConfig, PipelineKind};
use lcm_live_core::frame::FrameError;
use lcm_live_core::GenerationParams;

pub mod blocking;
pub mod passthrough;
pub mod remote;

pub use blocking::BlockingTransformer;
pub use passthrough::PassthroughTransformer;
pub use remote::RemoteTransformer;

/// What the model produced for one frame.
#[derive(Debug, Clone)]
pub enum TransformOutcome {
    Image(DynamicImage),
    /// The safety filter flagged the output; nothing should be emitted.
    Rejected,
}

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("inference server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("transform task failed: {0}")]
    Task(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// The contract the render loop needs from an image model.
#[async_trait]
pub trait FrameTransformer: Send + Sync {
    /// Backend identifier (e.g. "passthrough", "remote").
    fn id(&self) -> &str;

    /// Transform one frame. Must be deterministic for a given seed.
    async fn transform(
        &self,
        image: DynamicImage,
        params: &GenerationParams,
    ) -> Result<TransformOutcome, TransformError>;
}

/// Run CPU-bound work on the blocking pool so other sessions keep moving.
pub async fn run_blocking<T, F>(f: F) -> Result<T, TransformError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, TransformError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| TransformError::Task(e.to_string()))?
}

/// Build the transformer selected by the pipeline config.
pub fn from_config(config: &PipelineConfig) -> anyhow::Result<Arc<dyn FrameTransformer>> {
    let transformer: Arc<dyn FrameTransformer> = match config.kind {
        PipelineKind::Passthrough => Arc::new(PassthroughTransformer),
        PipelineKind::Remote => Arc::new(RemoteTransformer::from_config(config)?),
    };
    info!(
        pipeline = transformer.id(),
        safety_checker = config.safety_checker,
        "Frame pipeline ready"
    );
    Ok(transformer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_passthrough() {
        let transformer = from_config(&PipelineConfig::default()).unwrap();
        assert_eq!(transformer.id(), "passthrough");
    }

    #[test]
    fn test_from_config_remote_requires_url() {
        let config = PipelineConfig {
            kind: PipelineKind::Remote,
            ..PipelineConfig::default()
        };
        assert!(from_config(&config).is_err());
    }

    #[test]
    fn test_from_config_remote() {
        let config = PipelineConfig {
            kind: PipelineKind::Remote,
            url: Some("http://127.0.0.1:9000/transform".into()),
            ..PipelineConfig::default()
        };
        let transformer = from_config(&config).unwrap();
        assert_eq!(transformer.id(), "remote");
    }

    #[tokio::test]
    async fn test_run_blocking_propagates_errors() {
        let ok = run_blocking(|| Ok::<_, TransformError>(5)).await.unwrap();
        assert_eq!(ok, 5);

        let err = run_blocking(|| Err::<(), _>(TransformError::Task("boom".into())))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("boom"));
    }
}
