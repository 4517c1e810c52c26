//! Identity transformer: returns every frame unchanged.

use async_trait::async_trait;
use image::DynamicImage;

use lcm_live_core::GenerationParams;

use crate::{FrameTransformer, TransformError, TransformOutcome};

/// Echoes input frames. Lets the gateway run end to end without a model
/// server.
pub struct PassthroughTransformer;

#[async_trait]
impl FrameTransformer for PassthroughTransformer {
    fn id(&self) -> &str {
        "passthrough"
    }

    async fn transform(
        &self,
        image: DynamicImage,
        _params: &GenerationParams,
    ) -> Result<TransformOutcome, TransformError> {
        Ok(TransformOutcome::Image(image))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_passthrough_returns_input() {
        let params = GenerationParams {
            seed: 1,
            prompt: String::new(),
            strength: 0.5,
            guidance_scale: 8.0,
        };
        let input = DynamicImage::new_rgb8(3, 5);
        match PassthroughTransformer.transform(input, &params).await.unwrap() {
            TransformOutcome::Image(out) => assert_eq!((out.width(), out.height()), (3, 5)),
            TransformOutcome::Rejected => panic!("passthrough never rejects"),
        }
    }
}
