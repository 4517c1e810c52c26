//! Adapter for synchronous transform functions.
//!
//! A locally embedded model usually exposes a blocking `fn(image, params)`.
//! [`BlockingTransformer`] runs it on tokio's blocking pool so a slow call in
//! one session never stalls the runtime threads serving other sessions.

use std::sync::Arc;

use async_trait::async_trait;
use image::DynamicImage;

use lcm_live_core::GenerationParams;

use crate::{FrameTransformer, TransformError, TransformOutcome, run_blocking};

type TransformFn =
    dyn Fn(DynamicImage, &GenerationParams) -> Result<TransformOutcome, TransformError> + Send + Sync;

pub struct BlockingTransformer {
    id: String,
    func: Arc<TransformFn>,
}

impl BlockingTransformer {
    pub fn new<F>(id: impl Into<String>, func: F) -> Self
    where
        F: Fn(DynamicImage, &GenerationParams) -> Result<TransformOutcome, TransformError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            id: id.into(),
            func: Arc::new(func),
        }
    }
}

#[async_trait]
impl FrameTransformer for BlockingTransformer {
    fn id(&self) -> &str {
        &self.id
    }

    async fn transform(
        &self,
        image: DynamicImage,
        params: &GenerationParams,
    ) -> Result<TransformOutcome, TransformError> {
        let func = self.func.clone();
        let params = params.clone();
        run_blocking(move || func(image, &params)).await
    }
}
