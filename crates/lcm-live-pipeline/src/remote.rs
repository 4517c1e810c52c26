//! HTTP inference client.
//!
//! Each frame is POSTed as `multipart/form-data` to the configured endpoint:
//!
//! | field                 | value                                  |
//! |-----------------------|----------------------------------------|
//! | `image`               | PNG-encoded input frame                |
//! | `prompt`              | session prompt                         |
//! | `seed`                | integer seed                           |
//! | `strength`            | img2img strength in `[0, 1]`           |
//! | `guidance_scale`      | classifier-free guidance scale         |
//! | `num_inference_steps` | denoising steps                        |
//! | `safety_checker`      | `true` / `false`                       |
//!
//! The server answers `200` with an encoded image body, or `204 No Content`
//! (alternatively `200` with `X-Nsfw-Content-Detected: true`) when the safety
//! filter flagged the output.

use std::time::Duration;

use async_trait::async_trait;
use image::DynamicImage;
use reqwest::StatusCode;
use tracing::{debug, trace};

use lcm_live_core::config::PipelineConfig;
use lcm_live_core::frame::{decode_image, encode_png};
use lcm_live_core::GenerationParams;

use crate::{FrameTransformer, TransformError, TransformOutcome, run_blocking};

/// Response header an inference server may set when the safety filter fired.
pub const NSFW_HEADER: &str = "x-nsfw-content-detected";

/// Characters of an error response body kept in [`TransformError::Status`].
const ERROR_BODY_CHARS: usize = 200;

pub struct RemoteTransformer {
    url: String,
    api_key: Option<String>,
    num_inference_steps: u32,
    safety_checker: bool,
    client: reqwest::Client,
}

impl RemoteTransformer {
    pub fn new(url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: url.into(),
            api_key: None,
            num_inference_steps: 4,
            safety_checker: false,
            client,
        })
    }

    pub fn from_config(config: &PipelineConfig) -> anyhow::Result<Self> {
        let url = config
            .url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("Remote pipeline requires pipeline.url"))?;
        let mut transformer = Self::new(url, Duration::from_millis(config.request_timeout_ms))?;
        transformer.api_key = config.resolve_api_key();
        transformer.num_inference_steps = config.num_inference_steps;
        transformer.safety_checker = config.safety_checker;
        Ok(transformer)
    }
}

/// Cut `body` to at most `max_chars` characters.
fn truncate_chars(mut body: String, max_chars: usize) -> String {
    if let Some((end, _)) = body.char_indices().nth(max_chars) {
        body.truncate(end);
    }
    body
}

fn is_rejection(status: StatusCode, headers: &reqwest::header::HeaderMap) -> bool {
    status == StatusCode::NO_CONTENT
        || headers
            .get(NSFW_HEADER)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

#[async_trait]
impl FrameTransformer for RemoteTransformer {
    fn id(&self) -> &str {
        "remote"
    }

    async fn transform(
        &self,
        image: DynamicImage,
        params: &GenerationParams,
    ) -> Result<TransformOutcome, TransformError> {
        let png = run_blocking(move || Ok(encode_png(&image)?)).await?;
        trace!(bytes = png.len(), url = %self.url, "Sending frame for inference");

        let part = reqwest::multipart::Part::bytes(png.to_vec())
            .file_name("frame.png")
            .mime_str("image/png")?;

        let form = reqwest::multipart::Form::new()
            .part("image", part)
            .text("prompt", params.prompt.clone())
            .text("seed", params.seed.to_string())
            .text("strength", params.strength.to_string())
            .text("guidance_scale", params.guidance_scale.to_string())
            .text("num_inference_steps", self.num_inference_steps.to_string())
            .text("safety_checker", self.safety_checker.to_string());

        let mut request = self.client.post(&self.url).multipart(form);
        if let Some(key) = &self.api_key {
            request = request.header("authorization", format!("Bearer {key}"));
        }

        let response = request.send().await?;
        let status = response.status();

        if is_rejection(status, response.headers()) {
            debug!(url = %self.url, "Inference server flagged frame");
            return Ok(TransformOutcome::Rejected);
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransformError::Status {
                status: status.as_u16(),
                body: truncate_chars(body, ERROR_BODY_CHARS),
            });
        }

        let bytes = response.bytes().await?;
        let output = run_blocking(move || Ok(decode_image(&bytes)?)).await?;
        Ok(TransformOutcome::Image(output))
    }
}

#[cfg(test)]
mod tests {
    use reqwest::header::{HeaderMap, HeaderValue};

    use super::*;

    #[test]
    fn test_rejection_detection() {
        let empty = HeaderMap::new();
        assert!(is_rejection(StatusCode::NO_CONTENT, &empty));
        assert!(!is_rejection(StatusCode::OK, &empty));

        let mut flagged = HeaderMap::new();
        flagged.insert(NSFW_HEADER, HeaderValue::from_static("True"));
        assert!(is_rejection(StatusCode::OK, &flagged));

        let mut clean = HeaderMap::new();
        clean.insert(NSFW_HEADER, HeaderValue::from_static("false"));
        assert!(!is_rejection(StatusCode::OK, &clean));
    }

    #[test]
    fn test_truncate_chars_respects_char_boundaries() {
        let body = format!("{}é…tail", "x".repeat(199));
        let cut = truncate_chars(body, 200);
        assert_eq!(cut.chars().count(), 200);
        assert!(cut.ends_with('é'));

        assert_eq!(truncate_chars("short".into(), 200), "short");
        assert_eq!(truncate_chars("ééé".into(), 2), "éé");
    }

    #[test]
    fn test_from_config_reads_fields() {
        let config = PipelineConfig {
            kind: lcm_live_core::config::PipelineKind::Remote,
            url: Some("http://localhost:9000/img2img".into()),
            api_key: Some("secret".into()),
            safety_checker: true,
            num_inference_steps: 8,
            ..PipelineConfig::default()
        };
        let transformer = RemoteTransformer::from_config(&config).unwrap();
        assert_eq!(transformer.url, "http://localhost:9000/img2img");
        assert_eq!(transformer.api_key.as_deref(), Some("secret"));
        assert!(transformer.safety_checker);
        assert_eq!(transformer.num_inference_steps, 8);
    }
}
