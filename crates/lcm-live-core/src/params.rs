//! Generation parameters bound to a session during the handshake.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParamsError {
    #[error("malformed parameter message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("strength must be within [0, 1], got {0}")]
    StrengthOutOfRange(f32),

    #[error("guidance_scale must be a non-negative number, got {0}")]
    InvalidGuidanceScale(f32),
}

/// Parameters the client sends once, right after the session is admitted.
///
/// Immutable for the lifetime of the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub seed: i64,
    pub prompt: String,
    pub strength: f32,
    pub guidance_scale: f32,
}

impl GenerationParams {
    /// Parse and validate the client's parameter message.
    pub fn from_json(text: &str) -> Result<Self, ParamsError> {
        let params: GenerationParams = serde_json::from_str(text)?;
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<(), ParamsError> {
        if !(0.0..=1.0).contains(&self.strength) {
            return Err(ParamsError::StrengthOutOfRange(self.strength));
        }
        if !self.guidance_scale.is_finite() || self.guidance_scale < 0.0 {
            return Err(ParamsError::InvalidGuidanceScale(self.guidance_scale));
        }
        Ok(())
    }
}
