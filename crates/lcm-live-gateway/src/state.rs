//! Gateway shared state.

use std::sync::Arc;

use lcm_live_core::config::Config;
use lcm_live_core::SessionRegistry;
use lcm_live_pipeline::FrameTransformer;

use crate::stream::RenderSettings;

/// Shared gateway state accessible from all connections and handlers.
pub struct GatewayState {
    pub config: Arc<Config>,
    pub registry: Arc<SessionRegistry>,
    pub transformer: Arc<dyn FrameTransformer>,
    #[cfg(feature = "metrics")]
    pub metrics: Option<metrics_exporter_prometheus::PrometheusHandle>,
}

impl GatewayState {
    pub fn new(config: Arc<Config>, transformer: Arc<dyn FrameTransformer>) -> Self {
        let registry = Arc::new(SessionRegistry::new(config.max_sessions()));
        Self {
            config,
            registry,
            transformer,
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    /// Build state with the transformer selected by `config.pipeline`.
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let transformer = lcm_live_pipeline::from_config(&config.pipeline())?;
        Ok(Self::new(Arc::new(config), transformer))
    }

    /// Attach a Prometheus handle so `/metrics` can render it.
    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, handle: metrics_exporter_prometheus::PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    pub fn render_settings(&self) -> RenderSettings {
        RenderSettings::from_config(&self.config)
    }
}
