//! One-call wiring of the whole pipeline for a test framework
//!
//! ```text
//! Config ──► Writer (HttpTransport) ──► Correlator::from_env ──► TestPlugin
//!                                                                  │
//!                                   subscribed to ci:<framework>:* ┘
//! ```

use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::correlator::{Correlator, TestPlugin};
use crate::error::ExportError;
use crate::exporter::{Transport, Writer, WriterOptions};
use crate::exporter::encoder::Metadata;
use crate::hooks::HookRegistry;
use crate::metrics;

/// A running instrumentation pipeline
pub struct Instrumentation {
    writer: Arc<Writer>,
    plugin: TestPlugin,
    registry: Option<Arc<HookRegistry>>,
}

impl Instrumentation {
    /// Start the pipeline for `framework`, posting to the configured intake.
    ///
    /// Returns `Ok(None)` when instrumentation is disabled; nothing is
    /// subscribed then, so instrumented runners only forward events.
    pub fn start(framework: &str, config: &Config) -> Result<Option<Self>, ExportError> {
        if !config.enabled {
            info!(framework, "Test instrumentation disabled");
            return Ok(None);
        }
        let writer = Writer::from_config(config)?;
        Ok(Some(Self::with_writer(framework, config, writer)))
    }

    /// Start the pipeline with a custom transport
    pub fn with_transport(
        framework: &str,
        config: &Config,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ExportError> {
        let writer = Writer::spawn(
            transport,
            Metadata::new(config.service.clone(), config.env.clone()),
            WriterOptions::from_config(config),
        )?;
        Ok(Self::with_writer(framework, config, writer))
    }

    fn with_writer(framework: &str, config: &Config, writer: Writer) -> Self {
        metrics::init();
        let writer = Arc::new(writer);
        let correlator = Correlator::from_env(framework, config.service.clone(), writer.clone());
        let plugin = TestPlugin::configure(correlator);
        info!(framework, service = %config.service, "Test instrumentation started");
        Self {
            writer,
            plugin,
            registry: None,
        }
    }

    /// Tear `registry` down together with the pipeline at run end
    pub fn with_registry(mut self, registry: Arc<HookRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn registry(&self) -> Option<&Arc<HookRegistry>> {
        self.registry.as_ref()
    }

    pub fn plugin(&self) -> &TestPlugin {
        &self.plugin
    }

    pub fn writer(&self) -> &Arc<Writer> {
        &self.writer
    }

    /// Unsubscribe, deliver everything still buffered, stop the writer and
    /// drop the hook ownership table
    pub async fn shutdown(mut self) {
        self.plugin.disable();
        self.writer.shutdown().await;
        if let Some(registry) = self.registry.take() {
            registry.teardown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exporter::RecordingTransport;
    use crate::hooks::{HandleId, LoadedModule, Matcher};

    #[tokio::test]
    async fn test_shutdown_tears_down_registry() {
        let registry = Arc::new(HookRegistry::new());
        let hook = registry.add_hook(Matcher::new("mocha"), |exports| Ok(exports));
        registry.on_load(&LoadedModule::new("mocha", HandleId(1), Arc::new(())));
        assert!(registry.is_patched(hook, HandleId(1)));

        let instrumentation = Instrumentation::with_transport("setup-teardown", &Config::default(), RecordingTransport::new())
            .unwrap()
            .with_registry(Arc::clone(&registry));
        assert!(instrumentation.registry().is_some());
        instrumentation.shutdown().await;

        assert!(!registry.is_patched(hook, HandleId(1)));
        assert_eq!(registry.len(), 1);
    }
}
