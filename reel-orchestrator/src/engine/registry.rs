//! Step registry
//!
//! Maps a step kind to its implementation. Built once at startup; an
//! unregistered kind reaching the executor is a configuration error, so
//! templates are checked against the registry when loaded, not at first
//! invocation.

use std::collections::HashMap;
use std::sync::Arc;

use reel_core::domain::template::{PipelineTemplate, StepKind};

use super::EngineError;
use super::step::Step;

/// Static step-kind → implementation table
pub struct StepRegistry {
    steps: HashMap<StepKind, Arc<dyn Step>>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self {
            steps: HashMap::new(),
        }
    }

    pub fn register(&mut self, kind: StepKind, step: Arc<dyn Step>) {
        if self.steps.insert(kind, step).is_some() {
            tracing::warn!("step kind {} registered twice, replacing", kind);
        }
    }

    pub fn get(&self, kind: StepKind) -> Option<Arc<dyn Step>> {
        self.steps.get(&kind).cloned()
    }

    /// Check a template against the registry: every node's kind must be
    /// registered and every node's config must validate.
    pub fn check_template(&self, template: &PipelineTemplate) -> Result<(), EngineError> {
        for node in &template.nodes {
            let step = self
                .steps
                .get(&node.spec.kind)
                .ok_or(EngineError::UnregisteredKind(node.spec.kind))?;
            step.validate_config(&node.spec.config).map_err(|e| {
                EngineError::InvalidConfig {
                    step: node.spec.name.clone(),
                    reason: e.to_string(),
                }
            })?;
        }
        Ok(())
    }
}

impl Default for StepRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::step::{ConfigError, StepOutcome};
    use async_trait::async_trait;
    use reel_core::domain::execution::PipelineContext;
    use reel_core::domain::template::{StepSpec, StepTree, TemplateSpec};
    use serde_json::{Map, Value};

    struct NoopStep;

    #[async_trait]
    impl crate::engine::step::Step for NoopStep {
        fn validate_config(&self, config: &Map<String, Value>) -> Result<(), ConfigError> {
            if config.contains_key("forbidden") {
                return Err(ConfigError("forbidden key".to_string()));
            }
            Ok(())
        }

        async fn execute(&self, _: &PipelineContext, _: &Map<String, Value>) -> StepOutcome {
            StepOutcome::success(Map::new())
        }
    }

    fn template_with(kind: StepKind, config: Map<String, Value>) -> PipelineTemplate {
        PipelineTemplate::compile(TemplateSpec {
            name: "t".to_string(),
            steps: vec![StepTree {
                spec: StepSpec {
                    kind,
                    name: "only".to_string(),
                    config,
                    condition: None,
                    required: true,
                    retryable: true,
                    continue_on_error: false,
                    timeout_secs: None,
                },
                steps: vec![],
            }],
        })
        .unwrap()
    }

    #[test]
    fn test_unregistered_kind_rejected() {
        let registry = StepRegistry::new();
        let template = template_with(StepKind::Search, Map::new());
        assert!(matches!(
            registry.check_template(&template),
            Err(EngineError::UnregisteredKind(StepKind::Search))
        ));
    }

    #[test]
    fn test_config_validated_at_load() {
        let mut registry = StepRegistry::new();
        registry.register(StepKind::Search, Arc::new(NoopStep));

        let template = template_with(StepKind::Search, Map::new());
        assert!(registry.check_template(&template).is_ok());

        let mut bad = Map::new();
        bad.insert("forbidden".to_string(), Value::Bool(true));
        let template = template_with(StepKind::Search, bad);
        assert!(matches!(
            registry.check_template(&template),
            Err(EngineError::InvalidConfig { .. })
        ));
    }
}
