use super::registry::{Capability, ModelRegistry, ModelSpec};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub model: ModelSpec,
    pub requested: Option<String>,
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ModelSelector {
    pub registry: ModelRegistry,
}

impl ModelSelector {
    pub fn new(registry: Option<ModelRegistry>) -> Self {
        Self {
            registry: registry.unwrap_or_default(),
        }
    }

    pub fn select(
        &self,
        requested: Option<&str>,
        capability: Capability,
    ) -> Result<ModelSelection, String> {
        let requested = requested.map(str::trim).filter(|value| !value.is_empty());
        let (fallback_reason, requested_text) = if let Some(requested_value) = requested {
            if let Some(model) = self.registry.ensure(requested_value, capability) {
                return Ok(ModelSelection {
                    model,
                    requested: Some(requested_value.to_string()),
                    fallback_reason: None,
                });
            }
            (
                Some(format!(
                    "Requested model '{requested_value}' unavailable for capability '{}'.",
                    capability.as_str()
                )),
                Some(requested_value.to_string()),
            )
        } else {
            (Some("No model specified; using default.".to_string()), None)
        };

        let Some(model) = self.registry.default_for(capability).cloned() else {
            return Err(format!(
                "No models available for capability '{}'.",
                capability.as_str()
            ));
        };
        Ok(ModelSelection {
            model,
            requested: requested_text,
            fallback_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use super::ModelSelector;
    use crate::models::{Capability, ModelRegistry, ModelSpec};

    fn chat_model(name: &str) -> ModelSpec {
        ModelSpec {
            name: name.to_string(),
            label: name.to_string(),
            capabilities: vec![Capability::Chat],
            context_window: None,
        }
    }

    #[test]
    fn falls_back_when_requested_model_unavailable() {
        let mut models = IndexMap::new();
        models.insert("chat-fallback".to_string(), chat_model("chat-fallback"));
        let selection = ModelSelector::new(Some(ModelRegistry::new(Some(models))))
            .select(Some("missing"), Capability::Chat)
            .unwrap();
        assert_eq!(selection.model.name, "chat-fallback");
        assert_eq!(selection.requested.as_deref(), Some("missing"));
        assert_eq!(
            selection.fallback_reason.as_deref(),
            Some("Requested model 'missing' unavailable for capability 'chat'.")
        );
    }

    #[test]
    fn blank_request_uses_default_with_explanation() {
        let selection = ModelSelector::default()
            .select(Some("  "), Capability::Chat)
            .unwrap();
        assert_eq!(selection.model.name, "gemini-2.5-flash");
        assert_eq!(
            selection.fallback_reason.as_deref(),
            Some("No model specified; using default.")
        );
    }

    #[test]
    fn exact_match_has_no_fallback_reason() {
        let selection = ModelSelector::default()
            .select(Some("gemini-2.5-pro"), Capability::Chat)
            .unwrap();
        assert_eq!(selection.model.name, "gemini-2.5-pro");
        assert!(selection.fallback_reason.is_none());
    }

    #[test]
    fn errors_when_no_models_for_capability() {
        let mut models = IndexMap::new();
        models.insert("chat-only".to_string(), chat_model("chat-only"));
        let err = ModelSelector::new(Some(ModelRegistry::new(Some(models))))
            .select(Some("x"), Capability::Video)
            .err()
            .unwrap_or_default();
        assert_eq!(err, "No models available for capability 'video'.");
    }
}
