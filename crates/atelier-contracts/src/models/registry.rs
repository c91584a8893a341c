use indexmap::IndexMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Chat,
    Vision,
    Search,
    Image,
    Edit,
    Video,
    Speech,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Vision => "vision",
            Self::Search => "search",
            Self::Image => "image",
            Self::Edit => "edit",
            Self::Video => "video",
            Self::Speech => "speech",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub label: String,
    pub capabilities: Vec<Capability>,
    pub context_window: Option<u64>,
}

impl ModelSpec {
    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// Ordered catalogue of known model variants. The first model supporting a
/// capability is that capability's default.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ModelRegistry {
    pub fn new(models: Option<IndexMap<String, ModelSpec>>) -> Self {
        Self {
            models: models.unwrap_or_else(default_models),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.models.get(name)
    }

    pub fn list(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.values()
    }

    pub fn default_for(&self, capability: Capability) -> Option<&ModelSpec> {
        self.models
            .values()
            .find(|model| model.supports(capability))
    }

    pub fn ensure(&self, name: &str, capability: Capability) -> Option<ModelSpec> {
        let model = self.get(name)?;
        if model.supports(capability) {
            return Some(model.clone());
        }
        None
    }
}

fn default_models() -> IndexMap<String, ModelSpec> {
    let mut map = IndexMap::new();

    let mut insert =
        |name: &str, label: &str, capabilities: &[Capability], context_window: Option<u64>| {
            map.insert(
                name.to_string(),
                ModelSpec {
                    name: name.to_string(),
                    label: label.to_string(),
                    capabilities: capabilities.to_vec(),
                    context_window,
                },
            );
        };

    insert(
        "gemini-2.5-flash",
        "Gemini 2.5 Flash",
        &[Capability::Chat, Capability::Vision, Capability::Search],
        Some(1_048_576),
    );
    insert(
        "gemini-2.5-pro",
        "Gemini 2.5 Pro",
        &[Capability::Chat, Capability::Vision, Capability::Search],
        Some(1_048_576),
    );
    insert(
        "gemini-2.5-flash-lite",
        "Gemini 2.5 Flash-Lite",
        &[Capability::Chat],
        Some(1_048_576),
    );
    insert(
        "gemini-2.5-flash-image",
        "Gemini 2.5 Flash Image",
        &[Capability::Image, Capability::Edit],
        None,
    );
    insert(
        "veo-2.0-generate-001",
        "Veo 2",
        &[Capability::Video],
        None,
    );
    insert(
        "gemini-2.5-flash-preview-tts",
        "Gemini 2.5 Flash TTS",
        &[Capability::Speech],
        None,
    );

    map
}

#[cfg(test)]
mod tests {
    use super::{Capability, ModelRegistry};

    #[test]
    fn default_catalogue_covers_every_capability() {
        let registry = ModelRegistry::default();
        for capability in [
            Capability::Chat,
            Capability::Vision,
            Capability::Search,
            Capability::Image,
            Capability::Edit,
            Capability::Video,
            Capability::Speech,
        ] {
            assert!(
                registry.default_for(capability).is_some(),
                "missing {}",
                capability.as_str()
            );
        }
        assert_eq!(
            registry.default_for(Capability::Chat).map(|m| m.name.as_str()),
            Some("gemini-2.5-flash")
        );
    }

    #[test]
    fn ensure_rejects_wrong_capability() {
        let registry = ModelRegistry::default();
        assert!(registry.ensure("gemini-2.5-pro", Capability::Chat).is_some());
        assert!(registry.ensure("veo-2.0-generate-001", Capability::Chat).is_none());
        assert!(registry.ensure("missing", Capability::Chat).is_none());
    }
}
