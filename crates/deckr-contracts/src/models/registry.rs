use indexmap::IndexMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Prompt enhancement and planning.
    Text,
    /// Slide rendering.
    Image,
}

impl Capability {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub provider: String,
    pub capabilities: Vec<Capability>,
    pub accepts_reference_image: bool,
}

impl ModelSpec {
    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
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

    pub fn by_capability(&self, capability: Capability) -> Vec<ModelSpec> {
        self.models
            .values()
            .filter(|model| model.supports(capability))
            .cloned()
            .collect()
    }

    pub fn ensure(&self, name: &str, capability: Capability) -> Option<ModelSpec> {
        self.get(name)
            .filter(|model| model.supports(capability))
            .cloned()
    }
}

fn default_models() -> IndexMap<String, ModelSpec> {
    let mut map = IndexMap::new();

    let mut insert = |name: &str, provider: &str, capabilities: &[Capability], references: bool| {
        map.insert(
            name.to_string(),
            ModelSpec {
                name: name.to_string(),
                provider: provider.to_string(),
                capabilities: capabilities.to_vec(),
                accepts_reference_image: references,
            },
        );
    };

    insert("dryrun-image-1", "dryrun", &[Capability::Image], true);
    insert("dryrun-text-1", "dryrun", &[Capability::Text], false);
    insert("gemini-2.5-flash-image", "gemini", &[Capability::Image], true);
    insert("gemini-3-pro-image-preview", "gemini", &[Capability::Image], true);
    insert("gemini-2.5-pro", "gemini", &[Capability::Text], false);
    insert("gemini-2.5-flash", "gemini", &[Capability::Text], false);

    map
}

#[cfg(test)]
mod tests {
    use super::{Capability, ModelRegistry};

    #[test]
    fn default_registry_covers_both_capabilities() {
        let registry = ModelRegistry::new(None);
        let image = registry.by_capability(Capability::Image);
        let text = registry.by_capability(Capability::Text);
        assert_eq!(image[0].name, "dryrun-image-1");
        assert_eq!(text[0].name, "dryrun-text-1");
        assert!(image.iter().any(|model| model.provider == "gemini"));
    }

    #[test]
    fn ensure_rejects_wrong_capability() {
        let registry = ModelRegistry::new(None);
        assert!(registry.ensure("gemini-2.5-pro", Capability::Image).is_none());
        assert!(registry.ensure("gemini-2.5-pro", Capability::Text).is_some());
    }
}
