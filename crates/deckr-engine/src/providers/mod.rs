pub mod gemini;

use deckr_contracts::models::ModelSpec;

use crate::enhance::{DryrunEnhancer, PassthroughEnhancer, PromptEnhancer};
use crate::render::{DryrunRenderer, RendererRegistry};

pub use gemini::{GeminiClient, GeminiEnhancer, GeminiRenderer, GeminiTransport};

/// Renderers keyed by provider name, as used by the model registry.
pub fn default_renderers(client: &GeminiClient) -> RendererRegistry {
    let mut registry = RendererRegistry::new();
    registry.register(DryrunRenderer::new());
    registry.register(GeminiRenderer::new(client.clone()));
    registry
}

/// Enhancer for a selected text model. Unknown providers fall back to the
/// passthrough enhancer.
pub fn enhancer_for_model(model: &ModelSpec, client: &GeminiClient) -> Box<dyn PromptEnhancer> {
    match model.provider.as_str() {
        "dryrun" => Box::new(DryrunEnhancer),
        "gemini" => Box::new(GeminiEnhancer::new(client.clone(), model.name.clone())),
        _ => Box::new(PassthroughEnhancer),
    }
}

#[cfg(test)]
mod tests {
    use deckr_contracts::models::{Capability, ModelRegistry};

    use super::*;

    #[test]
    fn every_image_provider_has_a_renderer() {
        let renderers = default_renderers(&GeminiClient::from_env());
        for model in ModelRegistry::new(None).by_capability(Capability::Image) {
            assert!(
                renderers.get(&model.provider).is_some(),
                "missing renderer for {}",
                model.provider
            );
        }
    }

    #[test]
    fn text_models_map_to_enhancers() {
        let client = GeminiClient::from_env();
        let registry = ModelRegistry::new(None);
        let name_of = |model: &ModelSpec| enhancer_for_model(model, &client).name().to_string();
        assert_eq!(
            registry.get("dryrun-text-1").map(name_of),
            Some("dryrun".to_string())
        );
        assert_eq!(
            registry.get("gemini-2.5-flash").map(name_of),
            Some("gemini".to_string())
        );
    }
}
