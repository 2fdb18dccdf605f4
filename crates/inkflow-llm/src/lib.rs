pub mod openai;
pub mod retry;

use inkflow_core::config::AppConfig;
use inkflow_core::traits::Generator;

pub use openai::OpenAiGenerator;
pub use retry::RetryingGenerator;

/// Build the generation capability described by the config.
///
/// Every provider is reached through the OpenAI-compatible API; fallback
/// models are only consulted once the primary exhausts its retries.
pub fn create_generator(config: &AppConfig) -> Box<dyn Generator> {
    let primary = Box::new(OpenAiGenerator::new(config.model.clone()));
    let fallbacks: Vec<Box<dyn Generator>> = config
        .fallback_models
        .iter()
        .map(|m| Box::new(OpenAiGenerator::new(m.clone())) as Box<dyn Generator>)
        .collect();

    match (&config.model.retry, fallbacks.is_empty()) {
        (None, true) => primary,
        (retry, _) => Box::new(RetryingGenerator::new(
            primary,
            fallbacks,
            retry.clone().unwrap_or_default(),
        )),
    }
}
