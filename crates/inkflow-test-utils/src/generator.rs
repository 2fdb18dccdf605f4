use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use serde_json::Value;

use inkflow_core::error::{InkflowError, Result};
use inkflow_core::traits::Generator;
use inkflow_core::types::{Generation, GenerationRequest, MediaAsset, MediaKind};

/// Scripted reply for prompts matching a rule.
#[derive(Debug, Clone)]
pub enum MockReply {
    Text(String),
    Structured(Value),
    /// Fail with a generation error carrying this message.
    Fail(String),
    /// Reply with the prompt itself.
    Echo,
}

#[derive(Default)]
struct MockState {
    rules: Vec<(String, MockReply)>,
    requests: Vec<GenerationRequest>,
    media: Vec<(MediaKind, String)>,
}

/// Generator that answers from substring rules and records every call.
///
/// The first rule whose pattern occurs in the prompt wins. Unmatched prompts
/// get `{}` when a schema was requested and `"generated text"` otherwise.
#[derive(Clone, Default)]
pub struct MockGenerator {
    state: Arc<Mutex<MockState>>,
}

impl MockGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rule(self, pattern: impl Into<String>, reply: MockReply) -> Self {
        self.state
            .lock()
            .unwrap()
            .rules
            .push((pattern.into(), reply));
        self
    }

    /// Every text request received, in order.
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    /// Number of text requests whose prompt contains `pattern`.
    pub fn calls_matching(&self, pattern: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .requests
            .iter()
            .filter(|r| r.prompt.contains(pattern))
            .count()
    }

    /// Prompts of every media request, in order.
    pub fn media_prompts(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .media
            .iter()
            .map(|(_, prompt)| prompt.clone())
            .collect()
    }

    fn reply_for(&self, prompt: &str) -> Option<MockReply> {
        self.state
            .lock()
            .unwrap()
            .rules
            .iter()
            .find(|(pattern, _)| prompt.contains(pattern.as_str()))
            .map(|(_, reply)| reply.clone())
    }
}

impl Generator for MockGenerator {
    fn generate(&self, request: GenerationRequest) -> BoxFuture<'_, Result<Generation>> {
        let reply = self.reply_for(&request.prompt);
        let structured = request.schema.is_some();
        let prompt = request.prompt.clone();
        self.state.lock().unwrap().requests.push(request);

        Box::pin(async move {
            match reply {
                Some(MockReply::Text(text)) => Ok(Generation::text(text)),
                Some(MockReply::Structured(value)) => {
                    Ok(Generation::structured(value.to_string(), value))
                }
                Some(MockReply::Fail(message)) => Err(InkflowError::Generation(message)),
                Some(MockReply::Echo) => Ok(Generation::text(prompt)),
                None if structured => Ok(Generation::structured("{}", Value::Object(Default::default()))),
                None => Ok(Generation::text("generated text")),
            }
        })
    }

    fn generate_media(&self, kind: MediaKind, prompt: String) -> BoxFuture<'_, Result<MediaAsset>> {
        let reply = self.reply_for(&prompt);
        self.state.lock().unwrap().media.push((kind, prompt));

        Box::pin(async move {
            if let Some(MockReply::Fail(message)) = reply {
                return Err(InkflowError::Generation(message));
            }
            let mime_type = match kind {
                MediaKind::Image => "image/png",
                MediaKind::Audio => "audio/mpeg",
            };
            Ok(MediaAsset {
                kind,
                mime_type: mime_type.to_string(),
                data: "bW9jaw==".to_string(),
            })
        })
    }

    fn name(&self) -> &str {
        "mock"
    }
}
