use base64::Engine as _;
use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use inkflow_core::config::ModelConfig;
use inkflow_core::error::{InkflowError, Result};
use inkflow_core::traits::Generator;
use inkflow_core::types::*;

const OPENAI_API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_IMAGE_MODEL: &str = "dall-e-3";
const DEFAULT_SPEECH_MODEL: &str = "tts-1";
const DEFAULT_VOICE: &str = "alloy";

/// OpenAI-compatible generator. Works with OpenAI, Ollama, vLLM, Groq, OpenRouter, etc.
pub struct OpenAiGenerator {
    http: Client,
    config: ModelConfig,
}

impl OpenAiGenerator {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            http: Client::new(),
            config,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        let base = self
            .config
            .base_url
            .as_deref()
            .unwrap_or(OPENAI_API_BASE)
            .trim_end_matches('/');
        format!("{}/{}", base, path)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(key) => req.header("Authorization", format!("Bearer {}", key)),
            None => req,
        }
    }

    fn chat_request<'a>(&'a self, request: &'a GenerationRequest) -> ChatRequest<'a> {
        ChatRequest {
            model: request
                .model_override
                .as_deref()
                .unwrap_or(&self.config.model_id),
            messages: vec![OaiMessage {
                role: "user",
                content: &request.prompt,
            }],
            max_tokens: self.config.max_tokens,
            temperature: (self.config.temperature > 0.0).then_some(self.config.temperature),
            response_format: request.schema.as_ref().map(|s| ResponseFormat {
                r#type: "json_schema",
                json_schema: JsonSchemaFormat {
                    name: &s.name,
                    schema: &s.schema,
                    strict: false,
                },
            }),
            web_search_options: request
                .search_grounding
                .then(|| serde_json::json!({})),
        }
    }

    async fn send_json<T: Serialize>(&self, path: &str, body: &T) -> Result<reqwest::Response> {
        let response = self
            .authorize(self.http.post(self.endpoint(path)).json(body))
            .send()
            .await
            .map_err(|e| InkflowError::Generation(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            return Err(InkflowError::Generation(format!("HTTP {}: {}", status, body)));
        }
        Ok(response)
    }
}

// Request types
#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<OaiMessage<'a>>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    web_search_options: Option<serde_json::Value>,
}

#[derive(Serialize)]
struct OaiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat<'a> {
    r#type: &'a str,
    json_schema: JsonSchemaFormat<'a>,
}

#[derive(Serialize)]
struct JsonSchemaFormat<'a> {
    name: &'a str,
    schema: &'a serde_json::Value,
    strict: bool,
}

#[derive(Serialize)]
struct ImageRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    n: u8,
    response_format: &'a str,
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
}

// Response types
#[derive(Deserialize, Debug)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize, Debug)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize, Debug)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    annotations: Vec<Annotation>,
}

#[derive(Deserialize, Debug)]
struct Annotation {
    #[serde(default)]
    url_citation: Option<UrlCitation>,
}

#[derive(Deserialize, Debug)]
struct UrlCitation {
    #[serde(default)]
    title: String,
    url: String,
}

#[derive(Deserialize, Debug)]
struct ImageResponse {
    #[serde(default)]
    data: Vec<ImageDatum>,
}

#[derive(Deserialize, Debug)]
struct ImageDatum {
    #[serde(default)]
    b64_json: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

/// Turn a chat completion response into a `Generation`.
fn parse_chat_response(response: ChatResponse, structured: bool) -> Result<Generation> {
    let message = response
        .choices
        .into_iter()
        .next()
        .map(|c| c.message)
        .ok_or_else(|| InkflowError::GenerationParse("response has no choices".into()))?;

    let text = message.content.unwrap_or_default();
    if text.trim().is_empty() {
        return Err(InkflowError::Generation("provider returned empty content".into()));
    }

    let fields = if structured {
        match serde_json::from_str::<serde_json::Value>(&text) {
            Ok(value) => Some(value),
            Err(e) => {
                // Left to the caller's field compensation
                warn!(error = %e, "Structured response is not valid JSON");
                None
            }
        }
    } else {
        None
    };

    let citations = message
        .annotations
        .into_iter()
        .filter_map(|a| a.url_citation)
        .map(|c| Citation {
            title: c.title,
            url: c.url,
        })
        .collect();

    Ok(Generation {
        text,
        fields,
        citations,
    })
}

impl Generator for OpenAiGenerator {
    fn generate(&self, request: GenerationRequest) -> BoxFuture<'_, Result<Generation>> {
        Box::pin(async move {
            let body = self.chat_request(&request);

            debug!(
                model = body.model,
                structured = request.schema.is_some(),
                search_grounding = request.search_grounding,
                "Sending generation request"
            );

            let response: ChatResponse = self
                .send_json("chat/completions", &body)
                .await?
                .json()
                .await
                .map_err(|e| InkflowError::GenerationParse(e.to_string()))?;

            parse_chat_response(response, request.schema.is_some())
        })
    }

    fn generate_media(&self, kind: MediaKind, prompt: String) -> BoxFuture<'_, Result<MediaAsset>> {
        Box::pin(async move {
            match kind {
                MediaKind::Image => {
                    let body = ImageRequest {
                        model: self
                            .config
                            .image_model
                            .as_deref()
                            .unwrap_or(DEFAULT_IMAGE_MODEL),
                        prompt: &prompt,
                        n: 1,
                        response_format: "b64_json",
                    };
                    let response: ImageResponse = self
                        .send_json("images/generations", &body)
                        .await?
                        .json()
                        .await
                        .map_err(|e| InkflowError::GenerationParse(e.to_string()))?;
                    let datum = response.data.into_iter().next().ok_or_else(|| {
                        InkflowError::GenerationParse("image response has no data".into())
                    })?;
                    let data = datum.b64_json.or(datum.url).ok_or_else(|| {
                        InkflowError::GenerationParse("image response has no payload".into())
                    })?;
                    Ok(MediaAsset {
                        kind,
                        mime_type: "image/png".to_string(),
                        data,
                    })
                }
                MediaKind::Audio => {
                    let body = SpeechRequest {
                        model: self
                            .config
                            .speech_model
                            .as_deref()
                            .unwrap_or(DEFAULT_SPEECH_MODEL),
                        input: &prompt,
                        voice: self.config.voice.as_deref().unwrap_or(DEFAULT_VOICE),
                    };
                    let bytes = self
                        .send_json("audio/speech", &body)
                        .await?
                        .bytes()
                        .await
                        .map_err(|e| InkflowError::Generation(e.to_string()))?;
                    Ok(MediaAsset {
                        kind,
                        mime_type: "audio/mpeg".to_string(),
                        data: base64::engine::general_purpose::STANDARD.encode(&bytes),
                    })
                }
            }
        })
    }

    fn name(&self) -> &str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_request_forwards_request_options() {
        let generator = OpenAiGenerator::new(config(None));
        let request = GenerationRequest::new("Write chapter 1")
            .with_model(Some("gpt-4o".into()))
            .with_search_grounding(true);
        let body = serde_json::to_value(generator.chat_request(&request)).unwrap();
        assert_eq!(body["model"], "gpt-4o");
        assert!(body["web_search_options"].is_object());
        assert!(body.get("response_format").is_none());

        let plain = serde_json::to_value(generator.chat_request(&GenerationRequest::new("hi"))).unwrap();
        assert_eq!(plain["model"], "gpt-4o-mini");
        assert!(plain.get("web_search_options").is_none());
    }

    fn config(base_url: Option<&str>) -> ModelConfig {
        ModelConfig {
            provider: "openai".into(),
            model_id: "gpt-4o-mini".into(),
            api_key: None,
            base_url: base_url.map(String::from),
            max_tokens: 1024,
            temperature: 0.7,
            image_model: None,
            speech_model: None,
            voice: None,
            retry: None,
        }
    }

    #[test]
    fn test_endpoint_joins_base_url() {
        let g = OpenAiGenerator::new(config(Some("http://localhost:11434/v1/")));
        assert_eq!(
            g.endpoint("chat/completions"),
            "http://localhost:11434/v1/chat/completions"
        );
        let g = OpenAiGenerator::new(config(None));
        assert_eq!(g.endpoint("audio/speech"), "https://api.openai.com/v1/audio/speech");
    }

    #[test]
    fn test_parse_structured_response() {
        let raw = r#"{"choices":[{"message":{"content":"{\"title\":\"Dusk\"}"}}]}"#;
        let response: ChatResponse = serde_json::from_str(raw).unwrap();
        let generation = parse_chat_response(response, true).unwrap();
        assert_eq!(generation.fields.unwrap()["title"], "Dusk");
    }

    #[test]
    fn test_parse_invalid_json_leaves_fields_empty() {
        let raw = r#"{"choices":[{"message":{"content":"not json"}}]}"#;
        let response: ChatResponse = serde_json::from_str(raw).unwrap();
        let generation = parse_chat_response(response, true).unwrap();
        assert!(generation.fields.is_none());
        assert_eq!(generation.text, "not json");
    }

    #[test]
    fn test_parse_citations() {
        let raw = r#"{"choices":[{"message":{"content":"text","annotations":[
            {"type":"url_citation","url_citation":{"title":"Wiki","url":"https://example.org"}}]}}]}"#;
        let response: ChatResponse = serde_json::from_str(raw).unwrap();
        let generation = parse_chat_response(response, false).unwrap();
        assert_eq!(generation.citations.len(), 1);
        assert_eq!(generation.citations[0].url, "https://example.org");
    }

    #[test]
    fn test_empty_choices_is_error() {
        let response: ChatResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert!(matches!(
            parse_chat_response(response, false),
            Err(InkflowError::GenerationParse(_))
        ));
        let response: ChatResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"content":"  "}}]}"#).unwrap();
        assert!(matches!(
            parse_chat_response(response, false),
            Err(InkflowError::Generation(_))
        ));
    }
}
