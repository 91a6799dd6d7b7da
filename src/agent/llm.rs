use crate::agent::types::{LLMMessage, LLMResponse, TokenUsage};
use crate::config::schema::{AIConfig, ApiType};
use crate::error::{ChatpilotError, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// LLM Provider trait
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Send a chat completion request. Images ride on their messages.
    async fn complete(&self, messages: &[LLMMessage]) -> Result<LLMResponse>;

    /// Get provider name
    fn name(&self) -> &str;

    /// Get model name
    fn model(&self) -> &str;
}

/// Guess the MIME type of a base64 screenshot from its magic bytes
fn image_mime(data: &str) -> &'static str {
    if data.starts_with("/9j/") {
        "image/jpeg"
    } else {
        "image/png"
    }
}

fn message_images(msg: &LLMMessage) -> &[String] {
    msg.images.as_deref().unwrap_or(&[])
}

/// Send a request and return the JSON body, mapping every failure to `Reasoning`
async fn send_json(request: RequestBuilder, provider: &str) -> Result<Value> {
    let response = request
        .send()
        .await
        .map_err(|e| ChatpilotError::Reasoning(format!("Request failed: {}", e)))?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(ChatpilotError::Reasoning(format!(
            "{} API error ({}): {}",
            provider, status, error_text
        )));
    }

    response
        .json()
        .await
        .map_err(|e| ChatpilotError::Reasoning(format!("Failed to parse response: {}", e)))
}

fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ChatpilotError::Reasoning(format!("Failed to build HTTP client: {}", e)))
}

/// Google Gemini `generateContent` provider
pub struct GeminiProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl GeminiProvider {
    pub fn new(client: Client, base_url: String, api_key: String, model: String) -> Self {
        Self {
            client,
            base_url,
            api_key,
            model,
        }
    }

    fn build_body(&self, messages: &[LLMMessage]) -> Value {
        let mut system_parts = Vec::new();
        let mut contents = Vec::new();

        for msg in messages {
            if msg.role == "system" {
                system_parts.push(json!({ "text": msg.content }));
                continue;
            }
            let role = if msg.role == "assistant" { "model" } else { "user" };
            let mut parts = vec![json!({ "text": msg.content })];
            for img in message_images(msg) {
                parts.push(json!({
                    "inlineData": {
                        "mimeType": image_mime(img),
                        "data": img
                    }
                }));
            }
            contents.push(json!({ "role": role, "parts": parts }));
        }

        let mut body = json!({
            "contents": contents,
            "generationConfig": {
                "temperature": 0.1,
                "responseMimeType": "application/json"
            }
        });
        if !system_parts.is_empty() {
            body["systemInstruction"] = json!({ "parts": system_parts });
        }
        body
    }
}

#[async_trait]
impl LLMProvider for GeminiProvider {
    async fn complete(&self, messages: &[LLMMessage]) -> Result<LLMResponse> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let request = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&self.build_body(messages));

        let json = send_json(request, "Gemini").await?;

        let content = json["candidates"][0]["content"]["parts"]
            .as_array()
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|p| p["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();
        if content.is_empty() {
            return Err(ChatpilotError::Reasoning(
                "Gemini returned no candidates".to_string(),
            ));
        }

        let usage = TokenUsage {
            prompt_tokens: json["usageMetadata"]["promptTokenCount"].as_u64().unwrap_or(0) as u32,
            completion_tokens: json["usageMetadata"]["candidatesTokenCount"]
                .as_u64()
                .unwrap_or(0) as u32,
            total_tokens: json["usageMetadata"]["totalTokenCount"].as_u64().unwrap_or(0) as u32,
        };

        Ok(LLMResponse {
            content,
            model: self.model.clone(),
            usage,
        })
    }

    fn name(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// OpenAI-compatible provider (OpenAI, Azure, custom endpoints, etc.)
pub struct OpenAIProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAIProvider {
    pub fn new(client: Client, base_url: String, api_key: Option<String>, model: String) -> Self {
        Self {
            client,
            base_url,
            api_key,
            model,
        }
    }

    fn build_messages(&self, messages: &[LLMMessage]) -> Vec<Value> {
        messages
            .iter()
            .map(|msg| {
                let images = message_images(msg);
                if images.is_empty() {
                    return json!({
                        "role": msg.role,
                        "content": msg.content
                    });
                }

                let mut content_parts = vec![json!({
                    "type": "text",
                    "text": msg.content
                })];
                for img in images {
                    content_parts.push(json!({
                        "type": "image_url",
                        "image_url": {
                            "url": format!("data:{};base64,{}", image_mime(img), img)
                        }
                    }));
                }
                json!({
                    "role": msg.role,
                    "content": content_parts
                })
            })
            .collect()
    }
}

#[async_trait]
impl LLMProvider for OpenAIProvider {
    async fn complete(&self, messages: &[LLMMessage]) -> Result<LLMResponse> {
        let url = format!("{}/chat/completions", self.base_url);

        let body = json!({
            "model": self.model,
            "messages": self.build_messages(messages),
            "max_tokens": 4096,
            "temperature": 0.1,
            "response_format": { "type": "json_object" }
        });

        let mut request = self.client.post(&url).json(&body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let json = send_json(request, "OpenAI").await?;

        let content = json["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string();

        let usage = TokenUsage {
            prompt_tokens: json["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            completion_tokens: json["usage"]["completion_tokens"].as_u64().unwrap_or(0) as u32,
            total_tokens: json["usage"]["total_tokens"].as_u64().unwrap_or(0) as u32,
        };

        Ok(LLMResponse {
            content,
            model: self.model.clone(),
            usage,
        })
    }

    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Anthropic provider
pub struct AnthropicProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl AnthropicProvider {
    pub fn new(client: Client, base_url: String, api_key: String, model: String) -> Self {
        Self {
            client,
            base_url,
            api_key,
            model,
        }
    }
}

#[async_trait]
impl LLMProvider for AnthropicProvider {
    async fn complete(&self, messages: &[LLMMessage]) -> Result<LLMResponse> {
        let url = format!("{}/v1/messages", self.base_url);

        let mut anthropic_messages = Vec::new();
        let mut system_prompt = String::new();

        for msg in messages {
            if msg.role == "system" {
                system_prompt = msg.content.clone();
                continue;
            }
            let mut content_parts = vec![json!({
                "type": "text",
                "text": msg.content
            })];
            for img in message_images(msg) {
                content_parts.push(json!({
                    "type": "image",
                    "source": {
                        "type": "base64",
                        "media_type": image_mime(img),
                        "data": img
                    }
                }));
            }
            anthropic_messages.push(json!({
                "role": msg.role,
                "content": content_parts
            }));
        }

        let mut body = json!({
            "model": self.model,
            "messages": anthropic_messages,
            "max_tokens": 4096,
        });
        if !system_prompt.is_empty() {
            body["system"] = Value::String(system_prompt);
        }

        let request = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body);

        let json = send_json(request, "Anthropic").await?;

        let content = json["content"][0]["text"]
            .as_str()
            .unwrap_or("")
            .to_string();

        let input = json["usage"]["input_tokens"].as_u64().unwrap_or(0) as u32;
        let output = json["usage"]["output_tokens"].as_u64().unwrap_or(0) as u32;

        Ok(LLMResponse {
            content,
            model: self.model.clone(),
            usage: TokenUsage {
                prompt_tokens: input,
                completion_tokens: output,
                total_tokens: input + output,
            },
        })
    }

    fn name(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Ollama provider (local)
pub struct OllamaProvider {
    client: Client,
    base_url: String,
    model: String,
}

impl OllamaProvider {
    pub fn new(client: Client, base_url: String, model: String) -> Self {
        Self {
            client,
            base_url,
            model,
        }
    }
}

#[async_trait]
impl LLMProvider for OllamaProvider {
    async fn complete(&self, messages: &[LLMMessage]) -> Result<LLMResponse> {
        let url = format!("{}/api/chat", self.base_url);

        let ollama_messages: Vec<Value> = messages
            .iter()
            .map(|msg| {
                let mut msg_json = json!({
                    "role": msg.role,
                    "content": msg.content
                });
                if let Some(images) = msg.images.as_ref().filter(|i| !i.is_empty()) {
                    msg_json["images"] = json!(images);
                }
                msg_json
            })
            .collect();

        let body = json!({
            "model": self.model,
            "messages": ollama_messages,
            "format": "json",
            "stream": false
        });

        let json = send_json(self.client.post(&url).json(&body), "Ollama").await?;

        let content = json["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string();

        let prompt = json["prompt_eval_count"].as_u64().unwrap_or(0) as u32;
        let completion = json["eval_count"].as_u64().unwrap_or(0) as u32;

        Ok(LLMResponse {
            content,
            model: self.model.clone(),
            usage: TokenUsage {
                prompt_tokens: prompt,
                completion_tokens: completion,
                total_tokens: prompt + completion,
            },
        })
    }

    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Build the configured provider
pub fn create_provider(config: &AIConfig) -> Result<Arc<dyn LLMProvider>> {
    let client = build_client(Duration::from_secs(config.request_timeout_secs))?;
    let base_url = config.effective_base_url();
    let model = config.model.clone();

    let require_key = || {
        config.api_key.clone().ok_or_else(|| {
            ChatpilotError::Config(format!(
                "{} provider requires an API key",
                config.provider.as_str()
            ))
        })
    };

    let provider: Arc<dyn LLMProvider> = match config.provider {
        ApiType::Gemini => Arc::new(GeminiProvider::new(client, base_url, require_key()?, model)),
        ApiType::Openai => Arc::new(OpenAIProvider::new(
            client,
            base_url,
            config.api_key.clone(),
            model,
        )),
        ApiType::Anthropic => Arc::new(AnthropicProvider::new(
            client,
            base_url,
            require_key()?,
            model,
        )),
        ApiType::Ollama => Arc::new(OllamaProvider::new(client, base_url, model)),
    };

    tracing::info!(
        "Reasoning provider: {} ({})",
        provider.name(),
        provider.model()
    );
    Ok(provider)
}
