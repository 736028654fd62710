use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::PromptSession;
use crate::config::GeneratorConfig;

/// Chat session against the Generative Language `generateContent` endpoint.
///
/// The API is stateless, so the whole conversation is resent every turn.
pub struct GenAiSession {
    client: Client,
    endpoint: reqwest::Url,
    api_key: String,
    history: Vec<Content>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

impl GenAiSession {
    pub fn new(cfg: &GeneratorConfig) -> Result<Self> {
        let api_key = cfg
            .genai_api_key
            .as_deref()
            .context("GOOGLE_GENAI_API_KEY is not set")?;
        let mut endpoint = reqwest::Url::parse(&cfg.genai_base_url)
            .with_context(|| format!("parse genai base url {}", cfg.genai_base_url))?;
        endpoint
            .path_segments_mut()
            .map_err(|_| anyhow::anyhow!("genai base url cannot hold a path"))?
            .pop_if_empty()
            .push("models")
            .push(&format!("{}:generateContent", cfg.genai_model));
        let client = Client::builder()
            .user_agent("wpg")
            .timeout(Duration::from_secs(cfg.timeout_secs.max(1)))
            .build()
            .context("build reqwest client")?;
        Ok(Self {
            client,
            endpoint,
            api_key: api_key.to_string(),
            history: Vec::new(),
        })
    }

    fn request_body(&self) -> serde_json::Value {
        json!({
            "contents": self.history,
            "generationConfig": {
                "temperature": 1.2,
                "responseMimeType": "application/json",
                "responseSchema": {
                    "type": "OBJECT",
                    "properties": {
                        "items": { "type": "ARRAY", "items": { "type": "STRING" } }
                    }
                }
            }
        })
    }
}

impl PromptSession for GenAiSession {
    fn send(&mut self, message: &str) -> Result<String> {
        self.history.push(Content {
            role: "user".to_string(),
            parts: vec![Part {
                text: message.to_string(),
            }],
        });
        tracing::debug!(turns = self.history.len(), "genai generateContent");
        let resp = self
            .client
            .post(self.endpoint.clone())
            .header("x-goog-api-key", self.api_key.as_str())
            .json(&self.request_body())
            .send()
            .context("send generateContent")?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            anyhow::bail!("generateContent failed: status {} ({})", status, body.trim());
        }
        let parsed: GenerateResponse = resp.json().context("parse generateContent response")?;
        let content = parsed
            .candidates
            .into_iter()
            .find_map(|c| c.content)
            .context("generateContent returned no candidates")?;
        let text: String = content.parts.iter().map(|p| p.text.as_str()).collect();

        self.history.push(Content {
            role: "model".to_string(),
            parts: vec![Part { text: text.clone() }],
        });
        Ok(text)
    }
}
