use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::arbiter::{ArbiterError, ArbiterRequest, ArbiterVerdict, ReasoningService};
use super::prompt::{build_arbiter_prompt, parse_verdict, ARBITER_SYSTEM_PROMPT};
use crate::config::OllamaSettings;

/// Reasoning service backed by a local Ollama instance.
///
/// Uses the blocking HTTP client, built per call: a blocking client must not
/// be dropped on an async worker, and the arbiter only calls this from the
/// blocking thread pool.
pub struct OllamaReasoner {
    base_url: String,
    model: String,
    timeout_secs: u64,
}

impl OllamaReasoner {
    pub fn new(base_url: &str, model: &str, timeout_secs: u64) -> Result<Self, ArbiterError> {
        let base_url = base_url.trim_end_matches('/');
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ArbiterError::Http(format!("Invalid Ollama URL: {base_url}")));
        }

        Ok(Self {
            base_url: base_url.to_string(),
            model: model.to_string(),
            timeout_secs: timeout_secs.max(1),
        })
    }

    fn client(&self) -> Result<reqwest::blocking::Client, ArbiterError> {
        reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()
            .map_err(|e| ArbiterError::Http(format!("Failed to create HTTP client: {e}")))
    }

    pub fn from_settings(settings: &OllamaSettings) -> Result<Self, ArbiterError> {
        Self::new(&settings.base_url, &settings.model, settings.timeout_secs)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn generate(&self, prompt: &str) -> Result<String, ArbiterError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = OllamaGenerateRequest {
            model: &self.model,
            prompt,
            system: ARBITER_SYSTEM_PROMPT,
            stream: false,
            format: "json",
            options: OllamaOptions { temperature: 0.0 },
        };

        let response = self
            .client()?
            .post(&url)
            .json(&body)
            .send()
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ArbiterError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: OllamaGenerateResponse = response
            .json()
            .map_err(|e| ArbiterError::MalformedResponse(e.to_string()))?;

        Ok(parsed.response)
    }

    fn map_send_error(&self, e: reqwest::Error) -> ArbiterError {
        if e.is_connect() {
            ArbiterError::Connection(self.base_url.clone())
        } else if e.is_timeout() {
            ArbiterError::Timeout(Duration::from_secs(self.timeout_secs))
        } else {
            ArbiterError::Http(e.to_string())
        }
    }
}

impl ReasoningService for OllamaReasoner {
    fn select(&self, request: &ArbiterRequest) -> Result<ArbiterVerdict, ArbiterError> {
        let prompt = build_arbiter_prompt(request);
        let raw = self.generate(&prompt)?;
        tracing::debug!(model = %self.model, reply = %raw, "Arbiter reply received");
        parse_verdict(&raw)
    }
}

/// Request body for Ollama /api/generate
#[derive(Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    system: &'a str,
    stream: bool,
    format: &'a str,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
}

/// Response body from Ollama /api/generate
#[derive(Deserialize)]
struct OllamaGenerateResponse {
    response: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructor_trims_trailing_slash() {
        let reasoner = OllamaReasoner::new("http://localhost:11434/", "medgemma", 30).unwrap();
        assert_eq!(reasoner.base_url, "http://localhost:11434");
        assert_eq!(reasoner.timeout_secs, 30);
        assert_eq!(reasoner.model(), "medgemma");
    }

    #[test]
    fn constructor_rejects_non_http_url() {
        assert!(OllamaReasoner::new("localhost:11434", "medgemma", 30).is_err());
    }

    #[test]
    fn from_settings_uses_configured_model() {
        let settings = OllamaSettings::default();
        let reasoner = OllamaReasoner::from_settings(&settings).unwrap();
        assert_eq!(reasoner.model(), settings.model);
        assert_eq!(reasoner.base_url, settings.base_url.trim_end_matches('/'));
    }

    #[test]
    fn generate_request_serializes_json_mode() {
        let body = OllamaGenerateRequest {
            model: "medgemma",
            prompt: "p",
            system: "s",
            stream: false,
            format: "json",
            options: OllamaOptions { temperature: 0.0 },
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["format"], "json");
        assert_eq!(value["stream"], false);
        assert_eq!(value["options"]["temperature"], 0.0);
    }

    #[test]
    fn unreachable_instance_is_a_connection_error() {
        // Port 9 (discard) is closed on test machines; connect fails fast.
        let reasoner = OllamaReasoner::new("http://127.0.0.1:9", "medgemma", 2).unwrap();
        let request = ArbiterRequest {
            fragment: "check sugar".into(),
            candidates: vec![],
        };
        let result = reasoner.select(&request);
        assert!(matches!(
            result,
            Err(ArbiterError::Connection(_)) | Err(ArbiterError::Http(_)) | Err(ArbiterError::Timeout(_))
        ));
    }
}
