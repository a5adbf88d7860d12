//! Commit messages for autosave commits.

use chrono::{DateTime, Local};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::retry::RetryPolicy;

const SYSTEM_PROMPT: &str = "You are one of the best coding mentors in the world.";
const MAX_DIFF_CHARS: usize = 16_000;

pub trait MessageGenerator {
    fn generate(&self, diff: &str) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// OpenAI-compatible chat completions endpoint.
#[derive(Debug)]
pub struct OpenAiGenerator {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    retry: RetryPolicy,
}

impl OpenAiGenerator {
    /// `None` when no AI key is configured.
    pub fn from_config(config: &Config) -> Result<Option<Self>> {
        let Some(api_key) = config.ai_key.clone() else {
            return Ok(None);
        };
        let client = Client::builder().timeout(config.http_timeout()).build()?;
        Ok(Some(Self {
            client,
            base_url: config.ai_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.ai_model.clone(),
            retry: config.retry_policy(),
        }))
    }
}

impl MessageGenerator for OpenAiGenerator {
    fn generate(&self, diff: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: format!(
                        "Generate a concise commit message for the following changes:\n{}",
                        truncate_diff(diff)
                    ),
                },
            ],
        };

        let response = self.retry.run("ai message", || {
            let response = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&request)
                .send()?;
            let status = response.status();
            if !status.is_success() {
                return Err(Error::RemoteApi {
                    status: status.as_u16(),
                    body: response.text().unwrap_or_default(),
                });
            }
            Ok(response.json::<ChatResponse>()?)
        })?;

        response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .filter(|m| !m.is_empty())
            .ok_or_else(|| Error::MessageGeneration("empty completion".to_string()))
    }
}

pub fn fallback_message(now: DateTime<Local>) -> String {
    format!("Autosave commit at {}", now.format("%Y-%m-%d %H:%M:%S"))
}

/// Asks the generator for a message; any failure falls back to a timestamped one.
pub fn commit_message(
    generator: Option<&dyn MessageGenerator>,
    diff: &str,
    now: DateTime<Local>,
) -> String {
    let Some(generator) = generator else {
        debug!("no message generator configured, using fallback message");
        return fallback_message(now);
    };
    match generator.generate(diff) {
        Ok(message) => message,
        Err(e) => {
            warn!("failed to generate commit message: {e}");
            fallback_message(now)
        }
    }
}

fn truncate_diff(diff: &str) -> &str {
    match diff.char_indices().nth(MAX_DIFF_CHARS) {
        Some((idx, _)) => &diff[..idx],
        None => diff,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    struct Fixed(Result<String>);

    impl MessageGenerator for Fixed {
        fn generate(&self, _diff: &str) -> Result<String> {
            match &self.0 {
                Ok(m) => Ok(m.clone()),
                Err(_) => Err(Error::MessageGeneration("offline".to_string())),
            }
        }
    }

    fn noon() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn uses_generated_message() {
        let gen = Fixed(Ok("Add parser".to_string()));
        assert_eq!(commit_message(Some(&gen), "diff", noon()), "Add parser");
    }

    #[test]
    fn falls_back_on_failure() {
        let gen = Fixed(Err(Error::MessageGeneration(String::new())));
        assert_eq!(
            commit_message(Some(&gen), "diff", noon()),
            "Autosave commit at 2024-01-01 12:00:00"
        );
    }

    #[test]
    fn falls_back_without_generator() {
        assert_eq!(
            commit_message(None, "diff", noon()),
            "Autosave commit at 2024-01-01 12:00:00"
        );
    }

    #[test]
    fn truncates_on_char_boundary() {
        let diff = "é".repeat(MAX_DIFF_CHARS + 10);
        assert_eq!(truncate_diff(&diff).chars().count(), MAX_DIFF_CHARS);
        assert_eq!(truncate_diff("short"), "short");
    }

    #[test]
    fn no_key_means_no_generator() {
        let config = Config::new("/tmp", "octo", "t");
        assert!(OpenAiGenerator::from_config(&config).unwrap().is_none());
    }
}
