use super::parse::parse_response;
use super::{FixOracle, OracleRequest, OracleResponse};
use crate::config::Config;
use crate::error::OracleError;
use crate::util::truncate;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Rate limit retry configuration
const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 2000;
const BACKOFF_MULTIPLIER: u64 = 2;

const MAX_TOKENS: u32 = 8192;

const SYSTEM_PROMPT: &str = "You repair one file of a generated web project so that it passes \
validation. You receive a diagnostic, the path of the file it concerns and that file's current \
content. Reply with a single JSON object and nothing else: \
{\"target_path\": \"<relative path of the file you rewrote>\", \
\"new_content\": \"<the complete new file content>\", \
\"explanation\": \"<one sentence>\"}. \
Always return the whole file, never a diff. Keep unrelated code unchanged.";

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    max_tokens: u32,
    stream: bool,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    #[serde(default)]
    content: Option<String>,
}

/// Extract retry-after hint from an error body (if present)
fn parse_retry_after(text: &str) -> Option<u64> {
    let lower = text.to_lowercase();
    let pos = lower.find("retry")?;
    lower[pos..]
        .split_whitespace()
        .skip(1)
        .take(5)
        .filter_map(|word| {
            word.trim_matches(|c: char| !c.is_ascii_digit())
                .parse::<u64>()
                .ok()
        })
        .find(|secs| *secs > 0 && *secs < 300)
}

fn backoff_secs(retry: u32) -> u64 {
    (INITIAL_BACKOFF_MS * BACKOFF_MULTIPLIER.pow(retry.saturating_sub(1))) / 1000
}

pub fn user_prompt(request: &OracleRequest) -> String {
    format!(
        "Diagnostic:\n{}\n\nConstraint: {}\n\nFile: {}\n```\n{}\n```",
        request.diagnostic_text, request.constraint, request.file_path, request.file_content
    )
}

/// Chat-completions oracle (OpenRouter-compatible endpoint).
pub struct OpenRouterOracle {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl OpenRouterOracle {
    pub fn new(config: &Config, api_key: String) -> Result<Self, OracleError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.oracle_timeout_secs))
            .build()
            .map_err(|e| OracleError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: config.oracle_endpoint.clone(),
            model: config.oracle_model.clone(),
            api_key,
        })
    }

    /// `None` when no API key is configured.
    pub fn from_env(config: &Config) -> Option<Result<Self, OracleError>> {
        Config::oracle_api_key().map(|key| Self::new(config, key))
    }

    async fn complete(&self, user: String) -> Result<String, OracleError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                Message {
                    role: "user".to_string(),
                    content: user,
                },
            ],
            max_tokens: MAX_TOKENS,
            stream: false,
            response_format: ResponseFormat {
                format_type: "json_object",
            },
        };

        let mut retry = 0;
        loop {
            let response = self
                .client
                .post(&self.endpoint)
                .header("Content-Type", "application/json")
                .header("X-Title", "fixpoint")
                .bearer_auth(&self.api_key)
                .json(&request)
                .send()
                .await
                .map_err(|e| {
                    if e.is_timeout() {
                        OracleError::Transport(format!("request timed out: {}", e))
                    } else {
                        OracleError::Transport(e.to_string())
                    }
                })?;

            let status = response.status();
            let text = response
                .text()
                .await
                .map_err(|e| OracleError::Transport(e.to_string()))?;

            if status.is_success() {
                let parsed: ChatResponse = serde_json::from_str(&text).map_err(|e| {
                    OracleError::Malformed(format!("{}: {}", e, truncate(&text, 200)))
                })?;
                return parsed
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.message.content)
                    .filter(|c| !c.trim().is_empty())
                    .ok_or_else(|| OracleError::Malformed("empty completion".to_string()));
            }

            if status.as_u16() == 429 && retry < MAX_RETRIES {
                retry += 1;
                let wait = parse_retry_after(&text).unwrap_or_else(|| backoff_secs(retry));
                warn!(retry, max = MAX_RETRIES, wait_secs = wait, "oracle rate limited; backing off");
                tokio::time::sleep(Duration::from_secs(wait)).await;
                continue;
            }

            return Err(OracleError::Status {
                status: status.as_u16(),
                body: truncate(&text, 200),
            });
        }
    }
}

#[async_trait]
impl FixOracle for OpenRouterOracle {
    async fn propose(&self, request: OracleRequest) -> Result<OracleResponse, OracleError> {
        debug!(file = %request.file_path, model = %self.model, "asking oracle");
        let content = self.complete(user_prompt(&request)).await?;
        parse_response(&content)
    }
}

/// Oracle used when none is configured; every request yields no fix.
pub struct NoOracle;

#[async_trait]
impl FixOracle for NoOracle {
    async fn propose(&self, _request: OracleRequest) -> Result<OracleResponse, OracleError> {
        Err(OracleError::Disabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after("Rate limited, retry after 12 seconds"), Some(12));
        assert_eq!(parse_retry_after("please retry later"), None);
        assert_eq!(parse_retry_after("slow down"), None);
    }

    #[test]
    fn test_backoff_grows() {
        assert_eq!(backoff_secs(1), 2);
        assert_eq!(backoff_secs(2), 4);
        assert_eq!(backoff_secs(3), 8);
    }

    #[test]
    fn test_user_prompt_carries_constraint() {
        let prompt = user_prompt(&OracleRequest {
            diagnostic_text: "TS2339 Property 'x' does not exist".into(),
            file_path: "src/a.ts".into(),
            file_content: "const a = {};".into(),
            constraint: "do not modify test files".into(),
        });
        assert!(prompt.contains("Constraint: do not modify test files"));
        assert!(prompt.contains("File: src/a.ts"));
    }
}
