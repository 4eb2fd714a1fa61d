//! Client for the text-generation API that writes stress-testing programs.

use std::time::Duration;

use anyhow::{Context, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::GeneratorConfig;

/// How much reasoning the model may spend before answering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThinkingLevel {
    #[default]
    Standard,
    Moderate,
    High,
}

impl ThinkingLevel {
    /// Unknown or missing levels fall back to `Standard`.
    pub fn parse(level: Option<&str>) -> Self {
        match level.map(|l| l.trim().to_ascii_lowercase()).as_deref() {
            Some("moderate") => Self::Moderate,
            Some("high") => Self::High,
            _ => Self::Standard,
        }
    }

    /// Token budget sent to the model: 0 disables thinking, -1 lets the model decide.
    pub fn budget(self) -> i32 {
        match self {
            Self::Standard => 0,
            Self::Moderate => -1,
            Self::High => 1024,
        }
    }
}

pub fn build_prompt(problem_statement: &str, code: &str) -> String {
    format!(
        r#"I am trying to solve this problem: {problem_statement}
My solution code is: {code}

Generate a single complete C++ program that stress-tests my code. Seed the generator with
std::mt19937_64 rng{{static_cast<unsigned long long>(std::chrono::steady_clock::now().time_since_epoch().count())}};
The stress-tester must:
- Embed my solution and a brute-force reference solution, run both on many random inputs and compare them.
- Use long long for every integer variable, loop counter, array index and return type. Never declare variables as 'int'.
- Use 'unsigned long long' wherever an unsigned type is needed.
- Use signed main() {{}} as the entry point instead of int main() {{}}.
- Keep generated values within the problem limits, reducing them modulo a large number such as 1000000000 where appropriate.
- Print nothing unless a failing test case is found. When one is found, print that test case and exit immediately.

IMPORTANT: Reply with only the raw C++ source code. No markdown fences, no comments, no explanations."#
    )
}

/// Removes a surrounding markdown code fence if the model added one anyway.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (e.g. "cpp") on the opening fence line
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => return "",
    };
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}

/// Produces program source for a prompt.
#[async_trait]
pub trait CodeGenerator: Send + Sync {
    /// Returns the generated text, possibly empty.
    async fn generate(&self, prompt: &str, level: ThinkingLevel) -> anyhow::Result<String>;
}

pub struct GeminiClient {
    http: reqwest::Client,
    api_base: String,
    model: String,
    api_key: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    thinking_config: ThinkingConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ThinkingConfig {
    thinking_budget: i32,
}

#[derive(Deserialize, Debug)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize, Debug)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize, Debug)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize, Debug)]
struct ResponsePart {
    text: Option<String>,
    #[serde(default)]
    thought: bool,
}

impl GenerateResponse {
    /// Concatenated answer text of the first candidate, without thought summaries.
    fn text(self) -> String {
        self.candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter(|p| !p.thought)
                    .filter_map(|p| p.text)
                    .collect::<String>()
            })
            .unwrap_or_default()
    }
}

impl GeminiClient {
    pub fn new(config: &GeneratorConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl CodeGenerator for GeminiClient {
    async fn generate(&self, prompt: &str, level: ThinkingLevel) -> anyhow::Result<String> {
        if self.api_key.is_empty() {
            bail!("GEMINI_API_KEY is not configured");
        }

        let request = GenerateRequest {
            contents: [Content {
                parts: [Part { text: prompt }],
            }],
            generation_config: GenerationConfig {
                thinking_config: ThinkingConfig {
                    thinking_budget: level.budget(),
                },
            },
        };

        let started = std::time::Instant::now();
        let response = self
            .http
            .post(format!(
                "{}/v1beta/models/{}:generateContent",
                self.api_base, self.model
            ))
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .context("generation API unreachable")?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            bail!("generation API responded {status}: {text}");
        }

        let body: GenerateResponse = response
            .json()
            .await
            .context("malformed generation response")?;
        log::info!(
            "Generation with {:?} thinking took {} ms",
            level,
            started.elapsed().as_millis()
        );

        Ok(body.text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_thinking_levels() {
        assert_eq!(ThinkingLevel::parse(Some("Moderate")), ThinkingLevel::Moderate);
        assert_eq!(ThinkingLevel::parse(Some("High")), ThinkingLevel::High);
        assert_eq!(ThinkingLevel::parse(Some("standard")), ThinkingLevel::Standard);
        assert_eq!(ThinkingLevel::parse(None), ThinkingLevel::Standard);
        assert_eq!(ThinkingLevel::Standard.budget(), 0);
        assert_eq!(ThinkingLevel::Moderate.budget(), -1);
        assert_eq!(ThinkingLevel::High.budget(), 1024);
    }

    #[test]
    fn test_prompt_embeds_inputs() {
        let prompt = build_prompt("sum two numbers", "int main(){}");
        assert!(prompt.contains("sum two numbers"));
        assert!(prompt.contains("int main(){}"));
        assert!(prompt.contains("std::mt19937_64 rng{static_cast"));
        assert!(prompt.contains("signed main()"));
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```cpp\nsigned main(){}\n```\n"), "signed main(){}");
        assert_eq!(strip_code_fences("```\nx\n```"), "x");
        assert_eq!(strip_code_fences("  signed main(){}  "), "signed main(){}");
        assert_eq!(strip_code_fences("```cpp\nunterminated"), "unterminated");
        assert_eq!(strip_code_fences("```"), "");
    }

    #[test]
    fn test_request_shape() {
        let request = GenerateRequest {
            contents: [Content {
                parts: [Part { text: "hi" }],
            }],
            generation_config: GenerationConfig {
                thinking_config: ThinkingConfig {
                    thinking_budget: -1,
                },
            },
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            serde_json::json!({
                "contents": [{ "parts": [{ "text": "hi" }] }],
                "generationConfig": { "thinkingConfig": { "thinkingBudget": -1 } }
            })
        );
    }

    #[test]
    fn test_response_text_skips_thoughts() {
        let response: GenerateResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[
                {"text":"planning...","thought":true},
                {"text":"signed main()"},
                {"text":"{}"}
            ]}}]}"#,
        )
        .unwrap();
        assert_eq!(response.text(), "signed main(){}");

        let empty: GenerateResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(empty.text(), "");
    }
}
