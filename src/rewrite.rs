//! Tone rewriting through a hosted text-generation model.
//!
//! Rewriting is best effort. [`ToneRewriter::rewrite`] returns a `String`,
//! never an error: when the endpoint is unreachable, rejects the request or
//! answers with nothing usable, the caller gets its input back.

use std::{fmt, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::{config::RewriterConfig, error::RewriteError};

/// Marker every prompt ends with; the completion follows it.
const ANSWER_MARKER: &str = "Rewritten text:";

/// Prompts longer than this have their text cut to [`PROMPT_TEXT_CHARS`].
const MAX_PROMPT_CHARS: usize = 2000;
const PROMPT_TEXT_CHARS: usize = 1500;

/// Trailing fragments shorter than this after the last `.` are dropped.
const MIN_TAIL_CHARS: usize = 10;

/// Lead-ins models like to prepend.
const BOILERPLATE: &[&str] = &[
    "Here is the rewritten text:",
    "Rewritten version:",
    "Here's the text rewritten:",
    "The rewritten text is:",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    #[default]
    Neutral,
    Suspenseful,
    Inspiring,
}

impl Tone {
    pub const ALL: [Tone; 3] = [Tone::Neutral, Tone::Suspenseful, Tone::Inspiring];

    pub fn as_str(self) -> &'static str {
        match self {
            Tone::Neutral => "neutral",
            Tone::Suspenseful => "suspenseful",
            Tone::Inspiring => "inspiring",
        }
    }

    fn instruction(self) -> &'static str {
        match self {
            Tone::Neutral => {
                "Rewrite the following text in a clear, neutral, and professional tone \
                 while preserving the original meaning:"
            }
            Tone::Suspenseful => {
                "Rewrite the following text in a suspenseful, mysterious tone that builds \
                 tension while keeping the original meaning:"
            }
            Tone::Inspiring => {
                "Rewrite the following text in an inspiring, uplifting, and motivational tone \
                 while preserving the original meaning:"
            }
        }
    }

    /// The full prompt for `text`.
    pub fn prompt(self, text: &str) -> String {
        let prompt = format!("{}\n\n{}\n\n{}", self.instruction(), text, ANSWER_MARKER);
        if prompt.chars().count() <= MAX_PROMPT_CHARS {
            return prompt;
        }
        let cut: String = text.chars().take(PROMPT_TEXT_CHARS).collect();
        format!("{}\n\n{}...\n\n{}", self.instruction(), cut, ANSWER_MARKER)
    }
}

impl fmt::Display for Tone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tone {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "neutral" => Ok(Tone::Neutral),
            "suspenseful" => Ok(Tone::Suspenseful),
            "inspiring" => Ok(Tone::Inspiring),
            other => Err(format!("unknown tone '{}'", other)),
        }
    }
}

/// Rewrites text in a target tone.
pub trait ToneRewriter: Send + Sync {
    /// Returns `text` unchanged when rewriting is impossible.
    fn rewrite(&self, text: &str, tone: Tone, max_length: usize) -> String;
}

/// Does nothing; used when rewriting is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughRewriter;

impl ToneRewriter for PassthroughRewriter {
    fn rewrite(&self, text: &str, _tone: Tone, _max_length: usize) -> String {
        text.to_string()
    }
}

/// HuggingFace Inference API text generation.
pub struct HfInferenceRewriter {
    agent: ureq::Agent,
    url: String,
    token: Option<String>,
}

impl HfInferenceRewriter {
    pub fn new(config: &RewriterConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build();
        Self {
            agent,
            url: format!("{}/models/{}", config.endpoint.trim_end_matches('/'), config.model_id),
            token: config.token.clone(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn request(&self, prompt: &str, max_length: usize) -> Result<String, RewriteError> {
        let body = json!({
            "inputs": prompt,
            "parameters": {
                "max_new_tokens": max_length,
                "temperature": 0.7,
                "top_p": 0.9,
                "do_sample": true,
            },
        });

        let mut request = self.agent.post(&self.url).set("Content-Type", "application/json");
        if let Some(token) = &self.token {
            request = request.set("Authorization", &format!("Bearer {}", token));
        }
        let response = request.send_json(&body)?;

        let is_json = response.content_type().starts_with("application/json");
        let raw = response
            .into_string()
            .map_err(|e| RewriteError::Response(e.to_string()))?;
        if is_json {
            generated_text(&raw)
        } else {
            Ok(raw)
        }
    }

    fn try_rewrite(&self, text: &str, tone: Tone, max_length: usize) -> Result<String, RewriteError> {
        let prompt = tone.prompt(text);
        let generated = self.request(&prompt, max_length)?;
        let rewritten = clean_output(extract_answer(&generated, &prompt));
        if rewritten.is_empty() {
            return Err(RewriteError::Empty);
        }
        Ok(rewritten)
    }
}

impl ToneRewriter for HfInferenceRewriter {
    fn rewrite(&self, text: &str, tone: Tone, max_length: usize) -> String {
        match self.try_rewrite(text, tone, max_length) {
            Ok(rewritten) => {
                debug!(%tone, chars = rewritten.chars().count(), "text rewritten");
                rewritten
            }
            Err(e) => {
                warn!(error = %e, %tone, "tone rewrite failed; using original text");
                text.to_string()
            }
        }
    }
}

/// `generated_text` of the first element of a `[{"generated_text": ...}]` body.
fn generated_text(body: &str) -> Result<String, RewriteError> {
    let value: Value =
        serde_json::from_str(body).map_err(|e| RewriteError::Response(e.to_string()))?;
    Ok(value
        .get(0)
        .and_then(|first| first.get("generated_text"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string())
}

/// The part of a completion after the last answer marker, or after the
/// echoed prompt when the marker is missing.
fn extract_answer<'a>(generated: &'a str, prompt: &str) -> &'a str {
    if let Some(idx) = generated.rfind(ANSWER_MARKER) {
        return generated[idx + ANSWER_MARKER.len()..].trim();
    }
    generated
        .strip_prefix(prompt)
        .unwrap_or_else(|| generated.get(prompt.len()..).unwrap_or(""))
        .trim()
}

/// Drop a short dangling fragment after the last full stop, then strip
/// boilerplate lead-ins.
pub fn clean_output(text: &str) -> String {
    let mut out = text.trim().to_string();
    if let Some(idx) = out.rfind('.') {
        if out[idx + 1..].trim().chars().count() < MIN_TAIL_CHARS {
            out.truncate(idx + 1);
        }
    }
    for phrase in BOILERPLATE {
        out = out.replace(phrase, "").trim().to_string();
    }
    out
}

/// The rewriter a [`RewriterConfig`] asks for.
pub fn from_config(config: &RewriterConfig) -> Box<dyn ToneRewriter> {
    if config.enabled {
        Box::new(HfInferenceRewriter::new(config))
    } else {
        Box::new(PassthroughRewriter)
    }
}
