//! Question generation backed by an OpenAI-compatible chat endpoint.
//!
//! Model output is treated as hostile input: the reply is fence-stripped,
//! bracket-sliced down to the outermost JSON array, and every entry is
//! normalized (option count, answer index, defaults) before anything reaches
//! a caller.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::GenerationError;

const OPTIONS_PER_QUESTION: usize = 4;

/// A normalized multiple-choice question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: u32,
    pub topic: String,
    pub question: String,
    pub options: Vec<String>,
    pub correct_index: usize,
    pub explanation: String,
}

/// Endpoint configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct QuestionConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

impl QuestionConfig {
    pub const API_KEY_ENV: &'static str = "PROGRESS_AI_API_KEY";
    pub const BASE_URL_ENV: &'static str = "PROGRESS_AI_URL";
    pub const MODEL_ENV: &'static str = "PROGRESS_AI_MODEL";

    const DEFAULT_BASE_URL: &'static str = "https://api.openai.com/v1";
    const DEFAULT_MODEL: &'static str = "gpt-4o-mini";

    /// Reads the configuration from the environment; `None` when no API key
    /// is set, in which case generation is disabled.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var(Self::API_KEY_ENV).ok()?;
        if api_key.trim().is_empty() {
            return None;
        }
        let base_url = std::env::var(Self::BASE_URL_ENV)
            .unwrap_or_else(|_| Self::DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        let model =
            std::env::var(Self::MODEL_ENV).unwrap_or_else(|_| Self::DEFAULT_MODEL.to_string());
        Some(Self {
            api_key,
            base_url,
            model,
        })
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

/// One question as the model wrote it, before normalization.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawQuestion {
    #[serde(default)]
    question: Option<String>,
    #[serde(default)]
    options: Vec<String>,
    #[serde(default, alias = "correct")]
    correct_index: Option<usize>,
    #[serde(default)]
    explanation: Option<String>,
}

/// Generates practice questions for a topic.
pub struct QuestionService {
    client: reqwest::Client,
    config: QuestionConfig,
}

impl QuestionService {
    #[must_use]
    pub fn new(config: QuestionConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    /// Builds the service from the environment.
    ///
    /// # Errors
    ///
    /// Returns [`GenerationError::Disabled`] when no API key is configured.
    pub fn from_env() -> Result<Self, GenerationError> {
        QuestionConfig::from_env()
            .map(Self::new)
            .ok_or(GenerationError::Disabled)
    }

    /// Generates up to `count` multiple-choice questions about `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`GenerationError`] when the request fails or the model's
    /// output cannot be salvaged into at least one valid question.
    pub async fn generate(
        &self,
        topic: &str,
        count: usize,
    ) -> Result<Vec<Question>, GenerationError> {
        let prompt = build_prompt(topic, count);
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        debug!(topic, count, model = %self.config.model, "requesting questions");
        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(GenerationError::HttpStatus(status));
        }

        let reply: ChatResponse = response.json().await?;
        let content = reply
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or(GenerationError::Empty)?;

        parse_questions(&content, topic, count)
    }
}

fn build_prompt(topic: &str, count: usize) -> String {
    format!(
        "Generate {count} multiple-choice practice questions about \"{topic}\". \
         Respond with ONLY a JSON array, no prose. Each element must have: \
         \"question\" (string), \"options\" (array of exactly {OPTIONS_PER_QUESTION} strings), \
         \"correctIndex\" (0-based index of the right option), and \
         \"explanation\" (one short sentence)."
    )
}

/// Parses model output into normalized questions.
fn parse_questions(
    content: &str,
    topic: &str,
    count: usize,
) -> Result<Vec<Question>, GenerationError> {
    let array = extract_json_array(content).ok_or(GenerationError::Empty)?;
    let raw: Vec<RawQuestion> =
        serde_json::from_str(array).map_err(|err| GenerationError::Malformed(err.to_string()))?;

    let questions: Vec<Question> = raw
        .into_iter()
        .filter_map(|raw| normalize(raw, topic))
        .take(count)
        .enumerate()
        .map(|(i, mut q)| {
            q.id = u32::try_from(i).unwrap_or(u32::MAX) + 1;
            q
        })
        .collect();

    if questions.is_empty() {
        return Err(GenerationError::Empty);
    }
    Ok(questions)
}

/// Slices out the outermost JSON array, tolerating code fences and prose
/// around it.
fn extract_json_array(content: &str) -> Option<&str> {
    let stripped = content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    let start = stripped.find('[')?;
    let end = stripped.rfind(']')?;
    if end < start {
        return None;
    }
    Some(&stripped[start..=end])
}

/// Normalizes one raw entry; `None` drops entries beyond salvage.
fn normalize(raw: RawQuestion, topic: &str) -> Option<Question> {
    let question = raw.question?.trim().to_string();
    if question.is_empty() {
        return None;
    }

    let mut options: Vec<String> = raw
        .options
        .into_iter()
        .map(|o| o.trim().to_string())
        .filter(|o| !o.is_empty())
        .collect();
    options.truncate(OPTIONS_PER_QUESTION);
    if options.len() < 2 {
        return None;
    }

    let correct_index = raw.correct_index.unwrap_or(0).min(options.len() - 1);

    Some(Question {
        id: 0, // assigned after filtering
        topic: topic.to_string(),
        question,
        options,
        correct_index,
        explanation: raw.explanation.unwrap_or_default().trim().to_string(),
    })
}
