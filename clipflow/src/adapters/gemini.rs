//! Gemini text generation: scripts, trend analysis, SEO and replies.

use super::fallback::{self, DEFAULT_POSTING_TIME};
use super::{
    ContentGenerator, GeneratedContent, Interaction, MarketingOptimizer, MarketingPackage,
    MarketingRequest, ReplyWriter, TopicSource,
};
use crate::config::{ContentConfig, PersonaConfig};
use crate::errors::StageError;
use crate::utils::hashtag;
use async_trait::async_trait;
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// Longest response excerpt kept as an error diagnostic.
const EXCERPT_LIMIT: usize = 500;

/// Client for the Gemini `generateContent` endpoint.
///
/// Without an API key every call fails with a `Configuration` error, which
/// content stages turn into fallback content.
#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
    temperature: f32,
    content_style: String,
}

impl std::fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("has_api_key", &self.api_key.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: [RequestContent<'a>; 1],
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct RequestContent<'a> {
    parts: [RequestPart<'a>; 1],
}

#[derive(Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: String,
}

impl GeminiClient {
    /// Creates a client from config and persona settings.
    ///
    /// # Errors
    ///
    /// Returns a `Configuration` error if the HTTP client cannot be built.
    pub fn new(config: &ContentConfig, persona: &PersonaConfig) -> Result<Self, StageError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| StageError::configuration(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key: config.api_key.clone().filter(|k| !k.trim().is_empty()),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            content_style: persona.content_style.clone(),
        })
    }

    /// Returns true if an API key is configured.
    #[must_use]
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Sends one prompt and returns the concatenated response text.
    ///
    /// # Errors
    ///
    /// `Configuration` without an API key or on 401/403, `Transient` on
    /// 429, 5xx, timeouts and connection failures, `Permanent` otherwise.
    pub async fn generate(&self, prompt: &str, temperature: f32) -> Result<String, StageError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| StageError::configuration("GEMINI_API_KEY not set"))?;

        let url = format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model);
        let body = GenerateRequest {
            contents: [RequestContent {
                parts: [RequestPart { text: prompt }],
            }],
            generation_config: GenerationConfig { temperature },
        };

        debug!(model = %self.model, "calling gemini");
        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(status, &text));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| StageError::permanent(format!("unreadable gemini response: {e}")))?;

        let text: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().map(|p| p.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(StageError::permanent("gemini returned no text"));
        }
        Ok(text)
    }

    async fn generate_json(&self, prompt: &str, temperature: f32) -> Result<Value, StageError> {
        let text = self.generate(prompt, temperature).await?;
        extract_json(&text)
    }
}

#[async_trait]
impl ContentGenerator for GeminiClient {
    async fn generate_text_content(&self, topic: &str) -> Result<GeneratedContent, StageError> {
        let prompt = format!(
            "You are a creative AI influencer content director.\n\
             Topic: {topic}\n\n\
             1. Write a short, engaging, viral-style script (max 30 seconds spoken) for a video.\n   \
             Tone: {style}.\n   Format: just the spoken text.\n\
             2. Write a catchy Instagram caption with hashtags.\n\
             3. Write a Stable Diffusion prompt for a background image relevant to this topic.\n\n\
             Output format (strictly):\n\
             SCRIPT: [Script text]\n\
             CAPTION: [Caption text]\n\
             IMAGE_PROMPT: [Prompt text]\n",
            style = self.content_style,
        );

        let text = self.generate(&prompt, self.temperature).await?;
        let content = parse_sections(&text);
        if content.script.is_empty() || content.caption.is_empty() || content.image_prompt.is_empty() {
            return Err(StageError::permanent(
                "gemini response is missing a SCRIPT, CAPTION or IMAGE_PROMPT section",
            )
            .with_diagnostic(excerpt(&text)));
        }
        Ok(content)
    }
}

#[async_trait]
impl TopicSource for GeminiClient {
    async fn candidate_topics(&self, niche: &str) -> Result<Vec<String>, StageError> {
        let prompt = format!(
            "You are a social media trend analyst for an AI influencer in the {niche} niche.\n\
             Analyze current trends and provide content recommendations.\n\n\
             Return ONLY valid JSON in this exact format:\n\
             {{\n  \"trending_topics\": [\"Topic 1\", \"Topic 2\", \"Topic 3\"],\n  \
             \"hashtags\": [\"#hashtag1\", \"#hashtag2\"],\n  \
             \"recommended_topic\": \"Most recommended topic for today\"\n}}\n"
        );

        let value = self.generate_json(&prompt, 0.8).await?;
        let topics = topics_from_trends(&value);
        if topics.is_empty() {
            return Err(StageError::permanent("trend analysis returned no topics")
                .with_diagnostic(excerpt(&value.to_string())));
        }
        Ok(topics)
    }
}

#[async_trait]
impl MarketingOptimizer for GeminiClient {
    async fn optimize(&self, request: &MarketingRequest<'_>) -> Result<MarketingPackage, StageError> {
        let description = request.caption.or(request.script).unwrap_or(request.topic);
        let prompt = format!(
            "Optimize this short video for SEO:\n\n\
             Title: {title}\nDescription: {description}\n\n\
             Return ONLY valid JSON:\n\
             {{\n  \"optimized_title\": \"SEO-optimized title (max 60 chars)\",\n  \
             \"optimized_description\": \"SEO-optimized description with keywords\",\n  \
             \"keywords\": [\"keyword1\", \"keyword2\"],\n  \
             \"suggested_tags\": [\"tag1\", \"tag2\"]\n}}\n",
            title = request.topic,
        );

        let value = self.generate_json(&prompt, 0.5).await?;
        Ok(package_from_seo(&value, request))
    }
}

#[async_trait]
impl ReplyWriter for GeminiClient {
    async fn write_reply(&self, persona: &str, interaction: &Interaction) -> Result<String, StageError> {
        let prompt = format!(
            "You are {persona}, a social media creator. Tone: {style}.\n\
             Reply to this comment from @{author} in one or two friendly sentences. \
             Output only the reply.\n\nComment: {text}\n",
            style = self.content_style,
            author = interaction.author,
            text = interaction.text,
        );

        let reply = self.generate(&prompt, self.temperature).await?;
        Ok(reply.trim().trim_matches('"').to_string())
    }
}

/// Parses `SCRIPT:`, `CAPTION:` and `IMAGE_PROMPT:` sections.
///
/// Lines after a section marker are appended, space-joined, to the last
/// section seen. Blank lines and text before the first marker are dropped.
#[must_use]
pub fn parse_sections(text: &str) -> GeneratedContent {
    #[derive(Clone, Copy)]
    enum Section {
        Script,
        Caption,
        ImagePrompt,
    }

    let mut parts: [Vec<&str>; 3] = [Vec::new(), Vec::new(), Vec::new()];
    let mut current: Option<Section> = None;

    for line in text.lines().map(str::trim) {
        let (section, rest) = if let Some(rest) = line.strip_prefix("SCRIPT:") {
            (Some(Section::Script), rest)
        } else if let Some(rest) = line.strip_prefix("CAPTION:") {
            (Some(Section::Caption), rest)
        } else if let Some(rest) = line.strip_prefix("IMAGE_PROMPT:") {
            (Some(Section::ImagePrompt), rest)
        } else {
            (None, line)
        };

        if let Some(section) = section {
            current = Some(section);
            parts[section as usize].clear();
        }
        let rest = rest.trim();
        if let (Some(section), false) = (current, rest.is_empty()) {
            parts[section as usize].push(rest);
        }
    }

    let [script, caption, image_prompt] = parts.map(|lines| lines.join(" "));
    GeneratedContent {
        script,
        caption,
        image_prompt,
    }
}

/// Extracts a JSON object from an LLM response.
///
/// Tries a fenced ```` ```json ```` block first, then the outermost `{…}`
/// span, then the whole text.
///
/// # Errors
///
/// Returns a `Permanent` error with the response excerpt as diagnostic when
/// nothing parses.
pub fn extract_json(text: &str) -> Result<Value, StageError> {
    let fenced = Regex::new(r"(?s)```json\s*\n(.*?)\n\s*```")
        .ok()
        .and_then(|re| re.captures(text))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str());
    let braces = Regex::new(r"(?s)\{.*\}")
        .ok()
        .and_then(|re| re.find(text))
        .map(|m| m.as_str());

    let candidate = fenced.or(braces).unwrap_or(text);
    serde_json::from_str(candidate.trim()).map_err(|e| {
        warn!(error = %e, "failed to parse JSON response");
        StageError::permanent(format!("response is not valid JSON: {e}")).with_diagnostic(excerpt(text))
    })
}

fn topics_from_trends(value: &Value) -> Vec<String> {
    let mut topics: Vec<String> = Vec::new();
    let mut push = |topic: &str| {
        let topic = topic.trim();
        if !topic.is_empty() && !topics.iter().any(|t| t == topic) {
            topics.push(topic.to_string());
        }
    };

    if let Some(recommended) = value.get("recommended_topic").and_then(Value::as_str) {
        push(recommended);
    }
    for topic in string_list(value, "trending_topics") {
        push(&topic);
    }
    topics
}

fn package_from_seo(value: &Value, request: &MarketingRequest<'_>) -> MarketingPackage {
    let mut hashtags: Vec<String> = request
        .caption
        .unwrap_or_default()
        .split_whitespace()
        .filter(|w| w.starts_with('#') && w.len() > 1)
        .map(str::to_string)
        .collect();
    let tags = string_list(value, "suggested_tags");
    for tag in tags.iter().filter_map(|t| hashtag(t)) {
        if !hashtags.contains(&tag) {
            hashtags.push(tag);
        }
    }
    if hashtags.is_empty() {
        hashtags = fallback::marketing(request.topic).hashtags;
    }

    let text = |key: &str| {
        value
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    MarketingPackage {
        hashtags,
        posting_time: DEFAULT_POSTING_TIME.to_string(),
        title: text("optimized_title"),
        description: text("optimized_description"),
        keywords: string_list(value, "keywords"),
        tags,
    }
}

fn string_list(value: &Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn excerpt(text: &str) -> String {
    text.chars().take(EXCERPT_LIMIT).collect()
}

fn request_error(e: reqwest::Error) -> StageError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        StageError::transient(format!("gemini request failed: {e}"))
    } else {
        StageError::permanent(format!("gemini request failed: {e}"))
    }
}

fn status_error(status: StatusCode, body: &str) -> StageError {
    let message = format!("gemini returned {status}");
    let err = match status.as_u16() {
        429 | 500..=599 => StageError::transient(message),
        401 | 403 => StageError::configuration(message),
        _ => StageError::permanent(message),
    };
    err.with_diagnostic(excerpt(body))
}
