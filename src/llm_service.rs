use anyhow::Result;
use rand::Rng;
use rand::seq::SliceRandom;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

use crate::llm_providers::{
    CompletionOptions, JsonResponseParser, LLMProvider, LLMProviderFactory, LLMProviderType, ProviderError,
};
use crate::models::{Difficulty, GeneratedFlashcard, GeneratedQuestion};
use crate::quiz_parser::parse_quiz_text;
use crate::{log_llm_operation, log_performance};

/// Summaries longer than this many characters are cut before going into the quiz prompt
pub const QUIZ_CONTEXT_CHARS: usize = 2000;

const SUMMARY_TIMEOUT: Duration = Duration::from_secs(120);
const QUIZ_TIMEOUT: Duration = Duration::from_secs(30);
const FLASHCARD_TIMEOUT: Duration = Duration::from_secs(90);

const PADDING_ANSWER: &str = "Answer from the content studied";

/// A fully assembled chat request
#[derive(Debug, Clone)]
pub struct PromptRequest {
    pub system: String,
    pub user: String,
    pub options: CompletionOptions,
}

#[derive(Clone)]
pub struct LLMService {
    provider: LLMProvider,
    json_parser: JsonResponseParser,
}

impl LLMService {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        Self::new_with_provider(api_key, base_url, LLMProviderType::OpenAI, None)
    }

    pub fn new_with_provider(
        api_key: String,
        base_url: Option<String>,
        provider_type: LLMProviderType,
        model: Option<String>,
    ) -> Self {
        let provider = LLMProviderFactory::create_provider(provider_type, api_key, base_url, model);

        Self {
            provider,
            json_parser: JsonResponseParser,
        }
    }

    /// Get the provider name for logging and testing
    pub fn provider_name(&self) -> &'static str {
        self.provider.provider_name()
    }

    /// Get the model name being used
    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    async fn complete(&self, operation: &'static str, request: &PromptRequest) -> Result<String> {
        let started = Instant::now();
        log_llm_operation!(start, operation, provider = self.provider_name());

        match self
            .provider
            .make_request(Some(&request.system), &request.user, &request.options)
            .await
        {
            Ok(text) => {
                let duration_ms = started.elapsed().as_millis() as u64;
                log_llm_operation!(
                    success,
                    operation,
                    provider = self.provider_name(),
                    duration_ms = duration_ms,
                    response_length = text.len()
                );
                log_performance!(operation, duration_ms = duration_ms);
                Ok(text)
            }
            Err(e) => {
                log_llm_operation!(error, operation, provider = self.provider_name(), error = e);
                Err(e)
            }
        }
    }

    /// Summarize OCR text into a short, readable study summary
    pub async fn summarize(&self, text: &str) -> Result<String> {
        info!(text_length = text.len(), "Summarizing document text");

        let request = PromptRequest {
            system: "Summarize the following text so that it is easy to read and concise. \
                     Keep the key facts, definitions and figures. Answer in the same language as the text."
                .to_string(),
            user: text.to_string(),
            options: CompletionOptions {
                timeout: Some(SUMMARY_TIMEOUT),
                ..Default::default()
            },
        };

        self.complete("summarize", &request).await
    }

    /// Generate exactly `count` flashcards from a summary
    pub async fn generate_flashcards(&self, summary: &str, count: usize) -> Result<Vec<GeneratedFlashcard>> {
        let request = {
            let mut rng = rand::thread_rng();
            build_flashcard_prompt(summary, count, unix_now(), &mut rng)
        };

        info!(
            requested = count,
            temperature = ?request.options.temperature,
            "Generating flashcards"
        );

        let response_text = self.complete("generate_flashcards", &request).await?;
        debug!(response_content = %response_text, "Raw LLM response for flashcard generation");

        let cards = self
            .json_parser
            .parse_json_array::<GeneratedFlashcard>(&response_text)
            .map_err(|e| {
                warn!(error = %e, "Flashcard response was not a JSON array");
                ProviderError::InvalidResponse {
                    provider: self.provider_name(),
                    reason: e.to_string(),
                }
            })?;

        Ok(fit_flashcards(cards, count))
    }

    /// Generate up to `count` multiple-choice questions, falling back to free-text parsing
    pub async fn generate_quiz(
        &self,
        summary: &str,
        difficulty: Difficulty,
        count: usize,
    ) -> Result<Vec<GeneratedQuestion>> {
        let request = build_quiz_prompt(summary, difficulty, count);
        let response_text = self.complete("generate_quiz", &request).await?;
        debug!(response_content = %response_text, "Raw LLM response for quiz generation");

        Ok(self.parse_quiz_response(&response_text, count))
    }

    /// Turn a quiz reply into questions: JSON array first, then the free-text parser
    pub fn parse_quiz_response(&self, response_text: &str, count: usize) -> Vec<GeneratedQuestion> {
        // A fenced block replaces the reply for both parsers
        let fallback_text = JsonResponseParser::fenced_array(response_text).unwrap_or(response_text);

        let questions = match self.json_parser.parse_json_array::<GeneratedQuestion>(response_text) {
            Ok(questions) if !questions.is_empty() => {
                info!(question_count = questions.len(), "Parsed quiz JSON response");
                questions
            }
            Ok(_) => {
                warn!("Quiz JSON response was empty, using text parser");
                parse_quiz_text(fallback_text)
            }
            Err(e) => {
                warn!(error = %e, "Quiz JSON parse failed, using text parser");
                parse_quiz_text(fallback_text)
            }
        };

        questions
            .into_iter()
            .take(count)
            .map(|mut question| {
                question.correct_answer = normalize_answer_letter(&question.correct_answer);
                question
            })
            .collect()
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Pad with placeholder cards or truncate so exactly `count` cards remain
pub fn fit_flashcards(mut cards: Vec<GeneratedFlashcard>, count: usize) -> Vec<GeneratedFlashcard> {
    if cards.len() < count {
        warn!(received = cards.len(), requested = count, "Padding short flashcard response");
    }
    while cards.len() < count {
        cards.push(GeneratedFlashcard {
            question: format!("Additional question {}", cards.len() + 1),
            answer: PADDING_ANSWER.to_string(),
        });
    }
    cards.truncate(count);
    cards
}

/// Uppercase A-D; anything else becomes A
pub fn normalize_answer_letter(raw: &str) -> String {
    match raw.trim().chars().next().map(|c| c.to_ascii_uppercase()) {
        Some(letter @ 'A'..='D') => letter.to_string(),
        _ => "A".to_string(),
    }
}

/// Assemble the flashcard prompt with randomized style, wording and sampling
pub fn build_flashcard_prompt<R: Rng + ?Sized>(
    summary: &str,
    count: usize,
    now_secs: u64,
    rng: &mut R,
) -> PromptRequest {
    let seed: u32 = rng.gen_range(1..=10_000);

    let styles = [
        format!(
            "Create {count} short flashcards from this text.\n\
             Focus on the main ideas and important details.\n\
             Question: at most 15 words. Answer: at most 20 words.\n\
             Prefer key terms, definitions and core facts.\n\
             Random seed: {seed}\n\nText: {summary}"
        ),
        format!(
            "Create {count} short flashcards about applying this material.\n\
             Question: one point, at most 10 words. Answer: at most 15 words.\n\
             Cover what, who, when, where and why; ask about real use, examples and problem solving.\n\
             Variation: {}\n\nContent: {summary}",
            now_secs % 100
        ),
        format!(
            "Create {count} vocabulary and definition flashcards.\n\
             Question = a term or concept (short). Answer = its meaning or explanation (concise).\n\
             No more than 1-2 sentences per card.\n\
             Timestamp: {now_secs}\n\nMaterial: {summary}"
        ),
        format!(
            "Create {count} short question-and-answer flashcards that test deep understanding.\n\
             Emphasize analysis, comparison and reasoning.\n\
             Questions start with \"what is\", \"why\" or \"how\" (short). Answers are one sentence.\n\
             Random: {}\n\nDocument: {summary}",
            u64::from(seed) + now_secs
        ),
    ];

    let instructions = [
        "Keep questions and answers short, crisp and easy to remember.",
        "Stick to the main information, no long explanations.",
        "Make them quick to review and easy to read.",
        "Short question, clear answer, straight to the point.",
    ];

    let style = styles.choose(rng).cloned().unwrap_or_default();
    let instruction = instructions.choose(rng).copied().unwrap_or_default();

    let user = format!(
        "{style}\n\n{instruction}\n\n\
         Important:\n\
         - Question: short, at most 15 words\n\
         - Answer: short and clear, at most 20 words\n\
         - No long explanations\n\
         - Only the important points\n\n\
         Reply with a JSON array only, in the same language as the text:\n\
         [\n  {{\"question\": \"short question\", \"answer\": \"short answer\"}},\n  ...\n]"
    );

    PromptRequest {
        system: format!(
            "You create short, concise flashcards for quick review (ID: {seed})"
        ),
        user,
        options: CompletionOptions {
            temperature: Some(rng.gen_range(0.8..1.2)),
            top_p: Some(rng.gen_range(0.8..1.0)),
            max_tokens: Some(2000),
            frequency_penalty: Some(0.7),
            presence_penalty: Some(0.6),
            timeout: Some(FLASHCARD_TIMEOUT),
        },
    }
}

/// Assemble the quiz prompt; only the first part of the summary is sent
pub fn build_quiz_prompt(summary: &str, difficulty: Difficulty, count: usize) -> PromptRequest {
    let context: String = summary.chars().take(QUIZ_CONTEXT_CHARS).collect();

    let user = format!(
        r#"Create {count} multiple-choice questions from the text below.
Difficulty: {difficulty}

**Required format (JSON array)**:
[
  {{
    "question": "question text",
    "optionA": "choice A",
    "optionB": "choice B",
    "optionC": "choice C",
    "optionD": "choice D",
    "correctAnswer": "A",
    "explanation": "because..."
  }}
]

**Guidelines**:
- Questions must be short, concise and clear
- Every choice must be plausible (not obviously wrong)
- correctAnswer is exactly one of the letters A, B, C or D
- explanation says why that choice is correct
- Write in the same language as the text

---
**Text:**
{context}
"#
    );

    PromptRequest {
        system: "You are an expert at writing high-quality multiple-choice exam questions.".to_string(),
        user,
        options: CompletionOptions {
            temperature: Some(0.7),
            max_tokens: Some(2000),
            timeout: Some(QUIZ_TIMEOUT),
            ..Default::default()
        },
    }
}
