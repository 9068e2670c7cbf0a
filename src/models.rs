use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Question id (as a string) mapped to the letter the user picked
pub type AnswerMap = BTreeMap<String, String>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub email: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: Uuid,
    pub filename: String,
    pub full_text: String,
    pub summary: String,
    pub owner_id: i64,
    pub created_at: DateTime<Utc>,
}

/// Short form of a document embedded in quiz payloads
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentRef {
    pub id: Uuid,
    pub filename: String,
}

impl From<&Document> for DocumentRef {
    fn from(document: &Document) -> Self {
        Self {
            id: document.id,
            filename: document.filename.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Difficulty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            other => Err(format!(
                "difficulty must be one of easy, medium or hard (got '{}')",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quiz {
    pub id: Uuid,
    pub user_id: i64,
    pub document_id: Uuid,
    pub difficulty: Difficulty,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuizQuestion {
    pub id: Uuid,
    pub quiz_id: Uuid,
    pub question: String,
    pub option_a: String,
    pub option_b: String,
    pub option_c: String,
    pub option_d: String,
    pub correct_answer: String,
    pub explanation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizAttempt {
    pub id: Uuid,
    pub user_id: i64,
    pub quiz_id: Uuid,
    pub score: i64,
    pub total_questions: i64,
    pub answers: AnswerMap,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Flashcard {
    pub id: Uuid,
    pub document_id: Uuid,
    pub question: String,
    pub answer: String,
    pub created_at: DateTime<Utc>,
}

/// A multiple-choice question as produced by the LLM, before it is stored
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedQuestion {
    pub question: String,
    pub option_a: String,
    pub option_b: String,
    pub option_c: String,
    pub option_d: String,
    pub correct_answer: String,
    #[serde(default)]
    pub explanation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneratedFlashcard {
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub answer: String,
}

// Requests

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserQuery {
    pub user_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionalUserQuery {
    pub user_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizGenerateRequest {
    pub document_id: Uuid,
    #[serde(default = "default_difficulty")]
    pub difficulty: String,
    #[serde(default = "default_question_count")]
    pub question_count: i64,
}

fn default_difficulty() -> String {
    "medium".to_string()
}

fn default_question_count() -> i64 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitAnswersRequest {
    pub quiz_id: Uuid,
    #[serde(default)]
    pub answers: AnswerMap,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlashcardGenerateRequest {
    pub document_id: Uuid,
    #[serde(default = "default_flashcard_count")]
    pub num_questions: i64,
    #[serde(default)]
    pub force_new: bool,
    #[serde(default, deserialize_with = "lenient_user_id")]
    pub user_id: Option<i64>,
}

/// Accepts `7` or `"7"`; a blank string means no user
fn lenient_user_id<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Number(i64),
        Text(String),
    }

    match Option::<RawId>::deserialize(deserializer)? {
        None => Ok(None),
        Some(RawId::Number(id)) => Ok(Some(id)),
        Some(RawId::Text(text)) if text.trim().is_empty() => Ok(None),
        Some(RawId::Text(text)) => text.trim().parse().map(Some).map_err(serde::de::Error::custom),
    }
}

fn default_flashcard_count() -> i64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatestFlashcardQuery {
    pub questions: i64,
    pub user_id: Option<i64>,
}

// Responses

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub user_id: i64,
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResult {
    pub document_id: Uuid,
    pub filename: String,
    pub ocr_text: String,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlashcardSet {
    pub flashcards: Vec<GeneratedFlashcard>,
    pub count: usize,
    pub generated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizDetail {
    #[serde(flatten)]
    pub quiz: Quiz,
    pub document: DocumentRef,
    pub questions: Vec<QuizQuestion>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedQuiz {
    pub quiz_id: Uuid,
    pub question_count: usize,
    #[serde(rename = "data")]
    pub quiz: QuizDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuestionResult {
    pub question_id: Uuid,
    pub question: String,
    pub user_answer: String,
    pub correct_answer: String,
    pub is_correct: bool,
    pub explanation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizSubmission {
    pub score: i64,
    pub total: i64,
    pub percentage: f64,
    pub results: Vec<QuestionResult>,
    pub attempt_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionKey {
    pub id: Uuid,
    pub question: String,
    pub correct_answer: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryQuiz {
    pub id: Uuid,
    pub document: DocumentRef,
    pub questions: Vec<QuestionKey>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptHistoryEntry {
    pub id: Uuid,
    pub quiz_id: Uuid,
    pub score: i64,
    pub total_questions: i64,
    pub answered_count: usize,
    pub completed_at: DateTime<Utc>,
    pub answers: AnswerMap,
    pub quiz: HistoryQuiz,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptDetail {
    #[serde(flatten)]
    pub attempt: QuizAttempt,
    pub quiz: QuizDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultQuestion {
    pub id: Uuid,
    pub question: String,
    pub option_a: String,
    pub option_b: String,
    pub option_c: String,
    pub option_d: String,
    pub correct_answer: String,
    pub user_answer: String,
    pub explanation: String,
    pub is_correct: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizResult {
    #[serde(rename = "quiz_id")]
    pub quiz_id: Uuid,
    pub document: DocumentRef,
    pub score: i64,
    pub total: i64,
    pub answered_count: usize,
    pub questions: Vec<ResultQuestion>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryQuestion {
    pub id: Uuid,
    pub question: String,
    pub option_a: String,
    pub option_b: String,
    pub option_c: String,
    pub option_d: String,
    pub correct_answer: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryQuiz {
    pub id: Uuid,
    pub document: DocumentRef,
    pub questions: Vec<RetryQuestion>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletedCount {
    pub message: String,
    pub deleted: u64,
}
