use chrono::Utc;
use std::time::Instant;
use tracing::info;
use uuid::Uuid;

use crate::database::Database;
use crate::errors::ApiError;
use crate::llm_service::LLMService;
use crate::models::{Document, Flashcard, FlashcardSet, GeneratedFlashcard};
use crate::{log_service_start, log_service_success};

pub const MAX_FLASHCARDS: i64 = 50;

#[derive(Clone)]
pub struct FlashcardService {
    db: Database,
    llm: LLMService,
}

impl FlashcardService {
    pub fn new(db: Database, llm: LLMService) -> Self {
        Self { db, llm }
    }

    pub async fn generate(
        &self,
        document_id: Uuid,
        count: i64,
        force_new: bool,
        user_id: Option<i64>,
    ) -> Result<FlashcardSet, ApiError> {
        let count = validate_count(count)?;

        let document = match self.db.get_document(document_id).await? {
            Some(document) if user_id.is_none_or(|owner| owner == document.owner_id) => document,
            _ => return Err(ApiError::NotFound(format!("Document {} not found", document_id))),
        };

        self.generate_for_document(&document, count, force_new).await
    }

    /// Flashcards for the most recently uploaded document (of one user when given)
    pub async fn generate_for_latest(&self, count: i64, user_id: Option<i64>) -> Result<FlashcardSet, ApiError> {
        let count = validate_count(count)?;

        let document = self
            .db
            .latest_document(user_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("No document found".to_string()))?;

        self.generate_for_document(&document, count, true).await
    }

    pub async fn list(&self, document_id: Uuid) -> Result<Vec<Flashcard>, ApiError> {
        if self.db.get_document(document_id).await?.is_none() {
            return Err(ApiError::NotFound(format!("Document {} not found", document_id)));
        }
        Ok(self.db.list_flashcards(document_id).await?)
    }

    async fn generate_for_document(
        &self,
        document: &Document,
        count: usize,
        force_new: bool,
    ) -> Result<FlashcardSet, ApiError> {
        let started = Instant::now();
        log_service_start!("flashcard_service", "generate", document_id = document.id);

        if document.summary.trim().is_empty() {
            return Err(ApiError::BadRequest("Document summary not available".to_string()));
        }

        if !force_new {
            let stored = self.db.list_flashcards(document.id).await?;
            if stored.len() == count {
                info!(document_id = %document.id, count, "Reusing stored flashcards");
                return Ok(to_set(&stored));
            }
        }

        let cards = self
            .llm
            .generate_flashcards(&document.summary, count)
            .await
            .map_err(ApiError::from_llm)?;

        let stored = self.db.replace_flashcards(document.id, &cards).await?;

        log_service_success!(
            "flashcard_service",
            "generate",
            document_id = document.id,
            duration_ms = started.elapsed().as_millis() as u64
        );
        Ok(to_set(&stored))
    }
}

fn validate_count(count: i64) -> Result<usize, ApiError> {
    if !(1..=MAX_FLASHCARDS).contains(&count) {
        return Err(ApiError::ValidationError(format!(
            "Number of flashcards must be between 1 and {}",
            MAX_FLASHCARDS
        )));
    }
    Ok(count as usize)
}

fn to_set(stored: &[Flashcard]) -> FlashcardSet {
    FlashcardSet {
        flashcards: stored
            .iter()
            .map(|card| GeneratedFlashcard {
                question: card.question.clone(),
                answer: card.answer.clone(),
            })
            .collect(),
        count: stored.len(),
        generated_at: stored
            .first()
            .map(|card| card.created_at)
            .unwrap_or_else(Utc::now)
            .timestamp(),
    }
}
