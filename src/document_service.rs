use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::database::Database;
use crate::errors::ApiError;
use crate::llm_service::LLMService;
use crate::models::{Document, UploadResult};
use crate::ocr::{InvalidPdf, OcrProvider};
use crate::{log_service_start, log_service_success, log_service_warn};

/// OCR, summarization and storage of uploaded documents
#[derive(Clone)]
pub struct DocumentService {
    db: Database,
    llm: LLMService,
    ocr: Arc<dyn OcrProvider>,
}

impl DocumentService {
    pub fn new(db: Database, llm: LLMService, ocr: Arc<dyn OcrProvider>) -> Self {
        Self { db, llm, ocr }
    }

    pub async fn upload(&self, user_id: i64, filename: &str, data: &[u8]) -> Result<UploadResult, ApiError> {
        let started = Instant::now();
        log_service_start!("document_service", "upload", user_id = user_id);

        if data.is_empty() {
            return Err(ApiError::BadRequest("Uploaded file is empty".to_string()));
        }

        if self.db.get_user(user_id).await?.is_none() {
            return Err(ApiError::NotFound(format!("User {} not found", user_id)));
        }

        let ocr = self.ocr.extract_text(filename, data).await.map_err(|e| {
            if e.downcast_ref::<InvalidPdf>().is_some() {
                ApiError::BadRequest(e.to_string())
            } else {
                ApiError::from_llm(e)
            }
        })?;

        if ocr.text.trim().is_empty() {
            log_service_warn!("document_service", "upload", "OCR returned no text");
            return Err(ApiError::Unprocessable(
                "Could not extract any text from the document".to_string(),
            ));
        }

        let summary = self.llm.summarize(&ocr.text).await.map_err(ApiError::from_llm)?;

        let document = self
            .db
            .create_document(filename, &ocr.text, &summary, user_id)
            .await?;

        log_service_success!(
            "document_service",
            "upload",
            document_id = document.id,
            duration_ms = started.elapsed().as_millis() as u64
        );

        Ok(UploadResult {
            document_id: document.id,
            filename: document.filename,
            ocr_text: document.full_text,
            summary: document.summary,
        })
    }

    pub async fn list_documents(&self, user_id: i64) -> Result<Vec<Document>, ApiError> {
        Ok(self.db.list_documents_by_owner(user_id).await?)
    }

    /// Look up a document; when a user is given it must be theirs
    pub async fn get_document(&self, id: Uuid, user_id: Option<i64>) -> Result<Document, ApiError> {
        match self.db.get_document(id).await? {
            Some(document) if user_id.is_none_or(|owner| owner == document.owner_id) => Ok(document),
            _ => Err(ApiError::NotFound(format!("Document {} not found", id))),
        }
    }
}
