use crate::api::{ErrorReply, ErrorResponse};
use crate::llm_providers::ProviderError;
use axum::{http::StatusCode, response::Json};
use tracing::{error, info, warn};

/// Centralized error types for consistent API error handling
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] anyhow::Error),

    #[error("LLM service error: {0}")]
    LLMError(String),

    #[error("Upstream service timed out: {0}")]
    Timeout(String),

    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    #[error("Resource already exists: {0}")]
    DuplicateResource(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Unprocessable content: {0}")]
    Unprocessable(String),

    #[error("Internal server error: {0}")]
    InternalError(String),
}

/// Error context for structured logging
#[derive(Debug)]
pub struct ErrorContext {
    pub operation: String,
    pub resource_id: Option<String>,
    pub resource_type: String,
    pub user_friendly_message: Option<String>,
}

impl ErrorContext {
    pub fn new(operation: &str, resource_type: &str) -> Self {
        Self {
            operation: operation.to_string(),
            resource_id: None,
            resource_type: resource_type.to_string(),
            user_friendly_message: None,
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.resource_id = Some(id.to_string());
        self
    }

    pub fn with_user_message(mut self, message: &str) -> Self {
        self.user_friendly_message = Some(message.to_string());
        self
    }
}

impl ApiError {
    /// Map a failed vendor call, keeping timeouts apart from other failures
    pub fn from_llm(error: anyhow::Error) -> Self {
        match error.downcast_ref::<ProviderError>() {
            Some(ProviderError::Timeout { .. }) => ApiError::Timeout(error.to_string()),
            Some(ProviderError::InvalidResponse { .. }) => {
                ApiError::GenerationFailed("Failed to parse AI response. Please try again.".to_string())
            }
            _ => ApiError::LLMError(error.to_string()),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::ValidationError(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::DuplicateResource(_) => StatusCode::CONFLICT,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::GenerationFailed(_) => StatusCode::BAD_GATEWAY,
            ApiError::LLMError(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::DatabaseError(_) | ApiError::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Convert API error to HTTP response with consistent structure and logging
    pub fn to_response_with_context(
        self,
        context: ErrorContext,
    ) -> ErrorReply {
        let status = self.status_code();
        let message = match &self {
            ApiError::NotFound(_) => {
                info!(
                    operation = %context.operation,
                    resource_type = %context.resource_type,
                    resource_id = ?context.resource_id,
                    error = %self,
                    "Resource not found"
                );
                context
                    .user_friendly_message
                    .unwrap_or_else(|| format!("{} not found", context.resource_type))
            }
            ApiError::ValidationError(_)
            | ApiError::BadRequest(_)
            | ApiError::DuplicateResource(_)
            | ApiError::PayloadTooLarge(_)
            | ApiError::Unprocessable(_) => {
                warn!(
                    operation = %context.operation,
                    resource_type = %context.resource_type,
                    resource_id = ?context.resource_id,
                    error = %self,
                    "Request rejected"
                );
                self.to_string()
            }
            ApiError::Unauthorized(_) => {
                warn!(
                    operation = %context.operation,
                    resource_type = %context.resource_type,
                    error = %self,
                    "Unauthorized request"
                );
                self.to_string()
            }
            ApiError::LLMError(_) => {
                error!(
                    operation = %context.operation,
                    resource_type = %context.resource_type,
                    resource_id = ?context.resource_id,
                    error = %self,
                    "LLM service error"
                );
                "AI service temporarily unavailable. Please try again.".to_string()
            }
            ApiError::Timeout(_) => {
                error!(
                    operation = %context.operation,
                    resource_type = %context.resource_type,
                    resource_id = ?context.resource_id,
                    error = %self,
                    "Upstream timeout"
                );
                "AI service timed out. Please try again.".to_string()
            }
            ApiError::GenerationFailed(_) => {
                error!(
                    operation = %context.operation,
                    resource_type = %context.resource_type,
                    resource_id = ?context.resource_id,
                    error = %self,
                    "Generation produced no usable output"
                );
                self.to_string()
            }
            ApiError::DatabaseError(_) => {
                error!(
                    operation = %context.operation,
                    resource_type = %context.resource_type,
                    resource_id = ?context.resource_id,
                    error = %self,
                    "Database error"
                );
                "Database operation failed. Please try again.".to_string()
            }
            ApiError::InternalError(_) => {
                error!(
                    operation = %context.operation,
                    resource_type = %context.resource_type,
                    resource_id = ?context.resource_id,
                    error = %self,
                    "Internal server error"
                );
                "An internal error occurred. Please try again.".to_string()
            }
        };

        (status, Json(ErrorResponse::new(message)))
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::DatabaseError(anyhow::Error::from(err))
    }
}

/// Helper function to detect error types from anyhow error messages
pub fn classify_database_error(error: &anyhow::Error) -> ApiError {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("already exists") || error_str.contains("unique constraint") {
        ApiError::DuplicateResource("Resource already exists".to_string())
    } else if error_str.contains("no rows") {
        ApiError::NotFound("Resource not found".to_string())
    } else if error_str.contains("cannot be null") || error_str.contains("not null constraint") {
        ApiError::ValidationError("Required field is missing or invalid".to_string())
    } else {
        ApiError::DatabaseError(anyhow::anyhow!("{}", error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_context_creation() {
        let context = ErrorContext::new("generate_quiz", "quiz")
            .with_id("123")
            .with_user_message("Custom message");

        assert_eq!(context.operation, "generate_quiz");
        assert_eq!(context.resource_type, "quiz");
        assert_eq!(context.resource_id, Some("123".to_string()));
        assert_eq!(
            context.user_friendly_message,
            Some("Custom message".to_string())
        );
    }

    #[test]
    fn test_error_classification() {
        let duplicate_error = anyhow::anyhow!("UNIQUE constraint failed: users.email");
        let classified = classify_database_error(&duplicate_error);
        assert!(matches!(classified, ApiError::DuplicateResource(_)));

        let not_found_error = anyhow::anyhow!("No rows returned");
        let classified = classify_database_error(&not_found_error);
        assert!(matches!(classified, ApiError::NotFound(_)));

        let validation_error = anyhow::anyhow!("NOT NULL constraint failed: documents.filename");
        let classified = classify_database_error(&validation_error);
        assert!(matches!(classified, ApiError::ValidationError(_)));
    }

    #[test]
    fn test_api_error_responses() {
        let error = ApiError::NotFound("Quiz not found".to_string());
        let context = ErrorContext::new("get_quiz", "quiz").with_id("123");
        let (status, response) = error.to_response_with_context(context);
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(response.0.detail, "quiz not found");
        assert!(!response.0.success);

        for (error, expected) in [
            (ApiError::ValidationError("Invalid data".to_string()), StatusCode::BAD_REQUEST),
            (ApiError::DuplicateResource("Already exists".to_string()), StatusCode::CONFLICT),
            (ApiError::Unauthorized("bad password".to_string()), StatusCode::UNAUTHORIZED),
            (ApiError::GenerationFailed("empty".to_string()), StatusCode::BAD_GATEWAY),
        ] {
            let (status, _) = error.to_response_with_context(ErrorContext::new("test", "resource"));
            assert_eq!(status, expected);
        }
    }

    #[test]
    fn test_internal_error_hides_cause() {
        let error = ApiError::InternalError("bcrypt: invalid cost".to_string());
        let (status, response) = error.to_response_with_context(ErrorContext::new("register", "user"));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.0.detail, "An internal error occurred. Please try again.");
    }

    #[test]
    fn test_llm_errors_split_timeouts() {
        let timeout = anyhow::Error::new(ProviderError::Timeout {
            provider: "OpenAI",
            after: std::time::Duration::from_secs(30),
        });
        assert!(matches!(ApiError::from_llm(timeout), ApiError::Timeout(_)));

        let status = anyhow::Error::new(ProviderError::Status {
            provider: "OpenAI",
            status: 500,
            body: "boom".to_string(),
        });
        let mapped = ApiError::from_llm(status);
        assert!(matches!(mapped, ApiError::LLMError(_)));
        assert_eq!(mapped.status_code(), StatusCode::SERVICE_UNAVAILABLE);

        let unparseable = anyhow::Error::new(ProviderError::InvalidResponse {
            provider: "OpenAI",
            reason: "not a JSON array".to_string(),
        });
        assert_eq!(ApiError::from_llm(unparseable).status_code(), StatusCode::BAD_GATEWAY);

        let mapped = ApiError::from_llm(anyhow::anyhow!("anything else"));
        assert_eq!(mapped.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
