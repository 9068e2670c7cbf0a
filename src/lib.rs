pub mod api;
pub mod config;
pub mod database;
pub mod document_service;
pub mod errors;
pub mod flashcard_service;
pub mod llm_providers;
pub mod llm_service;
pub mod logging;
pub mod models;
pub mod ocr;
pub mod quiz_parser;
pub mod quiz_service;
pub mod user_service;

pub use database::Database;
pub use errors::*;
pub use llm_providers::{JsonResponseParser, LLMProvider, LLMProviderFactory, LLMProviderType};
pub use llm_service::LLMService;
pub use models::*;
pub use ocr::{OcrOutput, OcrProvider, TyphoonOcr};
pub use quiz_parser::parse_quiz_text;
