//! OCR provider abstraction and the Typhoon OCR client.

use anyhow::{Context, Result};
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::llm_providers::ProviderError;

pub const DEFAULT_OCR_BASE_URL: &str = "https://api.opentyphoon.ai/v1";
pub const DEFAULT_OCR_MODEL: &str = "typhoon-ocr-preview";

const OCR_TIMEOUT: Duration = Duration::from_secs(300);

/// Text recovered from an uploaded document
#[derive(Debug, Clone, PartialEq)]
pub struct OcrOutput {
    pub text: String,
    pub page_count: u32,
}

/// The uploaded bytes could not be read as a PDF
#[derive(Debug, thiserror::Error)]
#[error("not a readable PDF: {0}")]
pub struct InvalidPdf(pub String);

/// Async trait implemented by each OCR backend
#[async_trait::async_trait]
pub trait OcrProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn extract_text(&self, filename: &str, data: &[u8]) -> Result<OcrOutput>;
}

#[derive(Debug, Clone)]
pub struct TyphoonOcr {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct OcrParams<'a> {
    model: &'a str,
    task_type: &'a str,
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
    repetition_penalty: f32,
    pages: &'a [u32],
}

#[derive(Debug, Deserialize)]
struct OcrResponse {
    #[serde(default)]
    results: Vec<Value>,
}

impl TyphoonOcr {
    pub fn new(api_key: String, base_url: Option<String>, model: Option<String>) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_OCR_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: model.unwrap_or_else(|| DEFAULT_OCR_MODEL.to_string()),
        }
    }
}

#[async_trait::async_trait]
impl OcrProvider for TyphoonOcr {
    fn name(&self) -> &str {
        "typhoon_ocr"
    }

    async fn extract_text(&self, filename: &str, data: &[u8]) -> Result<OcrOutput> {
        let page_count = count_pdf_pages(data)?;
        let pages: Vec<u32> = (1..=page_count).collect();

        let params = OcrParams {
            model: &self.model,
            task_type: "default",
            max_tokens: 16000,
            temperature: 0.1,
            top_p: 0.6,
            repetition_penalty: 1.2,
            pages: &pages,
        };

        info!(
            provider = self.name(),
            filename = %filename,
            bytes = data.len(),
            page_count,
            "Sending document to OCR"
        );

        let part = Part::bytes(data.to_vec())
            .file_name(filename.to_string())
            .mime_str("application/pdf")?;
        let form = Form::new()
            .part("file", part)
            .text("params", serde_json::to_string(&params)?)
            .text("pages", serde_json::to_string(&pages)?);

        let response = self
            .client
            .post(format!("{}/ocr", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .timeout(OCR_TIMEOUT)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest("TyphoonOCR", Some(OCR_TIMEOUT), e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                provider: "TyphoonOCR",
                status: status.as_u16(),
                body,
            }
            .into());
        }

        let raw = response.text().await?;
        debug!(
            provider = self.name(),
            response_bytes = raw.len(),
            "Received OCR response"
        );
        let parsed: OcrResponse = serde_json::from_str(&raw).context("OCR response was not JSON")?;

        Ok(OcrOutput {
            text: collect_page_text(&parsed.results),
            page_count,
        })
    }
}

/// Count pages in a PDF held in memory
pub fn count_pdf_pages(data: &[u8]) -> Result<u32> {
    let document = lopdf::Document::load_mem(data).map_err(|e| InvalidPdf(e.to_string()))?;
    let count = document.get_pages().len() as u32;
    if count == 0 {
        return Err(InvalidPdf("document has no pages".to_string()).into());
    }
    Ok(count)
}

/// Join the per-page text of an OCR response.
///
/// Each result holds `message.choices[0].message.content`; when that content is
/// itself JSON its `natural_text` field is used. Pages that cannot be read are
/// skipped.
pub fn collect_page_text(results: &[Value]) -> String {
    let mut texts = Vec::new();

    for (index, item) in results.iter().enumerate() {
        let Some(content) = item
            .pointer("/message/choices/0/message/content")
            .and_then(Value::as_str)
        else {
            warn!(page_index = index, "OCR result missing message content, skipping page");
            continue;
        };

        let page_text = match serde_json::from_str::<Value>(content) {
            Ok(Value::Object(map)) => map
                .get("natural_text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            _ => content.to_string(),
        };

        let page_text = page_text.trim();
        if !page_text.is_empty() {
            texts.push(page_text.to_string());
        }
    }

    texts.join("\n").trim().to_string()
}
