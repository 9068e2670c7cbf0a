mod common;

use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde_json::Value;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use note2brain::api::{create_app, AppState};
use note2brain::ocr::{OcrProvider, TyphoonOcr};
use note2brain::Database;

use common::{blank_pdf, FakeLlm, FakeOcr, FakeReplies, PASSWORD};

/// A real listener is used here so uploads travel as genuine multipart bodies
struct UploadServer {
    base_url: String,
    client: reqwest::Client,
    llm: FakeLlm,
}

impl UploadServer {
    async fn start(ocr: Arc<dyn OcrProvider>, max_upload_bytes: usize) -> Self {
        let db = Database::new("sqlite::memory:").await.unwrap();
        let llm = FakeLlm::spawn(FakeReplies::default()).await;
        let app = create_app(AppState::new(db, llm.service(), ocr), max_upload_bytes);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{}", addr),
            client: reqwest::Client::new(),
            llm,
        }
    }

    async fn register(&self, email: &str) -> i64 {
        let body: Value = self
            .client
            .post(format!("{}/register", self.base_url))
            .json(&serde_json::json!({ "email": email, "password": PASSWORD, "confirm_password": PASSWORD }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        body["id"].as_i64().unwrap()
    }

    async fn upload(&self, user_id: i64, form: Form) -> (StatusCode, Value) {
        let response = self
            .client
            .post(format!("{}/upload?user_id={}", self.base_url, user_id))
            .multipart(form)
            .send()
            .await
            .unwrap();
        let status = response.status();
        let body = response.json().await.unwrap_or(Value::Null);
        (status, body)
    }
}

fn pdf_form(filename: &str, data: Vec<u8>) -> Form {
    let part = Part::bytes(data)
        .file_name(filename.to_string())
        .mime_str("application/pdf")
        .unwrap();
    Form::new().part("file", part)
}

#[tokio::test]
async fn test_upload_runs_ocr_and_summary() {
    let ocr = Arc::new(FakeOcr::new("Cells divide by mitosis."));
    let server = UploadServer::start(ocr.clone(), 1024 * 1024).await;
    let user = server.register("upload@example.com").await;

    let (status, body) = server.upload(user, pdf_form("biology.pdf", blank_pdf(1))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["filename"], "biology.pdf");
    assert_eq!(body["ocr_text"], "Cells divide by mitosis.");
    assert_eq!(body["summary"], "Photosynthesis turns light into chemical energy.");
    assert_eq!(ocr.calls.load(Ordering::SeqCst), 1);

    let summarize_request = &server.llm.requests()[0];
    assert_eq!(summarize_request["messages"][1]["content"], "Cells divide by mitosis.");

    let documents: Value = server
        .client
        .get(format!("{}/documents?user_id={}", server.base_url, user))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let documents = documents.as_array().unwrap();
    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0]["id"], body["document_id"]);
    assert_eq!(documents[0]["fullText"], "Cells divide by mitosis.");
}

#[tokio::test]
async fn test_upload_rejections() {
    let ocr = Arc::new(FakeOcr::new("text"));
    let server = UploadServer::start(ocr.clone(), 1024 * 1024).await;
    let user = server.register("reject@example.com").await;

    let (status, body) = server.upload(user, pdf_form("empty.pdf", Vec::new())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("empty"));

    let (status, body) = server
        .upload(user, Form::new().text("note", "no file here"))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("No file uploaded"));

    let (status, _) = server.upload(9999, pdf_form("ghost.pdf", blank_pdf(1))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    assert_eq!(ocr.calls.load(Ordering::SeqCst), 0);
    assert_eq!(server.llm.calls(), 0);
}

#[tokio::test]
async fn test_upload_without_text_is_unprocessable() {
    let server = UploadServer::start(Arc::new(FakeOcr::new("  \n ")), 1024 * 1024).await;
    let user = server.register("blank@example.com").await;

    let (status, body) = server.upload(user, pdf_form("scan.pdf", blank_pdf(1))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["success"], false);
    assert_eq!(server.llm.calls(), 0);
}

#[tokio::test]
async fn test_upload_of_non_pdf_is_rejected_before_ocr() {
    // Nothing listens on this port; the PDF check fails before any request is made
    let ocr = TyphoonOcr::new("key".to_string(), Some("http://127.0.0.1:9".to_string()), None);
    let server = UploadServer::start(Arc::new(ocr), 1024 * 1024).await;
    let user = server.register("notpdf@example.com").await;

    let (status, body) = server
        .upload(user, pdf_form("notes.pdf", b"plain text, not a pdf".to_vec()))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("not a readable PDF"));
}

#[tokio::test]
async fn test_oversized_upload() {
    let server = UploadServer::start(Arc::new(FakeOcr::new("text")), 1024).await;
    let user = server.register("big@example.com").await;

    let (status, _) = server.upload(user, pdf_form("big.pdf", vec![b'x'; 8 * 1024])).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}
