mod common;

use axum::{
    extract::{Multipart, State},
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

use note2brain::llm_providers::ProviderError;
use note2brain::ocr::{count_pdf_pages, OcrProvider, TyphoonOcr};

use common::blank_pdf;

#[derive(Debug, Default, Clone)]
struct ReceivedUpload {
    authorization: String,
    filename: String,
    file_bytes: usize,
    params: Value,
    pages: Value,
}

#[derive(Clone)]
struct OcrServerState {
    received: Arc<Mutex<Vec<ReceivedUpload>>>,
    fail: bool,
}

async fn ocr_endpoint(
    State(state): State<OcrServerState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<Value>, (StatusCode, String)> {
    let mut upload = ReceivedUpload {
        authorization: headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string(),
        ..Default::default()
    };

    while let Some(field) = multipart.next_field().await.unwrap() {
        match field.name().unwrap_or_default() {
            "file" => {
                upload.filename = field.file_name().unwrap_or_default().to_string();
                upload.file_bytes = field.bytes().await.unwrap().len();
            }
            "params" => upload.params = serde_json::from_str(&field.text().await.unwrap()).unwrap(),
            "pages" => upload.pages = serde_json::from_str(&field.text().await.unwrap()).unwrap(),
            _ => {}
        }
    }
    state.received.lock().unwrap().push(upload);

    if state.fail {
        return Err((StatusCode::INTERNAL_SERVER_ERROR, "ocr backend down".to_string()));
    }

    let page = |content: &str| json!({ "message": { "choices": [ { "message": { "content": content } } ] } });
    Ok(Json(json!({
        "results": [
            page(r#"{"natural_text": "Chapter one: cells"}"#),
            page("Chapter two: tissues"),
        ]
    })))
}

async fn spawn_ocr_server(fail: bool) -> (String, Arc<Mutex<Vec<ReceivedUpload>>>) {
    let received = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new()
        .route("/ocr", post(ocr_endpoint))
        .with_state(OcrServerState {
            received: received.clone(),
            fail,
        });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}", addr), received)
}

#[test]
fn test_page_count_of_generated_pdf() {
    assert_eq!(count_pdf_pages(&blank_pdf(1)).unwrap(), 1);
    assert_eq!(count_pdf_pages(&blank_pdf(3)).unwrap(), 3);
}

#[tokio::test]
async fn test_typhoon_ocr_sends_every_page_and_joins_text() {
    let (base_url, received) = spawn_ocr_server(false).await;
    let ocr = TyphoonOcr::new("ocr-key".to_string(), Some(format!("{}/", base_url)), None);
    let pdf = blank_pdf(2);

    let output = ocr.extract_text("lecture.pdf", &pdf).await.unwrap();
    assert_eq!(output.page_count, 2);
    assert_eq!(output.text, "Chapter one: cells\nChapter two: tissues");

    let received = received.lock().unwrap().clone();
    assert_eq!(received.len(), 1);
    let upload = &received[0];
    assert_eq!(upload.authorization, "Bearer ocr-key");
    assert_eq!(upload.filename, "lecture.pdf");
    assert_eq!(upload.file_bytes, pdf.len());
    assert_eq!(upload.pages, json!([1, 2]));
    assert_eq!(upload.params["pages"], json!([1, 2]));
    assert_eq!(upload.params["model"], "typhoon-ocr-preview");
    assert_eq!(upload.params["task_type"], "default");
    assert_eq!(upload.params["max_tokens"], 16000);
}

#[tokio::test]
async fn test_typhoon_ocr_vendor_failure_is_typed() {
    let (base_url, _) = spawn_ocr_server(true).await;
    let ocr = TyphoonOcr::new("ocr-key".to_string(), Some(base_url), Some("custom-ocr".to_string()));

    let err = ocr.extract_text("lecture.pdf", &blank_pdf(1)).await.unwrap_err();
    match err.downcast_ref::<ProviderError>() {
        Some(ProviderError::Status { status, body, .. }) => {
            assert_eq!(*status, 500);
            assert_eq!(body, "ocr backend down");
        }
        other => panic!("expected a status error, got {:?}", other),
    }
}
