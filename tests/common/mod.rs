#![allow(dead_code)]

use async_trait::async_trait;
use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use axum_test::TestServer;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use note2brain::api::{create_app, AppState};
use note2brain::ocr::{OcrOutput, OcrProvider};
use note2brain::{Database, LLMService};

pub const PASSWORD: &str = "Passw0rdX";

/// Canned replies keyed by the kind of prompt the service sends
#[derive(Clone)]
pub struct FakeReplies {
    pub summary: String,
    pub flashcards: String,
    pub quiz: String,
    pub fail_status: Option<u16>,
}

impl Default for FakeReplies {
    fn default() -> Self {
        Self {
            summary: "Photosynthesis turns light into chemical energy.".to_string(),
            flashcards: json!([
                {"question": "What does photosynthesis produce?", "answer": "Glucose and oxygen"},
                {"question": "Where does it happen?", "answer": "In chloroplasts"}
            ])
            .to_string(),
            quiz: format!("```json\n{}\n```", quiz_json(3)),
            fail_status: None,
        }
    }
}

pub fn quiz_json(count: usize) -> String {
    let questions: Vec<Value> = (1..=count)
        .map(|n| {
            json!({
                "question": format!("Question number {}?", n),
                "optionA": "alpha",
                "optionB": "beta",
                "optionC": "gamma",
                "optionD": "delta",
                "correctAnswer": (["a", "B", "C", "D"][(n - 1) % 4]),
                "explanation": format!("Reason {}", n)
            })
        })
        .collect();
    Value::Array(questions).to_string()
}

#[derive(Clone)]
struct FakeLlmState {
    replies: Arc<Mutex<FakeReplies>>,
    calls: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<Value>>>,
}

/// Local server speaking the chat-completions protocol
pub struct FakeLlm {
    pub base_url: String,
    replies: Arc<Mutex<FakeReplies>>,
    calls: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<Value>>>,
}

impl FakeLlm {
    pub async fn spawn(replies: FakeReplies) -> Self {
        let state = FakeLlmState {
            replies: Arc::new(Mutex::new(replies)),
            calls: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(Mutex::new(Vec::new())),
        };

        let app = Router::new()
            .route("/chat/completions", post(chat_completions))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{}", addr),
            replies: state.replies,
            calls: state.calls,
            requests: state.requests,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<Value> {
        self.requests.lock().unwrap().clone()
    }

    pub fn set_replies(&self, replies: FakeReplies) {
        *self.replies.lock().unwrap() = replies;
    }

    pub fn service(&self) -> LLMService {
        LLMService::new("test-key".to_string(), Some(self.base_url.clone()))
    }
}

async fn chat_completions(
    State(state): State<FakeLlmState>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, (StatusCode, String)> {
    state.calls.fetch_add(1, Ordering::SeqCst);
    state.requests.lock().unwrap().push(body.clone());

    let replies = state.replies.lock().unwrap().clone();
    if let Some(status) = replies.fail_status {
        return Err((StatusCode::from_u16(status).unwrap(), "vendor exploded".to_string()));
    }

    let system = body["messages"][0]["content"].as_str().unwrap_or_default();
    let content = if system.contains("Summarize") {
        replies.summary
    } else if system.contains("flashcards") {
        replies.flashcards
    } else {
        replies.quiz
    };

    Ok(Json(json!({
        "choices": [{ "message": { "role": "assistant", "content": content } }]
    })))
}

/// OCR stand-in returning fixed text
pub struct FakeOcr {
    pub text: String,
    pub calls: AtomicUsize,
}

impl FakeOcr {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl OcrProvider for FakeOcr {
    fn name(&self) -> &str {
        "fake_ocr"
    }

    async fn extract_text(&self, _filename: &str, _data: &[u8]) -> anyhow::Result<OcrOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(OcrOutput {
            text: self.text.clone(),
            page_count: 1,
        })
    }
}

pub struct TestApp {
    pub server: TestServer,
    pub db: Database,
    pub llm: FakeLlm,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_replies(FakeReplies::default()).await
    }

    pub async fn with_replies(replies: FakeReplies) -> Self {
        let db = Database::new("sqlite::memory:").await.unwrap();
        let llm = FakeLlm::spawn(replies).await;
        let state = AppState::new(db.clone(), llm.service(), Arc::new(FakeOcr::new("ocr text")));
        let server = TestServer::new(create_app(state, 1024 * 1024)).unwrap();
        Self { server, db, llm }
    }

    pub async fn register(&self, email: &str) -> i64 {
        let response = self
            .server
            .post("/register")
            .json(&json!({ "email": email, "password": PASSWORD, "confirm_password": PASSWORD }))
            .await;
        response.assert_status_ok();
        response.json::<Value>()["id"].as_i64().unwrap()
    }

    /// Stores a document directly, skipping OCR
    pub async fn document(&self, owner_id: i64, summary: &str) -> uuid::Uuid {
        self.db
            .create_document("notes.pdf", "full text", summary, owner_id)
            .await
            .unwrap()
            .id
    }
}

/// Minimal PDF with the given number of blank pages
pub fn blank_pdf(pages: usize) -> Vec<u8> {
    use lopdf::{dictionary, Document, Object};

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let kids: Vec<Object> = (0..pages)
        .map(|_| {
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            });
            page_id.into()
        })
        .collect();

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => pages as i64,
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer).unwrap();
    buffer
}
