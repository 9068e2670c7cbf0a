use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{delete, get, post},
    Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;

use crate::{
    database::Database,
    document_service::DocumentService,
    errors::{ApiError, ErrorContext},
    flashcard_service::FlashcardService,
    llm_service::LLMService,
    models::*,
    ocr::OcrProvider,
    quiz_service::QuizService,
    user_service::UserService,
};

// Import logging macros
use crate::{log_api_error, log_api_start, log_api_success, log_api_warn};

#[derive(Clone)]
pub struct AppState {
    pub user_service: UserService,
    pub document_service: DocumentService,
    pub flashcard_service: FlashcardService,
    pub quiz_service: QuizService,
}

impl AppState {
    pub fn new(db: Database, llm_service: LLMService, ocr: Arc<dyn OcrProvider>) -> Self {
        Self {
            user_service: UserService::new(db.clone()),
            document_service: DocumentService::new(db.clone(), llm_service.clone(), ocr),
            flashcard_service: FlashcardService::new(db.clone(), llm_service.clone()),
            quiz_service: QuizService::new(db, llm_service),
        }
    }
}

/// `{"success": true, "data": ...}` envelope returned by the quiz routes
#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self { success: true, data }
    }
}

/// `{"success": true, ...}` with the payload's own fields beside the flag
#[derive(Serialize)]
pub struct Acknowledged<T> {
    pub success: bool,
    #[serde(flatten)]
    pub body: T,
}

impl<T> Acknowledged<T> {
    pub fn new(body: T) -> Self {
        Self { success: true, body }
    }
}

/// Body of every failed request; clients read `detail`
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub detail: String,
}

impl ErrorResponse {
    pub fn new(detail: String) -> Self {
        Self { success: false, detail }
    }
}

pub type ErrorReply = (StatusCode, Json<ErrorResponse>);
type ApiResult<T> = Result<Json<T>, ErrorReply>;

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

// User endpoints
pub async fn register(State(state): State<AppState>, Json(request): Json<RegisterRequest>) -> ApiResult<User> {
    log_api_start!("register");

    match state.user_service.register(request).await {
        Ok(user) => {
            log_api_success!("register", user_id = user.id, "user registered");
            Ok(Json(user))
        }
        Err(e) => Err(e.to_response_with_context(ErrorContext::new("register", "user"))),
    }
}

pub async fn login(State(state): State<AppState>, Json(request): Json<LoginRequest>) -> ApiResult<LoginResponse> {
    log_api_start!("login");

    state
        .user_service
        .login(request)
        .await
        .map(Json)
        .map_err(|e| e.to_response_with_context(ErrorContext::new("login", "user")))
}

// Document endpoints
pub async fn upload_document(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
    mut multipart: Multipart,
) -> ApiResult<UploadResult> {
    log_api_start!("upload_document", user_id = query.user_id);
    let context = || ErrorContext::new("upload_document", "document").with_id(&query.user_id.to_string());

    let mut upload: Option<(String, Vec<u8>)> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e).to_response_with_context(context()))?
    {
        if field.name() == Some("file") {
            let filename = field.file_name().unwrap_or("document.pdf").to_string();
            let bytes = field
                .bytes()
                .await
                .map_err(|e| multipart_error(e).to_response_with_context(context()))?;
            upload = Some((filename, bytes.to_vec()));
            break;
        }
    }

    let Some((filename, data)) = upload else {
        log_api_warn!("upload_document", user_id = query.user_id, "no file field in request");
        return Err(ApiError::BadRequest("No file uploaded".to_string()).to_response_with_context(context()));
    };

    match state.document_service.upload(query.user_id, &filename, &data).await {
        Ok(result) => {
            log_api_success!("upload_document", document_id = result.document_id, "document processed");
            Ok(Json(result))
        }
        Err(e) => {
            log_api_error!("upload_document", user_id = query.user_id, error = e, "document processing failed");
            Err(e.to_response_with_context(context()))
        }
    }
}

fn multipart_error(error: MultipartError) -> ApiError {
    if error.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(error.body_text())
    } else {
        ApiError::BadRequest(format!("Multipart error: {}", error.body_text()))
    }
}

pub async fn list_documents(State(state): State<AppState>, Query(query): Query<UserQuery>) -> ApiResult<Vec<Document>> {
    log_api_start!("list_documents", user_id = query.user_id);

    match state.document_service.list_documents(query.user_id).await {
        Ok(documents) => {
            log_api_success!("list_documents", count = documents.len(), "documents listed");
            Ok(Json(documents))
        }
        Err(e) => Err(e.to_response_with_context(ErrorContext::new("list_documents", "document"))),
    }
}

pub async fn get_document(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<OptionalUserQuery>,
) -> ApiResult<Document> {
    log_api_start!("get_document", document_id = id);

    state
        .document_service
        .get_document(id, query.user_id)
        .await
        .map(Json)
        .map_err(|e| e.to_response_with_context(ErrorContext::new("get_document", "document").with_id(&id.to_string())))
}

// Flashcard endpoints
pub async fn get_document_flashcards(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Vec<Flashcard>> {
    state
        .flashcard_service
        .list(id)
        .await
        .map(Json)
        .map_err(|e| {
            e.to_response_with_context(ErrorContext::new("get_document_flashcards", "document").with_id(&id.to_string()))
        })
}

pub async fn generate_flashcards(
    State(state): State<AppState>,
    Json(request): Json<FlashcardGenerateRequest>,
) -> ApiResult<FlashcardSet> {
    log_api_start!("generate_flashcards", document_id = request.document_id);

    match state
        .flashcard_service
        .generate(request.document_id, request.num_questions, request.force_new, request.user_id)
        .await
    {
        Ok(set) => {
            log_api_success!("generate_flashcards", count = set.count, "flashcards ready");
            Ok(Json(set))
        }
        Err(e) => Err(e.to_response_with_context(
            ErrorContext::new("generate_flashcards", "document").with_id(&request.document_id.to_string()),
        )),
    }
}

/// Bare list of cards for the newest document
pub async fn latest_flashcards(
    State(state): State<AppState>,
    Query(query): Query<LatestFlashcardQuery>,
) -> ApiResult<Vec<GeneratedFlashcard>> {
    log_api_start!("latest_flashcards");

    state
        .flashcard_service
        .generate_for_latest(query.questions, query.user_id)
        .await
        .map(|set| Json(set.flashcards))
        .map_err(|e| {
            e.to_response_with_context(
                ErrorContext::new("latest_flashcards", "document").with_user_message("No document found"),
            )
        })
}

// Quiz endpoints
pub async fn generate_quiz(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
    Json(request): Json<QuizGenerateRequest>,
) -> ApiResult<Acknowledged<GeneratedQuiz>> {
    log_api_start!("generate_quiz", document_id = request.document_id);
    let document_id = request.document_id;

    match state.quiz_service.generate(query.user_id, request).await {
        Ok(generated) => {
            log_api_success!("generate_quiz", quiz_id = generated.quiz_id, "quiz generated");
            Ok(Json(Acknowledged::new(generated)))
        }
        Err(e) => Err(e.to_response_with_context(
            ErrorContext::new("generate_quiz", "document").with_id(&document_id.to_string()),
        )),
    }
}

pub async fn list_quizzes(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> ApiResult<ApiResponse<Vec<QuizDetail>>> {
    log_api_start!("list_quizzes", user_id = query.user_id);

    match state.quiz_service.list(query.user_id).await {
        Ok(quizzes) => {
            log_api_success!("list_quizzes", count = quizzes.len(), "quizzes listed");
            Ok(Json(ApiResponse::success(quizzes)))
        }
        Err(e) => Err(e.to_response_with_context(ErrorContext::new("list_quizzes", "quiz"))),
    }
}

pub async fn get_quiz(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<UserQuery>,
) -> ApiResult<ApiResponse<QuizDetail>> {
    log_api_start!("get_quiz", quiz_id = id);

    state
        .quiz_service
        .get(id, query.user_id)
        .await
        .map(|quiz| Json(ApiResponse::success(quiz)))
        .map_err(|e| e.to_response_with_context(ErrorContext::new("get_quiz", "quiz").with_id(&id.to_string())))
}

pub async fn retry_quiz(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<UserQuery>,
) -> ApiResult<ApiResponse<RetryQuiz>> {
    state
        .quiz_service
        .retry(id, query.user_id)
        .await
        .map(|quiz| Json(ApiResponse::success(quiz)))
        .map_err(|e| e.to_response_with_context(ErrorContext::new("retry_quiz", "quiz").with_id(&id.to_string())))
}

pub async fn quiz_result(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<UserQuery>,
) -> ApiResult<ApiResponse<QuizResult>> {
    log_api_start!("quiz_result", quiz_id = id);

    state
        .quiz_service
        .result(id, query.user_id)
        .await
        .map(|result| Json(ApiResponse::success(result)))
        .map_err(|e| {
            e.to_response_with_context(ErrorContext::new("quiz_result", "quiz result").with_id(&id.to_string()))
        })
}

pub async fn submit_quiz(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
    Json(request): Json<SubmitAnswersRequest>,
) -> ApiResult<Acknowledged<QuizSubmission>> {
    log_api_start!("submit_quiz", quiz_id = request.quiz_id);
    let quiz_id = request.quiz_id;

    match state.quiz_service.submit(query.user_id, request).await {
        Ok(submission) => {
            log_api_success!("submit_quiz", attempt_id = submission.attempt_id, "quiz graded");
            Ok(Json(Acknowledged::new(submission)))
        }
        Err(e) => Err(e.to_response_with_context(ErrorContext::new("submit_quiz", "quiz").with_id(&quiz_id.to_string()))),
    }
}

pub async fn quiz_history(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> ApiResult<ApiResponse<Vec<AttemptHistoryEntry>>> {
    log_api_start!("quiz_history", user_id = query.user_id);

    match state.quiz_service.history(query.user_id).await {
        Ok(entries) => {
            log_api_success!("quiz_history", count = entries.len(), "history loaded");
            Ok(Json(ApiResponse::success(entries)))
        }
        Err(e) => Err(e.to_response_with_context(ErrorContext::new("quiz_history", "quiz attempt"))),
    }
}

pub async fn get_attempt(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<UserQuery>,
) -> ApiResult<ApiResponse<AttemptDetail>> {
    log_api_start!("get_attempt", attempt_id = id);

    state
        .quiz_service
        .get_attempt(id, query.user_id)
        .await
        .map(|attempt| Json(ApiResponse::success(attempt)))
        .map_err(|e| {
            e.to_response_with_context(ErrorContext::new("get_attempt", "quiz attempt").with_id(&id.to_string()))
        })
}

pub async fn delete_attempt(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<UserQuery>,
) -> ApiResult<Acknowledged<DeletedCount>> {
    match state.quiz_service.delete_attempt(id, query.user_id).await {
        Ok(()) => {
            log_api_success!("delete_attempt", attempt_id = id, "attempt deleted");
            Ok(Json(Acknowledged::new(DeletedCount {
                message: "Quiz attempt deleted successfully".to_string(),
                deleted: 1,
            })))
        }
        Err(e) => Err(e.to_response_with_context(
            ErrorContext::new("delete_attempt", "quiz attempt").with_id(&id.to_string()),
        )),
    }
}

pub async fn clear_attempts(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> ApiResult<Acknowledged<DeletedCount>> {
    log_api_start!("clear_attempts", user_id = query.user_id);

    state
        .quiz_service
        .clear_attempts(query.user_id)
        .await
        .map(|deleted| Json(Acknowledged::new(deleted)))
        .map_err(|e| e.to_response_with_context(ErrorContext::new("clear_attempts", "quiz attempt")))
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        // User routes
        .route("/register", post(register))
        .route("/login", post(login))
        // Document routes
        .route("/upload", post(upload_document))
        .route("/documents", get(list_documents))
        .route("/document/:id", get(get_document))
        .route("/document/:id/flashcards", get(get_document_flashcards))
        // Flashcard routes
        .route("/flashcards/generate", post(generate_flashcards))
        .route("/flashcard", get(latest_flashcards))
        // Quiz routes
        .route("/generate-quiz", post(generate_quiz))
        .route("/quizzes", get(list_quizzes))
        .route("/quiz/:id", get(get_quiz))
        .route("/quiz/:id/retry", get(retry_quiz))
        .route("/quiz/:id/result", get(quiz_result))
        .route("/submit-quiz", post(submit_quiz))
        // Attempt routes
        .route("/quiz-history", get(quiz_history))
        .route("/quiz-attempt/:id", get(get_attempt).delete(delete_attempt))
        .route("/quiz-attempts", delete(clear_attempts))
        .with_state(state)
}

/// Router with the upload limit, request tracing and permissive CORS applied
pub fn create_app(state: AppState, max_upload_bytes: usize) -> Router {
    create_router(state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .layer(DefaultBodyLimit::max(max_upload_bytes)),
    )
}
