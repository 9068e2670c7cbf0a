mod common;

use note2brain::llm_providers::ProviderError;
use note2brain::{ApiError, Difficulty};

use common::{quiz_json, FakeLlm, FakeReplies};

#[tokio::test]
async fn test_summarize_sends_text_as_user_message() {
    let llm = FakeLlm::spawn(FakeReplies::default()).await;
    let service = llm.service();

    let summary = service.summarize("Mitochondria make ATP.").await.unwrap();
    assert_eq!(summary, "Photosynthesis turns light into chemical energy.");

    let request = &llm.requests()[0];
    assert_eq!(request["model"], service.model_name());
    assert_eq!(request["messages"][0]["role"], "system");
    assert_eq!(request["messages"][1]["role"], "user");
    assert_eq!(request["messages"][1]["content"], "Mitochondria make ATP.");
    // Summaries use the vendor's default sampling
    assert!(request.get("temperature").is_none());
}

#[tokio::test]
async fn test_quiz_answers_are_normalized_and_truncated() {
    let llm = FakeLlm::spawn(FakeReplies {
        quiz: quiz_json(5),
        ..FakeReplies::default()
    })
    .await;

    let questions = llm
        .service()
        .generate_quiz("Cell biology summary", Difficulty::Easy, 4)
        .await
        .unwrap();

    assert_eq!(questions.len(), 4);
    let answers: Vec<&str> = questions.iter().map(|q| q.correct_answer.as_str()).collect();
    assert_eq!(answers, ["A", "B", "C", "D"]);
    assert_eq!(questions[0].option_a, "alpha");
    assert_eq!(questions[3].explanation, "Reason 4");

    let prompt = llm.requests()[0]["messages"][1]["content"].as_str().unwrap().to_string();
    assert!(prompt.contains("Difficulty: easy"));
    assert!(prompt.contains("Cell biology summary"));
}

#[tokio::test]
async fn test_quiz_falls_back_to_text_parser() {
    let reply = "1. Which organelle makes ATP?\n\
                 A) Nucleus\n\
                 B) Mitochondrion\n\
                 C) Ribosome\n\
                 D) Golgi body\n\
                 Answer: B\n\
                 Explanation: It runs cellular respiration.";
    let llm = FakeLlm::spawn(FakeReplies {
        quiz: reply.to_string(),
        ..FakeReplies::default()
    })
    .await;

    let questions = llm
        .service()
        .generate_quiz("summary", Difficulty::Medium, 3)
        .await
        .unwrap();

    assert_eq!(questions.len(), 1);
    assert_eq!(questions[0].option_b, "Mitochondrion");
    assert_eq!(questions[0].correct_answer, "B");
}

#[tokio::test]
async fn test_vendor_status_is_typed() {
    let llm = FakeLlm::spawn(FakeReplies {
        fail_status: Some(429),
        ..FakeReplies::default()
    })
    .await;

    let err = llm.service().summarize("text").await.unwrap_err();
    match err.downcast_ref::<ProviderError>() {
        Some(ProviderError::Status { status, .. }) => assert_eq!(*status, 429),
        other => panic!("expected a status error, got {:?}", other),
    }

    assert!(matches!(ApiError::from_llm(err), ApiError::LLMError(_)));
}

#[tokio::test]
async fn test_flashcards_with_unusable_reply() {
    let llm = FakeLlm::spawn(FakeReplies {
        flashcards: "{\"question\": \"not an array\"}".to_string(),
        ..FakeReplies::default()
    })
    .await;

    let err = llm.service().generate_flashcards("summary", 3).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ProviderError>(),
        Some(ProviderError::InvalidResponse { .. })
    ));
}
