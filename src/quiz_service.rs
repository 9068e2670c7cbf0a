use std::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use crate::database::Database;
use crate::errors::ApiError;
use crate::llm_service::LLMService;
use crate::models::*;
use crate::{log_service_start, log_service_success};

pub const MAX_QUIZ_QUESTIONS: i64 = 20;
pub const HISTORY_LIMIT: i64 = 50;

/// Quiz generation, grading and attempt history
#[derive(Clone)]
pub struct QuizService {
    db: Database,
    llm: LLMService,
}

impl QuizService {
    pub fn new(db: Database, llm: LLMService) -> Self {
        Self { db, llm }
    }

    pub async fn generate(&self, user_id: i64, request: QuizGenerateRequest) -> Result<GeneratedQuiz, ApiError> {
        let started = Instant::now();
        log_service_start!("quiz_service", "generate", document_id = request.document_id);

        let difficulty: Difficulty = request
            .difficulty
            .trim()
            .to_lowercase()
            .parse()
            .map_err(ApiError::ValidationError)?;

        if !(1..=MAX_QUIZ_QUESTIONS).contains(&request.question_count) {
            return Err(ApiError::ValidationError(format!(
                "Question count must be between 1 and {}",
                MAX_QUIZ_QUESTIONS
            )));
        }
        let count = request.question_count as usize;

        let document = match self.db.get_document(request.document_id).await? {
            Some(document) if document.owner_id == user_id => document,
            _ => {
                return Err(ApiError::NotFound(format!(
                    "Document {} not found",
                    request.document_id
                )));
            }
        };

        let source = if document.summary.trim().is_empty() {
            &document.full_text
        } else {
            &document.summary
        };

        let generated = self
            .llm
            .generate_quiz(source, difficulty, count)
            .await
            .map_err(ApiError::from_llm)?;

        if generated.is_empty() {
            return Err(ApiError::GenerationFailed(
                "No questions could be parsed from the AI response".to_string(),
            ));
        }

        let (quiz, questions) = self
            .db
            .create_quiz(user_id, document.id, difficulty, &generated)
            .await?;

        log_service_success!(
            "quiz_service",
            "generate",
            quiz_id = quiz.id,
            duration_ms = started.elapsed().as_millis() as u64
        );

        Ok(GeneratedQuiz {
            quiz_id: quiz.id,
            question_count: questions.len(),
            quiz: QuizDetail {
                quiz,
                document: DocumentRef::from(&document),
                questions,
            },
        })
    }

    pub async fn list(&self, user_id: i64) -> Result<Vec<QuizDetail>, ApiError> {
        let quizzes = self.db.list_quizzes_by_user(user_id).await?;

        let mut details = Vec::with_capacity(quizzes.len());
        for quiz in quizzes {
            details.push(self.detail(quiz).await?);
        }
        Ok(details)
    }

    pub async fn get(&self, quiz_id: Uuid, user_id: i64) -> Result<QuizDetail, ApiError> {
        let quiz = self.owned_quiz(quiz_id, user_id).await?;
        self.detail(quiz).await
    }

    pub async fn submit(&self, user_id: i64, request: SubmitAnswersRequest) -> Result<QuizSubmission, ApiError> {
        let quiz = self.owned_quiz(request.quiz_id, user_id).await?;
        let questions = self.db.get_quiz_questions(quiz.id).await?;

        let (score, results) = grade(&questions, &request.answers);
        let total = questions.len() as i64;

        let attempt = self
            .db
            .create_attempt(user_id, quiz.id, score, total, &request.answers)
            .await?;

        info!(
            quiz_id = %quiz.id,
            attempt_id = %attempt.id,
            score,
            total,
            "Quiz submitted"
        );

        Ok(QuizSubmission {
            score,
            total,
            percentage: percentage(score, total),
            results,
            attempt_id: attempt.id,
        })
    }

    pub async fn history(&self, user_id: i64) -> Result<Vec<AttemptHistoryEntry>, ApiError> {
        let attempts = self.db.list_attempts_by_user(user_id, HISTORY_LIMIT).await?;

        let mut entries = Vec::with_capacity(attempts.len());
        for attempt in attempts {
            let Some(quiz) = self.db.get_quiz(attempt.quiz_id).await? else {
                debug!(attempt_id = %attempt.id, "Skipping attempt whose quiz no longer exists");
                continue;
            };
            let detail = self.detail(quiz).await?;

            entries.push(AttemptHistoryEntry {
                id: attempt.id,
                quiz_id: attempt.quiz_id,
                score: attempt.score,
                total_questions: attempt.total_questions,
                answered_count: answered_count(&attempt.answers),
                completed_at: attempt.completed_at,
                quiz: HistoryQuiz {
                    id: detail.quiz.id,
                    document: detail.document,
                    questions: detail
                        .questions
                        .into_iter()
                        .map(|q| QuestionKey {
                            id: q.id,
                            question: q.question,
                            correct_answer: q.correct_answer,
                        })
                        .collect(),
                },
                answers: attempt.answers,
            });
        }
        Ok(entries)
    }

    pub async fn get_attempt(&self, attempt_id: Uuid, user_id: i64) -> Result<AttemptDetail, ApiError> {
        let attempt = match self.db.get_attempt(attempt_id).await? {
            Some(attempt) if attempt.user_id == user_id => attempt,
            _ => return Err(ApiError::NotFound(format!("Attempt {} not found", attempt_id))),
        };

        let quiz = self
            .db
            .get_quiz(attempt.quiz_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Quiz {} not found", attempt.quiz_id)))?;

        Ok(AttemptDetail {
            quiz: self.detail(quiz).await?,
            attempt,
        })
    }

    pub async fn delete_attempt(&self, attempt_id: Uuid, user_id: i64) -> Result<(), ApiError> {
        if !self.db.delete_attempt(attempt_id, user_id).await? {
            return Err(ApiError::NotFound(format!("Attempt {} not found", attempt_id)));
        }
        info!(attempt_id = %attempt_id, user_id, "Quiz attempt deleted");
        Ok(())
    }

    pub async fn clear_attempts(&self, user_id: i64) -> Result<DeletedCount, ApiError> {
        let deleted = self.db.delete_attempts_by_user(user_id).await?;
        info!(user_id, deleted, "Quiz history cleared");
        Ok(DeletedCount {
            message: "All quiz attempts deleted successfully".to_string(),
            deleted,
        })
    }

    /// Breakdown of the user's most recent attempt at a quiz
    pub async fn result(&self, quiz_id: Uuid, user_id: i64) -> Result<QuizResult, ApiError> {
        let quiz = self.owned_quiz(quiz_id, user_id).await?;

        let attempt = self
            .db
            .latest_attempt_for_quiz(user_id, quiz.id)
            .await?
            .ok_or_else(|| ApiError::NotFound("No attempt found for this quiz".to_string()))?;

        let detail = self.detail(quiz).await?;
        let questions = detail
            .questions
            .into_iter()
            .map(|q| {
                let user_answer = attempt.answers.get(&q.id.to_string()).cloned().unwrap_or_default();
                ResultQuestion {
                    is_correct: answers_match(&user_answer, &q.correct_answer),
                    id: q.id,
                    question: q.question,
                    option_a: q.option_a,
                    option_b: q.option_b,
                    option_c: q.option_c,
                    option_d: q.option_d,
                    correct_answer: q.correct_answer,
                    user_answer,
                    explanation: q.explanation,
                }
            })
            .collect();

        Ok(QuizResult {
            quiz_id: detail.quiz.id,
            document: detail.document,
            score: attempt.score,
            total: attempt.total_questions,
            answered_count: answered_count(&attempt.answers),
            questions,
        })
    }

    pub async fn retry(&self, quiz_id: Uuid, user_id: i64) -> Result<RetryQuiz, ApiError> {
        let quiz = self.owned_quiz(quiz_id, user_id).await?;
        let detail = self.detail(quiz).await?;

        Ok(RetryQuiz {
            id: detail.quiz.id,
            document: detail.document,
            questions: detail
                .questions
                .into_iter()
                .map(|q| RetryQuestion {
                    id: q.id,
                    question: q.question,
                    option_a: q.option_a,
                    option_b: q.option_b,
                    option_c: q.option_c,
                    option_d: q.option_d,
                    correct_answer: q.correct_answer,
                })
                .collect(),
        })
    }

    async fn owned_quiz(&self, quiz_id: Uuid, user_id: i64) -> Result<Quiz, ApiError> {
        match self.db.get_quiz(quiz_id).await? {
            Some(quiz) if quiz.user_id == user_id => Ok(quiz),
            _ => Err(ApiError::NotFound(format!("Quiz {} not found", quiz_id))),
        }
    }

    async fn detail(&self, quiz: Quiz) -> Result<QuizDetail, ApiError> {
        let document = self
            .db
            .get_document(quiz.document_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Document {} not found", quiz.document_id)))?;
        let questions = self.db.get_quiz_questions(quiz.id).await?;

        Ok(QuizDetail {
            quiz,
            document: DocumentRef::from(&document),
            questions,
        })
    }
}

/// Case-insensitive letter comparison; a blank answer is never correct
pub fn answers_match(user_answer: &str, correct_answer: &str) -> bool {
    let user_answer = user_answer.trim();
    !user_answer.is_empty() && user_answer.eq_ignore_ascii_case(correct_answer.trim())
}

/// Score answers against the stored questions, in question order
pub fn grade(questions: &[QuizQuestion], answers: &AnswerMap) -> (i64, Vec<QuestionResult>) {
    let results: Vec<QuestionResult> = questions
        .iter()
        .map(|q| {
            let user_answer = answers.get(&q.id.to_string()).cloned().unwrap_or_default();
            QuestionResult {
                question_id: q.id,
                question: q.question.clone(),
                is_correct: answers_match(&user_answer, &q.correct_answer),
                user_answer,
                correct_answer: q.correct_answer.clone(),
                explanation: q.explanation.clone(),
            }
        })
        .collect();

    let score = results.iter().filter(|r| r.is_correct).count() as i64;
    (score, results)
}

/// Percentage rounded to two decimals; zero when there is nothing to score
pub fn percentage(score: i64, total: i64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (score as f64 / total as f64 * 10_000.0).round() / 100.0
}

fn answered_count(answers: &AnswerMap) -> usize {
    answers.values().filter(|value| !value.trim().is_empty()).count()
}
