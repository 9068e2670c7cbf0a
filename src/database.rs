use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::time::Instant;
use uuid::Uuid;

use crate::log_db_operation;
use crate::models::*;

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);

        // An in-memory database lives only as long as its connections, so keep exactly one
        let pool = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new().connect_with(options).await?
        };

        let db = Database { pool };
        db.migrate().await?;
        log_db_operation!(info, "migrate", "database initialized");
        Ok(db)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                filename TEXT NOT NULL,
                full_text TEXT NOT NULL,
                summary TEXT NOT NULL,
                owner_id INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (owner_id) REFERENCES users(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS quizzes (
                id TEXT PRIMARY KEY,
                user_id INTEGER NOT NULL,
                document_id TEXT NOT NULL,
                difficulty TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
                FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS quiz_questions (
                id TEXT PRIMARY KEY,
                quiz_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                question TEXT NOT NULL,
                option_a TEXT NOT NULL,
                option_b TEXT NOT NULL,
                option_c TEXT NOT NULL,
                option_d TEXT NOT NULL,
                correct_answer TEXT NOT NULL,
                explanation TEXT NOT NULL DEFAULT '',
                FOREIGN KEY (quiz_id) REFERENCES quizzes(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS quiz_attempts (
                id TEXT PRIMARY KEY,
                user_id INTEGER NOT NULL,
                quiz_id TEXT NOT NULL,
                score INTEGER NOT NULL,
                total_questions INTEGER NOT NULL,
                answers TEXT NOT NULL,
                completed_at TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
                FOREIGN KEY (quiz_id) REFERENCES quizzes(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS flashcards (
                id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                question TEXT NOT NULL,
                answer TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_owner ON documents(owner_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_quiz_questions_quiz ON quiz_questions(quiz_id, position)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_quiz_attempts_user ON quiz_attempts(user_id, completed_at)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_flashcards_document ON flashcards(document_id, position)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // User operations
    pub async fn create_user(&self, email: &str, password_hash: &str) -> Result<User> {
        let now = Utc::now();

        let result = sqlx::query("INSERT INTO users (email, password_hash, created_at) VALUES (?1, ?2, ?3)")
            .bind(email)
            .bind(password_hash)
            .bind(timestamp(&now))
            .execute(&self.pool)
            .await?;

        Ok(User {
            id: result.last_insert_rowid(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            created_at: now,
        })
    }

    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE email = ?1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_user).transpose()
    }

    pub async fn get_user(&self, id: i64) -> Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_user).transpose()
    }

    // Document operations
    pub async fn create_document(
        &self,
        filename: &str,
        full_text: &str,
        summary: &str,
        owner_id: i64,
    ) -> Result<Document> {
        let document = Document {
            id: Uuid::new_v4(),
            filename: filename.to_string(),
            full_text: full_text.to_string(),
            summary: summary.to_string(),
            owner_id,
            created_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO documents (id, filename, full_text, summary, owner_id, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(document.id.to_string())
        .bind(&document.filename)
        .bind(&document.full_text)
        .bind(&document.summary)
        .bind(document.owner_id)
        .bind(timestamp(&document.created_at))
        .execute(&self.pool)
        .await?;

        Ok(document)
    }

    pub async fn get_document(&self, id: Uuid) -> Result<Option<Document>> {
        let started = Instant::now();
        let row = sqlx::query("SELECT * FROM documents WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        log_db_operation!(
            debug,
            "get_document",
            document_id = id,
            duration_ms = started.elapsed().as_millis() as u64
        );
        row.as_ref().map(row_to_document).transpose()
    }

    pub async fn list_documents_by_owner(&self, owner_id: i64) -> Result<Vec<Document>> {
        let rows = sqlx::query("SELECT * FROM documents WHERE owner_id = ?1 ORDER BY created_at DESC, rowid DESC")
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_document).collect()
    }

    /// Most recently uploaded document, optionally restricted to one owner
    pub async fn latest_document(&self, owner_id: Option<i64>) -> Result<Option<Document>> {
        let row = match owner_id {
            Some(owner_id) => {
                sqlx::query(
                    "SELECT * FROM documents WHERE owner_id = ?1 ORDER BY created_at DESC, rowid DESC LIMIT 1",
                )
                .bind(owner_id)
                .fetch_optional(&self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT * FROM documents ORDER BY created_at DESC, rowid DESC LIMIT 1")
                    .fetch_optional(&self.pool)
                    .await?
            }
        };

        row.as_ref().map(row_to_document).transpose()
    }

    // Quiz operations
    pub async fn create_quiz(
        &self,
        user_id: i64,
        document_id: Uuid,
        difficulty: Difficulty,
        questions: &[GeneratedQuestion],
    ) -> Result<(Quiz, Vec<QuizQuestion>)> {
        let quiz = Quiz {
            id: Uuid::new_v4(),
            user_id,
            document_id,
            difficulty,
            created_at: Utc::now(),
        };

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO quizzes (id, user_id, document_id, difficulty, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(quiz.id.to_string())
        .bind(quiz.user_id)
        .bind(quiz.document_id.to_string())
        .bind(quiz.difficulty.as_str())
        .bind(timestamp(&quiz.created_at))
        .execute(&mut *tx)
        .await?;

        let mut stored = Vec::with_capacity(questions.len());
        for (position, generated) in questions.iter().enumerate() {
            let question = QuizQuestion {
                id: Uuid::new_v4(),
                quiz_id: quiz.id,
                question: generated.question.clone(),
                option_a: generated.option_a.clone(),
                option_b: generated.option_b.clone(),
                option_c: generated.option_c.clone(),
                option_d: generated.option_d.clone(),
                correct_answer: generated.correct_answer.clone(),
                explanation: generated.explanation.clone(),
            };

            sqlx::query(
                r#"
                INSERT INTO quiz_questions (id, quiz_id, position, question, option_a, option_b,
                                            option_c, option_d, correct_answer, explanation)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                "#,
            )
            .bind(question.id.to_string())
            .bind(question.quiz_id.to_string())
            .bind(position as i64)
            .bind(&question.question)
            .bind(&question.option_a)
            .bind(&question.option_b)
            .bind(&question.option_c)
            .bind(&question.option_d)
            .bind(&question.correct_answer)
            .bind(&question.explanation)
            .execute(&mut *tx)
            .await?;

            stored.push(question);
        }

        tx.commit().await?;
        Ok((quiz, stored))
    }

    pub async fn get_quiz(&self, id: Uuid) -> Result<Option<Quiz>> {
        let row = sqlx::query("SELECT * FROM quizzes WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_quiz).transpose()
    }

    pub async fn list_quizzes_by_user(&self, user_id: i64) -> Result<Vec<Quiz>> {
        let started = Instant::now();
        let rows = sqlx::query("SELECT * FROM quizzes WHERE user_id = ?1 ORDER BY created_at DESC, rowid DESC")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;

        log_db_operation!(
            debug,
            "list_quizzes_by_user",
            count = rows.len(),
            duration_ms = started.elapsed().as_millis() as u64
        );
        rows.iter().map(row_to_quiz).collect()
    }

    pub async fn get_quiz_questions(&self, quiz_id: Uuid) -> Result<Vec<QuizQuestion>> {
        let rows = sqlx::query("SELECT * FROM quiz_questions WHERE quiz_id = ?1 ORDER BY position ASC")
            .bind(quiz_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_question).collect()
    }

    // Attempt operations
    pub async fn create_attempt(
        &self,
        user_id: i64,
        quiz_id: Uuid,
        score: i64,
        total_questions: i64,
        answers: &AnswerMap,
    ) -> Result<QuizAttempt> {
        let attempt = QuizAttempt {
            id: Uuid::new_v4(),
            user_id,
            quiz_id,
            score,
            total_questions,
            answers: answers.clone(),
            completed_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO quiz_attempts (id, user_id, quiz_id, score, total_questions, answers, completed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(attempt.id.to_string())
        .bind(attempt.user_id)
        .bind(attempt.quiz_id.to_string())
        .bind(attempt.score)
        .bind(attempt.total_questions)
        .bind(serde_json::to_string(&attempt.answers)?)
        .bind(timestamp(&attempt.completed_at))
        .execute(&self.pool)
        .await?;

        Ok(attempt)
    }

    pub async fn get_attempt(&self, id: Uuid) -> Result<Option<QuizAttempt>> {
        let row = sqlx::query("SELECT * FROM quiz_attempts WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_attempt).transpose()
    }

    pub async fn list_attempts_by_user(&self, user_id: i64, limit: i64) -> Result<Vec<QuizAttempt>> {
        let started = Instant::now();
        let rows = sqlx::query(
            "SELECT * FROM quiz_attempts WHERE user_id = ?1 ORDER BY completed_at DESC, rowid DESC LIMIT ?2",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        log_db_operation!(
            debug,
            "list_attempts_by_user",
            count = rows.len(),
            duration_ms = started.elapsed().as_millis() as u64
        );
        rows.iter().map(row_to_attempt).collect()
    }

    pub async fn latest_attempt_for_quiz(&self, user_id: i64, quiz_id: Uuid) -> Result<Option<QuizAttempt>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM quiz_attempts
            WHERE user_id = ?1 AND quiz_id = ?2
            ORDER BY completed_at DESC, rowid DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(quiz_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_attempt).transpose()
    }

    /// Returns whether a row belonging to the user was removed
    pub async fn delete_attempt(&self, id: Uuid, user_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM quiz_attempts WHERE id = ?1 AND user_id = ?2")
            .bind(id.to_string())
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_attempts_by_user(&self, user_id: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM quiz_attempts WHERE user_id = ?1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    // Flashcard operations
    pub async fn replace_flashcards(
        &self,
        document_id: Uuid,
        cards: &[GeneratedFlashcard],
    ) -> Result<Vec<Flashcard>> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM flashcards WHERE document_id = ?1")
            .bind(document_id.to_string())
            .execute(&mut *tx)
            .await?;

        let mut stored = Vec::with_capacity(cards.len());
        for (position, card) in cards.iter().enumerate() {
            let flashcard = Flashcard {
                id: Uuid::new_v4(),
                document_id,
                question: card.question.clone(),
                answer: card.answer.clone(),
                created_at: now,
            };

            sqlx::query(
                r#"
                INSERT INTO flashcards (id, document_id, position, question, answer, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )
            .bind(flashcard.id.to_string())
            .bind(document_id.to_string())
            .bind(position as i64)
            .bind(&flashcard.question)
            .bind(&flashcard.answer)
            .bind(timestamp(&flashcard.created_at))
            .execute(&mut *tx)
            .await?;

            stored.push(flashcard);
        }

        tx.commit().await?;
        Ok(stored)
    }

    pub async fn list_flashcards(&self, document_id: Uuid) -> Result<Vec<Flashcard>> {
        let rows = sqlx::query("SELECT * FROM flashcards WHERE document_id = ?1 ORDER BY position ASC")
            .bind(document_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_flashcard).collect()
    }
}

/// Fixed-width UTC form so text ordering matches time ordering
fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("invalid timestamp '{}'", raw))?
        .with_timezone(&Utc))
}

fn parse_uuid(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).with_context(|| format!("invalid uuid '{}'", raw))
}

fn row_to_user(row: &SqliteRow) -> Result<User> {
    Ok(User {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        created_at: parse_timestamp(row.try_get("created_at")?)?,
    })
}

fn row_to_document(row: &SqliteRow) -> Result<Document> {
    Ok(Document {
        id: parse_uuid(row.try_get("id")?)?,
        filename: row.try_get("filename")?,
        full_text: row.try_get("full_text")?,
        summary: row.try_get("summary")?,
        owner_id: row.try_get("owner_id")?,
        created_at: parse_timestamp(row.try_get("created_at")?)?,
    })
}

fn row_to_quiz(row: &SqliteRow) -> Result<Quiz> {
    let difficulty: &str = row.try_get("difficulty")?;
    Ok(Quiz {
        id: parse_uuid(row.try_get("id")?)?,
        user_id: row.try_get("user_id")?,
        document_id: parse_uuid(row.try_get("document_id")?)?,
        difficulty: difficulty.parse().map_err(|e: String| anyhow!(e))?,
        created_at: parse_timestamp(row.try_get("created_at")?)?,
    })
}

fn row_to_question(row: &SqliteRow) -> Result<QuizQuestion> {
    Ok(QuizQuestion {
        id: parse_uuid(row.try_get("id")?)?,
        quiz_id: parse_uuid(row.try_get("quiz_id")?)?,
        question: row.try_get("question")?,
        option_a: row.try_get("option_a")?,
        option_b: row.try_get("option_b")?,
        option_c: row.try_get("option_c")?,
        option_d: row.try_get("option_d")?,
        correct_answer: row.try_get("correct_answer")?,
        explanation: row.try_get("explanation")?,
    })
}

fn row_to_attempt(row: &SqliteRow) -> Result<QuizAttempt> {
    let answers: &str = row.try_get("answers")?;
    Ok(QuizAttempt {
        id: parse_uuid(row.try_get("id")?)?,
        user_id: row.try_get("user_id")?,
        quiz_id: parse_uuid(row.try_get("quiz_id")?)?,
        score: row.try_get("score")?,
        total_questions: row.try_get("total_questions")?,
        answers: serde_json::from_str(answers).context("invalid stored answers")?,
        completed_at: parse_timestamp(row.try_get("completed_at")?)?,
    })
}

fn row_to_flashcard(row: &SqliteRow) -> Result<Flashcard> {
    Ok(Flashcard {
        id: parse_uuid(row.try_get("id")?)?,
        document_id: parse_uuid(row.try_get("document_id")?)?,
        question: row.try_get("question")?,
        answer: row.try_get("answer")?,
        created_at: parse_timestamp(row.try_get("created_at")?)?,
    })
}
