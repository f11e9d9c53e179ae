//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `QuizStore` port from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.
//!
//! Every port method that writes more than one row runs inside a single
//! transaction; a dropped transaction rolls back.

use adaptive_quiz_core::domain::{
    self, Attempt, AttemptId, BlockElement, BlockId, Comparator, Condition, ConditionChanges,
    ConditionId, ConditionOwner, ConditionPart, ElementId, ElementRef, FeedbackBlock,
    FeedbackBlockId, NewAttempt, NewQuestion, PartId, Question, QuestionId, QuestionUsage, Quiz,
    QuizId, Response, SlotState, UsageId, UsageSlot,
};
use adaptive_quiz_core::ports::{PortError, PortResult, QuizStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgConnection, PgPool};
use tracing::warn;
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `QuizStore` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

//=========================================================================================
// Error Mapping
//=========================================================================================

/// Constraint violations mean the store refused the write; anything else is unexpected.
fn map_sqlx_error(e: sqlx::Error) -> PortError {
    let rejected = e.as_database_error().is_some_and(|db| {
        db.is_unique_violation() || db.is_foreign_key_violation() || db.is_check_violation()
    });
    if rejected {
        PortError::Transaction(e.to_string())
    } else {
        PortError::Unexpected(e.to_string())
    }
}

fn not_found(what: String) -> impl FnOnce(sqlx::Error) -> PortError {
    move |e| match e {
        sqlx::Error::RowNotFound => PortError::NotFound(what),
        _ => map_sqlx_error(e),
    }
}

fn transaction_failed(e: sqlx::Error) -> PortError {
    warn!("Transaction failed: {}", e);
    PortError::Transaction(e.to_string())
}

/// The column of the `conditions` table holding the owner's id.
fn owner_column(owner: ConditionOwner) -> (&'static str, i64) {
    match owner {
        ConditionOwner::Block(id) => ("block_id", id.0),
        ConditionOwner::Feedback(id) => ("feedback_block_id", id.0),
    }
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct QuizRecord {
    id: i64,
    name: String,
    main_block_id: i64,
    grade: f64,
    sum_grades: f64,
    created_at: DateTime<Utc>,
    modified_at: DateTime<Utc>,
}
impl QuizRecord {
    fn to_domain(self) -> Quiz {
        Quiz {
            id: QuizId(self.id),
            name: self.name,
            main_block_id: BlockId(self.main_block_id),
            grade: self.grade,
            sum_grades: self.sum_grades,
            created_at: self.created_at,
            modified_at: self.modified_at,
        }
    }
}

#[derive(FromRow)]
struct QuestionRecord {
    id: i64,
    name: String,
    question_text: String,
    default_mark: f64,
    answer: Option<String>,
}
impl QuestionRecord {
    fn to_domain(self) -> Question {
        Question {
            id: QuestionId(self.id),
            name: self.name,
            question_text: self.question_text,
            default_mark: self.default_mark,
            answer: self.answer,
        }
    }
}

#[derive(FromRow)]
struct BlockRecord {
    id: i64,
    quiz_id: i64,
    name: String,
}
impl BlockRecord {
    fn to_domain(self) -> domain::BlockRecord {
        domain::BlockRecord {
            id: BlockId(self.id),
            quiz_id: QuizId(self.quiz_id),
            name: self.name,
        }
    }
}

#[derive(FromRow)]
struct ElementRecord {
    id: i64,
    block_id: i64,
    question_id: Option<i64>,
    sub_block_id: Option<i64>,
    slot: i32,
    grade: f64,
}
impl ElementRecord {
    fn to_domain(self) -> PortResult<BlockElement> {
        let target = match (self.question_id, self.sub_block_id) {
            (Some(question), None) => ElementRef::Question(QuestionId(question)),
            (None, Some(block)) => ElementRef::Block(BlockId(block)),
            _ => {
                return Err(PortError::Unexpected(format!(
                    "Element {} must reference exactly one question or block",
                    self.id
                )))
            }
        };
        Ok(BlockElement {
            id: ElementId(self.id),
            block_id: BlockId(self.block_id),
            target,
            slot: self.slot as u32,
            grade: self.grade,
        })
    }
}

#[derive(FromRow)]
struct ConditionRecord {
    id: i64,
    use_and: bool,
}

#[derive(FromRow)]
struct PartRecord {
    id: i64,
    comparator: i16,
    element_id: i64,
    grade: f64,
}
impl PartRecord {
    fn to_domain(self) -> PortResult<ConditionPart> {
        let comparator = Comparator::from_code(self.comparator).ok_or_else(|| {
            PortError::Unexpected(format!(
                "Condition part {} has unknown comparator {}",
                self.id, self.comparator
            ))
        })?;
        Ok(ConditionPart {
            id: PartId(self.id),
            comparator,
            element_id: ElementId(self.element_id),
            grade: self.grade,
        })
    }
}

#[derive(FromRow)]
struct AttemptRecord {
    id: i64,
    quiz_id: i64,
    user_id: Uuid,
    attempt_number: i32,
    usage_id: i64,
    current_slot: i32,
    sum_grades: Option<f64>,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    modified_at: DateTime<Utc>,
}
impl AttemptRecord {
    fn to_domain(self) -> Attempt {
        Attempt {
            id: AttemptId(self.id),
            quiz_id: QuizId(self.quiz_id),
            user_id: self.user_id,
            attempt_number: self.attempt_number as u32,
            usage_id: UsageId(self.usage_id),
            current_slot: self.current_slot as u32,
            sum_grades: self.sum_grades,
            started_at: self.started_at,
            finished_at: self.finished_at,
            modified_at: self.modified_at,
        }
    }
}

#[derive(FromRow)]
struct UsageSlotRecord {
    slot: i32,
    element_id: i64,
    question_id: i64,
    max_mark: f64,
    state: String,
    response: Option<Json<Response>>,
    fraction: Option<f64>,
    viewed: bool,
    finished_at: Option<DateTime<Utc>>,
}
impl UsageSlotRecord {
    fn to_domain(self) -> PortResult<UsageSlot> {
        let state = SlotState::parse(&self.state).ok_or_else(|| {
            PortError::Unexpected(format!("Usage slot {} has unknown state '{}'", self.slot, self.state))
        })?;
        Ok(UsageSlot {
            slot: self.slot as u32,
            element_id: ElementId(self.element_id),
            question_id: QuestionId(self.question_id),
            max_mark: self.max_mark,
            state,
            response: self.response.map(|json| json.0),
            fraction: self.fraction,
            viewed: self.viewed,
            finished_at: self.finished_at,
        })
    }
}

#[derive(FromRow)]
struct FeedbackRecord {
    id: i64,
    quiz_id: i64,
    name: String,
    feedback_text: String,
}
impl FeedbackRecord {
    fn to_domain(self, used_elements: Vec<ElementId>) -> FeedbackBlock {
        FeedbackBlock {
            id: FeedbackBlockId(self.id),
            quiz_id: QuizId(self.quiz_id),
            name: self.name,
            feedback_text: self.feedback_text,
            used_elements,
        }
    }
}

const ATTEMPT_COLUMNS: &str = "id, quiz_id, user_id, attempt_number, usage_id, current_slot, \
     sum_grades, started_at, finished_at, modified_at";

impl DbAdapter {
    async fn feedback_elements(&self, feedback_id: i64) -> PortResult<Vec<ElementId>> {
        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT element_id FROM feedback_block_elements WHERE feedback_block_id = $1 ORDER BY position",
        )
        .bind(feedback_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(ids.into_iter().map(ElementId).collect())
    }
}

async fn condition_parts(conn: &mut PgConnection, condition_id: i64) -> PortResult<Vec<ConditionPart>> {
    sqlx::query_as::<_, PartRecord>(
        "SELECT id, comparator, element_id, grade FROM condition_parts \
         WHERE condition_id = $1 ORDER BY id ASC",
    )
    .bind(condition_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(map_sqlx_error)?
    .into_iter()
    .map(|r| r.to_domain())
    .collect()
}

/// Applies condition edits on an open transaction, creating the condition first
/// when the owner has none. The caller commits.
async fn apply_condition_changes(
    conn: &mut PgConnection,
    owner: ConditionOwner,
    changes: &ConditionChanges,
) -> PortResult<Condition> {
    let (column, owner_id) = owner_column(owner);
    let existing = sqlx::query_as::<_, ConditionRecord>(&format!(
        "SELECT id, use_and FROM conditions WHERE {} = $1 FOR UPDATE",
        column
    ))
    .bind(owner_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;

    let record = match existing {
        Some(record) => match changes.use_and {
            Some(use_and) if use_and != record.use_and => {
                sqlx::query("UPDATE conditions SET use_and = $1 WHERE id = $2")
                    .bind(use_and)
                    .bind(record.id)
                    .execute(&mut *conn)
                    .await
                    .map_err(map_sqlx_error)?;
                ConditionRecord { use_and, ..record }
            }
            _ => record,
        },
        None => sqlx::query_as::<_, ConditionRecord>(&format!(
            "INSERT INTO conditions ({}, use_and) VALUES ($1, $2) RETURNING id, use_and",
            column
        ))
        .bind(owner_id)
        .bind(changes.use_and.unwrap_or(true))
        .fetch_one(&mut *conn)
        .await
        .map_err(map_sqlx_error)?,
    };

    for part_id in &changes.deleted {
        let result = sqlx::query("DELETE FROM condition_parts WHERE id = $1 AND condition_id = $2")
            .bind(part_id.0)
            .bind(record.id)
            .execute(&mut *conn)
            .await
            .map_err(map_sqlx_error)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Condition part {} not found", part_id)));
        }
    }
    for part in &changes.updated {
        let result = sqlx::query(
            "UPDATE condition_parts SET comparator = $1, element_id = $2, grade = $3 \
             WHERE id = $4 AND condition_id = $5",
        )
        .bind(part.comparator.code())
        .bind(part.element_id.0)
        .bind(part.grade)
        .bind(part.id.0)
        .bind(record.id)
        .execute(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Condition part {} not found", part.id)));
        }
    }
    for part in &changes.inserted {
        sqlx::query(
            "INSERT INTO condition_parts (condition_id, comparator, element_id, grade) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(record.id)
        .bind(part.comparator.code())
        .bind(part.element_id.0)
        .bind(part.grade)
        .execute(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;
    }

    Ok(Condition {
        id: ConditionId(record.id),
        owner,
        use_and: record.use_and,
        parts: condition_parts(conn, record.id).await?,
    })
}

//=========================================================================================
// `QuizStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl QuizStore for DbAdapter {
    // --- Quizzes ---
    async fn create_quiz(&self, name: &str, grade: f64, now: DateTime<Utc>) -> PortResult<Quiz> {
        let mut tx = self.pool.begin().await.map_err(transaction_failed)?;

        let main_block_id: i64 =
            sqlx::query_scalar("SELECT nextval(pg_get_serial_sequence('blocks', 'id'))")
                .fetch_one(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
        let record = sqlx::query_as::<_, QuizRecord>(
            "INSERT INTO quizzes (name, main_block_id, grade, sum_grades, created_at, modified_at) \
             VALUES ($1, $2, $3, 0, $4, $4) \
             RETURNING id, name, main_block_id, grade, sum_grades, created_at, modified_at",
        )
        .bind(name)
        .bind(main_block_id)
        .bind(grade)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
        sqlx::query("INSERT INTO blocks (id, quiz_id, name) VALUES ($1, $2, $3)")
            .bind(main_block_id)
            .bind(record.id)
            .bind(name)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(transaction_failed)?;
        Ok(record.to_domain())
    }

    async fn get_quiz(&self, quiz_id: QuizId) -> PortResult<Quiz> {
        let record = sqlx::query_as::<_, QuizRecord>(
            "SELECT id, name, main_block_id, grade, sum_grades, created_at, modified_at \
             FROM quizzes WHERE id = $1",
        )
        .bind(quiz_id.0)
        .fetch_one(&self.pool)
        .await
        .map_err(not_found(format!("Quiz {} not found", quiz_id)))?;
        Ok(record.to_domain())
    }

    async fn update_quiz_sum_grades(
        &self,
        quiz_id: QuizId,
        sum_grades: f64,
        now: DateTime<Utc>,
    ) -> PortResult<()> {
        let result = sqlx::query("UPDATE quizzes SET sum_grades = $1, modified_at = $2 WHERE id = $3")
            .bind(sum_grades)
            .bind(now)
            .bind(quiz_id.0)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Quiz {} not found", quiz_id)));
        }
        Ok(())
    }

    async fn delete_quiz(&self, quiz_id: QuizId) -> PortResult<()> {
        let mut tx = self.pool.begin().await.map_err(transaction_failed)?;
        // Usages are not owned by the quiz row; removing them cascades to the attempts.
        sqlx::query(
            "DELETE FROM question_usages WHERE id IN (SELECT usage_id FROM attempts WHERE quiz_id = $1)",
        )
        .bind(quiz_id.0)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
        let result = sqlx::query("DELETE FROM quizzes WHERE id = $1")
            .bind(quiz_id.0)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Quiz {} not found", quiz_id)));
        }
        tx.commit().await.map_err(transaction_failed)
    }

    // --- Question Bank ---
    async fn create_question(&self, question: NewQuestion) -> PortResult<Question> {
        let record = sqlx::query_as::<_, QuestionRecord>(
            "INSERT INTO questions (name, question_text, default_mark, answer) VALUES ($1, $2, $3, $4) \
             RETURNING id, name, question_text, default_mark, answer",
        )
        .bind(question.name)
        .bind(question.question_text)
        .bind(question.default_mark)
        .bind(question.answer)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(record.to_domain())
    }

    async fn get_question(&self, question_id: QuestionId) -> PortResult<Question> {
        let record = sqlx::query_as::<_, QuestionRecord>(
            "SELECT id, name, question_text, default_mark, answer FROM questions WHERE id = $1",
        )
        .bind(question_id.0)
        .fetch_one(&self.pool)
        .await
        .map_err(not_found(format!("Question {} not found", question_id)))?;
        Ok(record.to_domain())
    }

    // --- Blocks ---
    async fn create_block(&self, quiz_id: QuizId, name: &str) -> PortResult<domain::BlockRecord> {
        let record = sqlx::query_as::<_, BlockRecord>(
            "INSERT INTO blocks (quiz_id, name) VALUES ($1, $2) RETURNING id, quiz_id, name",
        )
        .bind(quiz_id.0)
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if e.as_database_error().is_some_and(|db| db.is_foreign_key_violation()) {
                PortError::NotFound(format!("Quiz {} not found", quiz_id))
            } else {
                map_sqlx_error(e)
            }
        })?;
        Ok(record.to_domain())
    }

    async fn get_block(&self, block_id: BlockId) -> PortResult<domain::BlockRecord> {
        let record = sqlx::query_as::<_, BlockRecord>("SELECT id, quiz_id, name FROM blocks WHERE id = $1")
            .bind(block_id.0)
            .fetch_one(&self.pool)
            .await
            .map_err(not_found(format!("Block {} not found", block_id)))?;
        Ok(record.to_domain())
    }

    async fn rename_block(&self, block_id: BlockId, name: &str) -> PortResult<()> {
        let result = sqlx::query("UPDATE blocks SET name = $1 WHERE id = $2")
            .bind(name)
            .bind(block_id.0)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Block {} not found", block_id)));
        }
        Ok(())
    }

    async fn get_block_elements(&self, block_id: BlockId) -> PortResult<Vec<BlockElement>> {
        let records = sqlx::query_as::<_, ElementRecord>(
            "SELECT id, block_id, question_id, sub_block_id, slot, grade \
             FROM block_elements WHERE block_id = $1 ORDER BY slot ASC",
        )
        .bind(block_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        records.into_iter().map(|r| r.to_domain()).collect()
    }

    async fn insert_block_element(
        &self,
        block_id: BlockId,
        target: ElementRef,
        grade: f64,
    ) -> PortResult<BlockElement> {
        let mut tx = self.pool.begin().await.map_err(transaction_failed)?;

        // Locking the parent serializes slot allocation per block.
        sqlx::query("SELECT id FROM blocks WHERE id = $1 FOR UPDATE")
            .bind(block_id.0)
            .fetch_one(&mut *tx)
            .await
            .map_err(not_found(format!("Block {} not found", block_id)))?;
        let slot: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM block_elements WHERE block_id = $1")
            .bind(block_id.0)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        let (question_id, sub_block_id) = match target {
            ElementRef::Question(id) => (Some(id.0), None),
            ElementRef::Block(id) => (None, Some(id.0)),
        };
        let record = sqlx::query_as::<_, ElementRecord>(
            "INSERT INTO block_elements (block_id, question_id, sub_block_id, slot, grade) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING id, block_id, question_id, sub_block_id, slot, grade",
        )
        .bind(block_id.0)
        .bind(question_id)
        .bind(sub_block_id)
        .bind(slot as i32)
        .bind(grade)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(transaction_failed)?;
        record.to_domain()
    }

    async fn delete_block_element(&self, element_id: ElementId) -> PortResult<()> {
        let mut tx = self.pool.begin().await.map_err(transaction_failed)?;
        let (block_id, slot): (i64, i32) =
            sqlx::query_as("DELETE FROM block_elements WHERE id = $1 RETURNING block_id, slot")
                .bind(element_id.0)
                .fetch_one(&mut *tx)
                .await
                .map_err(not_found(format!("Element {} not found", element_id)))?;
        sqlx::query("UPDATE block_elements SET slot = slot - 1 WHERE block_id = $1 AND slot > $2")
            .bind(block_id)
            .bind(slot)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        tx.commit().await.map_err(transaction_failed)
    }

    // --- Conditions ---
    async fn get_condition(&self, owner: ConditionOwner) -> PortResult<Option<Condition>> {
        let (column, owner_id) = owner_column(owner);
        let record = sqlx::query_as::<_, ConditionRecord>(&format!(
            "SELECT id, use_and FROM conditions WHERE {} = $1",
            column
        ))
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        let Some(record) = record else {
            return Ok(None);
        };

        let parts = sqlx::query_as::<_, PartRecord>(
            "SELECT id, comparator, element_id, grade FROM condition_parts \
             WHERE condition_id = $1 ORDER BY id ASC",
        )
        .bind(record.id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?
        .into_iter()
        .map(|r| r.to_domain())
        .collect::<PortResult<Vec<_>>>()?;

        Ok(Some(Condition {
            id: ConditionId(record.id),
            owner,
            use_and: record.use_and,
            parts,
        }))
    }

    async fn apply_condition_changes(
        &self,
        owner: ConditionOwner,
        changes: &ConditionChanges,
    ) -> PortResult<Condition> {
        let mut tx = self.pool.begin().await.map_err(transaction_failed)?;
        let condition = apply_condition_changes(&mut *tx, owner, changes).await?;
        tx.commit().await.map_err(transaction_failed)?;
        Ok(condition)
    }

    // --- Attempts ---
    async fn count_attempts(&self, quiz_id: QuizId, user_id: Uuid) -> PortResult<u32> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM attempts WHERE quiz_id = $1 AND user_id = $2")
                .bind(quiz_id.0)
                .bind(user_id)
                .fetch_one(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
        Ok(count as u32)
    }

    async fn create_attempt(
        &self,
        attempt: NewAttempt,
        slots: Vec<UsageSlot>,
    ) -> PortResult<(Attempt, QuestionUsage)> {
        let mut tx = self.pool.begin().await.map_err(transaction_failed)?;

        let usage_id: i64 = sqlx::query_scalar("INSERT INTO question_usages DEFAULT VALUES RETURNING id")
            .fetch_one(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        let record = sqlx::query_as::<_, AttemptRecord>(&format!(
            "INSERT INTO attempts (quiz_id, user_id, attempt_number, usage_id, current_slot, \
             sum_grades, started_at, finished_at, modified_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $7) RETURNING {}",
            ATTEMPT_COLUMNS
        ))
        .bind(attempt.quiz_id.0)
        .bind(attempt.user_id)
        .bind(attempt.attempt_number as i32)
        .bind(usage_id)
        .bind(attempt.current_slot as i32)
        .bind(attempt.sum_grades)
        .bind(attempt.started_at)
        .bind(attempt.finished_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if e.as_database_error().is_some_and(|db| db.is_unique_violation()) {
                PortError::Conflict(format!(
                    "Attempt {} of user {} already exists",
                    attempt.attempt_number, attempt.user_id
                ))
            } else {
                map_sqlx_error(e)
            }
        })?;

        for slot in &slots {
            sqlx::query(
                "INSERT INTO usage_slots (usage_id, slot, element_id, question_id, max_mark, state, \
                 response, fraction, viewed, finished_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            )
            .bind(usage_id)
            .bind(slot.slot as i32)
            .bind(slot.element_id.0)
            .bind(slot.question_id.0)
            .bind(slot.max_mark)
            .bind(slot.state.as_str())
            .bind(slot.response.as_ref().map(Json))
            .bind(slot.fraction)
            .bind(slot.viewed)
            .bind(slot.finished_at)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        }

        tx.commit().await.map_err(transaction_failed)?;
        let usage = QuestionUsage {
            id: UsageId(usage_id),
            slots,
        };
        Ok((record.to_domain(), usage))
    }

    async fn get_attempt(&self, attempt_id: AttemptId) -> PortResult<Attempt> {
        let record = sqlx::query_as::<_, AttemptRecord>(&format!(
            "SELECT {} FROM attempts WHERE id = $1",
            ATTEMPT_COLUMNS
        ))
        .bind(attempt_id.0)
        .fetch_one(&self.pool)
        .await
        .map_err(not_found(format!("Attempt {} not found", attempt_id)))?;
        Ok(record.to_domain())
    }

    async fn get_usage(&self, usage_id: UsageId) -> PortResult<QuestionUsage> {
        sqlx::query("SELECT id FROM question_usages WHERE id = $1")
            .bind(usage_id.0)
            .fetch_one(&self.pool)
            .await
            .map_err(not_found(format!("Question usage {} not found", usage_id)))?;
        let slots = sqlx::query_as::<_, UsageSlotRecord>(
            "SELECT slot, element_id, question_id, max_mark, state, response, fraction, viewed, \
             finished_at FROM usage_slots WHERE usage_id = $1 ORDER BY slot ASC",
        )
        .bind(usage_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?
        .into_iter()
        .map(|r| r.to_domain())
        .collect::<PortResult<Vec<_>>>()?;
        Ok(QuestionUsage { id: usage_id, slots })
    }

    async fn save_attempt_progress(
        &self,
        attempt: &Attempt,
        expected_slot: u32,
        usage: &QuestionUsage,
    ) -> PortResult<()> {
        let mut tx = self.pool.begin().await.map_err(transaction_failed)?;

        let result = sqlx::query(
            "UPDATE attempts SET current_slot = $1, sum_grades = $2, finished_at = $3, modified_at = $4 \
             WHERE id = $5 AND current_slot = $6 AND finished_at IS NULL",
        )
        .bind(attempt.current_slot as i32)
        .bind(attempt.sum_grades)
        .bind(attempt.finished_at)
        .bind(attempt.modified_at)
        .bind(attempt.id.0)
        .bind(expected_slot as i32)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
        if result.rows_affected() == 0 {
            let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM attempts WHERE id = $1)")
                .bind(attempt.id.0)
                .fetch_one(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
            return Err(if exists {
                PortError::Conflict(format!(
                    "Attempt {} is no longer at slot {}",
                    attempt.id, expected_slot
                ))
            } else {
                PortError::NotFound(format!("Attempt {} not found", attempt.id))
            });
        }

        for slot in &usage.slots {
            sqlx::query(
                "UPDATE usage_slots SET state = $1, response = $2, fraction = $3, viewed = $4, \
                 finished_at = $5 WHERE usage_id = $6 AND slot = $7",
            )
            .bind(slot.state.as_str())
            .bind(slot.response.as_ref().map(Json))
            .bind(slot.fraction)
            .bind(slot.viewed)
            .bind(slot.finished_at)
            .bind(usage.id.0)
            .bind(slot.slot as i32)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        }

        tx.commit().await.map_err(transaction_failed)
    }

    async fn save_manual_mark(&self, attempt: &Attempt, slot: &UsageSlot) -> PortResult<()> {
        let mut tx = self.pool.begin().await.map_err(transaction_failed)?;

        let result = sqlx::query("UPDATE attempts SET sum_grades = $1, modified_at = $2 WHERE id = $3")
            .bind(attempt.sum_grades)
            .bind(attempt.modified_at)
            .bind(attempt.id.0)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Attempt {} not found", attempt.id)));
        }
        let result = sqlx::query(
            "UPDATE usage_slots SET state = $1, fraction = $2, finished_at = $3 \
             WHERE usage_id = $4 AND slot = $5",
        )
        .bind(slot.state.as_str())
        .bind(slot.fraction)
        .bind(slot.finished_at)
        .bind(attempt.usage_id.0)
        .bind(slot.slot as i32)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!(
                "Slot {} of question usage {} not found",
                slot.slot, attempt.usage_id
            )));
        }

        tx.commit().await.map_err(transaction_failed)
    }

    async fn list_attempts(&self, quiz_id: QuizId) -> PortResult<Vec<Attempt>> {
        let records = sqlx::query_as::<_, AttemptRecord>(&format!(
            "SELECT {} FROM attempts WHERE quiz_id = $1 ORDER BY id ASC",
            ATTEMPT_COLUMNS
        ))
        .bind(quiz_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    // --- Feedback Blocks ---
    async fn create_feedback_block(
        &self,
        quiz_id: QuizId,
        name: &str,
        feedback_text: &str,
    ) -> PortResult<(FeedbackBlock, Condition)> {
        let mut tx = self.pool.begin().await.map_err(transaction_failed)?;
        let record = sqlx::query_as::<_, FeedbackRecord>(
            "INSERT INTO feedback_blocks (quiz_id, name, feedback_text) VALUES ($1, $2, $3) \
             RETURNING id, quiz_id, name, feedback_text",
        )
        .bind(quiz_id.0)
        .bind(name)
        .bind(feedback_text)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if e.as_database_error().is_some_and(|db| db.is_foreign_key_violation()) {
                PortError::NotFound(format!("Quiz {} not found", quiz_id))
            } else {
                map_sqlx_error(e)
            }
        })?;
        let condition = apply_condition_changes(
            &mut *tx,
            ConditionOwner::Feedback(FeedbackBlockId(record.id)),
            &ConditionChanges::default(),
        )
        .await?;

        tx.commit().await.map_err(transaction_failed)?;
        Ok((record.to_domain(Vec::new()), condition))
    }

    async fn get_feedback_block(&self, feedback_id: FeedbackBlockId) -> PortResult<FeedbackBlock> {
        let record = sqlx::query_as::<_, FeedbackRecord>(
            "SELECT id, quiz_id, name, feedback_text FROM feedback_blocks WHERE id = $1",
        )
        .bind(feedback_id.0)
        .fetch_one(&self.pool)
        .await
        .map_err(not_found(format!("Feedback block {} not found", feedback_id)))?;
        let used_elements = self.feedback_elements(record.id).await?;
        Ok(record.to_domain(used_elements))
    }

    async fn list_feedback_blocks(&self, quiz_id: QuizId) -> PortResult<Vec<FeedbackBlock>> {
        let records = sqlx::query_as::<_, FeedbackRecord>(
            "SELECT id, quiz_id, name, feedback_text FROM feedback_blocks WHERE quiz_id = $1 ORDER BY id ASC",
        )
        .bind(quiz_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let mut blocks = Vec::with_capacity(records.len());
        for record in records {
            let used_elements = self.feedback_elements(record.id).await?;
            blocks.push(record.to_domain(used_elements));
        }
        Ok(blocks)
    }

    async fn update_feedback_block(
        &self,
        feedback: &FeedbackBlock,
        condition: &ConditionChanges,
    ) -> PortResult<Condition> {
        let mut tx = self.pool.begin().await.map_err(transaction_failed)?;

        let result = sqlx::query("UPDATE feedback_blocks SET name = $1, feedback_text = $2 WHERE id = $3")
            .bind(&feedback.name)
            .bind(&feedback.feedback_text)
            .bind(feedback.id.0)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Feedback block {} not found", feedback.id)));
        }
        sqlx::query("DELETE FROM feedback_block_elements WHERE feedback_block_id = $1")
            .bind(feedback.id.0)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        for (position, element) in feedback.used_elements.iter().enumerate() {
            sqlx::query(
                "INSERT INTO feedback_block_elements (feedback_block_id, element_id, position) VALUES ($1, $2, $3)",
            )
            .bind(feedback.id.0)
            .bind(element.0)
            .bind(position as i32)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        }
        let condition =
            apply_condition_changes(&mut *tx, ConditionOwner::Feedback(feedback.id), condition).await?;

        tx.commit().await.map_err(transaction_failed)?;
        Ok(condition)
    }

    async fn delete_feedback_block(&self, feedback_id: FeedbackBlockId) -> PortResult<()> {
        // The condition and the element links cascade.
        let result = sqlx::query("DELETE FROM feedback_blocks WHERE id = $1")
            .bind(feedback_id.0)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Feedback block {} not found", feedback_id)));
        }
        Ok(())
    }
}
