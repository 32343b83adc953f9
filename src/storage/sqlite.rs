//! SQLite-backed storage.
//!
//! One connection behind a mutex. Timestamps are stored as epoch milliseconds,
//! assignment dates as `YYYY-MM-DD` text. Multi-row writes run in a single
//! transaction so a dropped run never leaves a partial batch behind.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use crate::domain::{
    CandidateQuestion, DailyAssignment, Difficulty, GenerationChoice, GenerationHint, LearningPreferences,
    NewQuestion, PoolKey, PoolStats, PriorityScore, Question, QuestionHistory, QuestionId, QuestionType,
    TopicStat, User, UserId,
};
use crate::error::{QuizpoolError, Result};
use crate::storage::{HintStore, Storage};

const DATE_FORMAT: &str = "%Y-%m-%d";

pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Open or create a database file, creating parent directories as needed.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        Self::init_schema(&conn)?;
        Self::migrate(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Bring databases created before a column existed up to date.
    fn migrate(conn: &Connection) -> Result<()> {
        let has_timezone = conn.prepare("SELECT timezone FROM users LIMIT 1").is_ok();
        if !has_timezone {
            conn.execute_batch("ALTER TABLE users ADD COLUMN timezone TEXT;")?;
        }
        Ok(())
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY,
                username TEXT NOT NULL UNIQUE,
                language TEXT NOT NULL,
                level TEXT NOT NULL,
                ai_enabled INTEGER NOT NULL DEFAULT 0,
                ai_provider TEXT,
                last_active_at INTEGER,
                timezone TEXT
            );

            CREATE TABLE IF NOT EXISTS questions (
                id INTEGER PRIMARY KEY,
                language TEXT NOT NULL,
                level TEXT NOT NULL,
                question_type TEXT NOT NULL,
                topic TEXT NOT NULL,
                grammar_focus TEXT,
                difficulty TEXT NOT NULL,
                text TEXT NOT NULL,
                options TEXT NOT NULL,
                correct_index INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_questions_pool ON questions(language, level);

            CREATE TABLE IF NOT EXISTS user_questions (
                user_id INTEGER NOT NULL REFERENCES users(id),
                question_id INTEGER NOT NULL REFERENCES questions(id),
                assigned_at INTEGER NOT NULL,
                PRIMARY KEY (user_id, question_id)
            );

            CREATE TABLE IF NOT EXISTS responses (
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL REFERENCES users(id),
                question_id INTEGER NOT NULL REFERENCES questions(id),
                is_correct INTEGER NOT NULL,
                answered_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_responses_user_question ON responses(user_id, question_id);
            CREATE INDEX IF NOT EXISTS idx_responses_answered ON responses(user_id, answered_at);

            CREATE TABLE IF NOT EXISTS learning_preferences (
                user_id INTEGER PRIMARY KEY REFERENCES users(id),
                focus_on_weak_areas INTEGER NOT NULL,
                fresh_question_ratio REAL NOT NULL,
                weak_area_boost REAL NOT NULL,
                known_question_penalty REAL NOT NULL,
                review_interval_days INTEGER NOT NULL,
                daily_goal INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS priority_scores (
                user_id INTEGER NOT NULL REFERENCES users(id),
                question_id INTEGER NOT NULL REFERENCES questions(id),
                score REAL NOT NULL,
                last_calculated_at INTEGER NOT NULL,
                PRIMARY KEY (user_id, question_id)
            );

            CREATE TABLE IF NOT EXISTS daily_assignments (
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL REFERENCES users(id),
                question_id INTEGER NOT NULL REFERENCES questions(id),
                assignment_date TEXT NOT NULL,
                is_completed INTEGER NOT NULL DEFAULT 0,
                completed_at INTEGER,
                UNIQUE (user_id, question_id, assignment_date)
            );

            CREATE INDEX IF NOT EXISTS idx_assignments_user_date ON daily_assignments(user_id, assignment_date);

            CREATE TABLE IF NOT EXISTS generation_choices (
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL,
                language TEXT NOT NULL,
                level TEXT NOT NULL,
                question_type TEXT NOT NULL,
                topic TEXT,
                grammar_focus TEXT,
                difficulty_modifier TEXT,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_choices_pool ON generation_choices(user_id, language, level, created_at);

            CREATE TABLE IF NOT EXISTS generation_hints (
                user_id INTEGER NOT NULL,
                language TEXT NOT NULL,
                level TEXT NOT NULL,
                question_type TEXT NOT NULL,
                expires_at INTEGER NOT NULL,
                PRIMARY KEY (user_id, language, level, question_type)
            );
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| QuizpoolError::Storage("connection mutex poisoned".to_string()))
    }

    // Write paths owned by the web and quiz layers. The scheduler never calls
    // these; they exist for seeding, the CLI and tests.

    /// Create an AI-enabled user.
    pub fn insert_user(&self, username: &str, language: &str, level: &str, ai_provider: Option<&str>) -> Result<UserId> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO users (username, language, level, ai_enabled, ai_provider) VALUES (?1, ?2, ?3, 1, ?4)",
            params![username, language, level, ai_provider],
        )?;
        Ok(UserId(conn.last_insert_rowid()))
    }

    pub fn set_ai_enabled(&self, user: UserId, enabled: bool) -> Result<()> {
        self.conn()?
            .execute("UPDATE users SET ai_enabled = ?1 WHERE id = ?2", params![enabled, user.0])?;
        Ok(())
    }

    pub fn set_timezone(&self, user: UserId, timezone: Option<&str>) -> Result<()> {
        self.conn()?
            .execute("UPDATE users SET timezone = ?1 WHERE id = ?2", params![timezone, user.0])?;
        Ok(())
    }

    pub fn touch_user(&self, user: UserId, at: DateTime<Utc>) -> Result<()> {
        self.conn()?.execute(
            "UPDATE users SET last_active_at = ?1 WHERE id = ?2",
            params![at.timestamp_millis(), user.0],
        )?;
        Ok(())
    }

    pub fn insert_question(&self, question: &NewQuestion, now: DateTime<Utc>) -> Result<QuestionId> {
        let conn = self.conn()?;
        insert_question_row(&conn, question, now)
    }

    pub fn assign_question(&self, user: UserId, question: QuestionId, now: DateTime<Utc>) -> Result<()> {
        self.conn()?.execute(
            "INSERT OR IGNORE INTO user_questions (user_id, question_id, assigned_at) VALUES (?1, ?2, ?3)",
            params![user.0, question.0, now.timestamp_millis()],
        )?;
        Ok(())
    }

    pub fn record_answer(&self, user: UserId, question: QuestionId, is_correct: bool, at: DateTime<Utc>) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO responses (user_id, question_id, is_correct, answered_at) VALUES (?1, ?2, ?3, ?4)",
            params![user.0, question.0, is_correct, at.timestamp_millis()],
        )?;
        Ok(())
    }

    /// Store preferences; out-of-range values are normalized first.
    pub fn set_learning_preferences(&self, user: UserId, prefs: &LearningPreferences) -> Result<()> {
        let prefs = prefs.clone().normalized();
        self.conn()?.execute(
            r#"
            INSERT INTO learning_preferences
                (user_id, focus_on_weak_areas, fresh_question_ratio, weak_area_boost,
                 known_question_penalty, review_interval_days, daily_goal)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(user_id) DO UPDATE SET
                focus_on_weak_areas = excluded.focus_on_weak_areas,
                fresh_question_ratio = excluded.fresh_question_ratio,
                weak_area_boost = excluded.weak_area_boost,
                known_question_penalty = excluded.known_question_penalty,
                review_interval_days = excluded.review_interval_days,
                daily_goal = excluded.daily_goal
            "#,
            params![
                user.0,
                prefs.focus_on_weak_areas,
                prefs.fresh_question_ratio,
                prefs.weak_area_boost,
                prefs.known_question_penalty,
                i64::from(prefs.review_interval_days),
                prefs.daily_goal,
            ],
        )?;
        Ok(())
    }

    pub fn complete_assignment(&self, user: UserId, question: QuestionId, date: NaiveDate, at: DateTime<Utc>) -> Result<()> {
        self.conn()?.execute(
            r#"
            UPDATE daily_assignments SET is_completed = 1, completed_at = ?1
            WHERE user_id = ?2 AND question_id = ?3 AND assignment_date = ?4
            "#,
            params![at.timestamp_millis(), user.0, question.0, format_date(date)],
        )?;
        Ok(())
    }

    pub fn get_question(&self, id: QuestionId) -> Result<Option<Question>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                r#"
                SELECT id, language, level, question_type, topic, grammar_focus, difficulty,
                       text, options, correct_index, created_at
                FROM questions WHERE id = ?1
                "#,
                params![id.0],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, String>(7)?,
                        row.get::<_, String>(8)?,
                        row.get::<_, i64>(9)?,
                        row.get::<_, i64>(10)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, language, level, qtype, topic, grammar_focus, difficulty, text, options, correct, created)) = row
        else {
            return Ok(None);
        };

        Ok(Some(Question {
            id: QuestionId(id),
            language,
            level,
            question_type: qtype.parse::<QuestionType>()?,
            topic,
            grammar_focus,
            difficulty: difficulty.parse::<Difficulty>()?,
            text,
            options: serde_json::from_str(&options)?,
            correct_index: usize::try_from(correct)
                .map_err(|_| QuizpoolError::Storage(format!("negative correct_index on question {}", id)))?,
            created_at: from_millis(created),
        }))
    }
}

fn insert_question_row(conn: &Connection, question: &NewQuestion, now: DateTime<Utc>) -> Result<QuestionId> {
    conn.execute(
        r#"
        INSERT INTO questions
            (language, level, question_type, topic, grammar_focus, difficulty, text, options, correct_index, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        "#,
        params![
            question.language,
            question.level,
            question.question_type.as_str(),
            question.topic,
            question.grammar_focus,
            question.difficulty.as_str(),
            question.text,
            serde_json::to_string(&question.options)?,
            question.correct_index as i64,
            now.timestamp_millis(),
        ],
    )?;
    Ok(QuestionId(conn.last_insert_rowid()))
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: UserId(row.get(0)?),
        username: row.get(1)?,
        language: row.get(2)?,
        level: row.get(3)?,
        ai_enabled: row.get(4)?,
        ai_provider: row.get(5)?,
        last_active_at: row.get::<_, Option<i64>>(6)?.map(from_millis),
        timezone: row.get(7)?,
    })
}

const USER_COLUMNS: &str = "id, username, language, level, ai_enabled, ai_provider, last_active_at, timezone";

impl Storage for SqliteStorage {
    fn list_users(&self) -> Result<Vec<User>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("SELECT {} FROM users ORDER BY id", USER_COLUMNS))?;
        let users = stmt
            .query_map([], row_to_user)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(users)
    }

    fn get_user(&self, user: UserId) -> Result<Option<User>> {
        let conn = self.conn()?;
        let found = conn
            .query_row(
                &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
                params![user.0],
                row_to_user,
            )
            .optional()?;
        Ok(found)
    }

    fn learning_preferences(&self, user: UserId) -> Result<LearningPreferences> {
        let conn = self.conn()?;
        let prefs = conn
            .query_row(
                r#"
                SELECT focus_on_weak_areas, fresh_question_ratio, weak_area_boost,
                       known_question_penalty, review_interval_days, daily_goal
                FROM learning_preferences WHERE user_id = ?1
                "#,
                params![user.0],
                |row| {
                    Ok(LearningPreferences {
                        focus_on_weak_areas: row.get(0)?,
                        fresh_question_ratio: row.get(1)?,
                        weak_area_boost: row.get(2)?,
                        known_question_penalty: row.get(3)?,
                        review_interval_days: row.get::<_, i64>(4)?.clamp(0, i64::from(u32::MAX)) as u32,
                        daily_goal: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(prefs.unwrap_or_default().normalized())
    }

    fn pool_stats(&self, pool: &PoolKey, correct_since: DateTime<Utc>) -> Result<PoolStats> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT q.question_type,
                   COUNT(*),
                   SUM(CASE WHEN NOT EXISTS (
                           SELECT 1 FROM responses r
                           WHERE r.user_id = uq.user_id AND r.question_id = q.id
                       ) THEN 1 ELSE 0 END)
            FROM user_questions uq
            JOIN questions q ON q.id = uq.question_id
            WHERE uq.user_id = ?1 AND q.language = ?2 AND q.level = ?3
              AND NOT EXISTS (
                  SELECT 1 FROM responses r
                  WHERE r.user_id = uq.user_id AND r.question_id = q.id
                    AND r.is_correct = 1 AND r.answered_at >= ?4
              )
            GROUP BY q.question_type
            "#,
        )?;
        let rows = stmt
            .query_map(
                params![pool.user.0, pool.language, pool.level, correct_since.timestamp_millis()],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?, row.get::<_, i64>(2)?)),
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut stats = PoolStats::default();
        for (qtype, count, fresh) in rows {
            stats.pool_count += count as usize;
            stats.fresh_count += fresh as usize;
            match qtype.parse::<QuestionType>() {
                Ok(t) => {
                    stats.by_type.insert(t, count as usize);
                }
                Err(_) => tracing::warn!(question_type = %qtype, "Unknown question type in pool"),
            }
        }
        Ok(stats)
    }

    fn candidate_questions(&self, pool: &PoolKey) -> Result<Vec<CandidateQuestion>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT q.id, q.topic,
                   (SELECT MAX(r.answered_at) FROM responses r
                    WHERE r.user_id = uq.user_id AND r.question_id = q.id AND r.is_correct = 1)
            FROM user_questions uq
            JOIN questions q ON q.id = uq.question_id
            WHERE uq.user_id = ?1 AND q.language = ?2 AND q.level = ?3
            ORDER BY q.id
            "#,
        )?;
        let candidates = stmt
            .query_map(params![pool.user.0, pool.language, pool.level], |row| {
                Ok(CandidateQuestion {
                    id: QuestionId(row.get(0)?),
                    topic: row.get(1)?,
                    last_correct_at: row.get::<_, Option<i64>>(2)?.map(from_millis),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(candidates)
    }

    fn question_history(&self, user: UserId, question: QuestionId) -> Result<QuestionHistory> {
        let conn = self.conn()?;
        let history = conn.query_row(
            r#"
            SELECT q.topic,
                   COUNT(r.id),
                   COALESCE(SUM(r.is_correct), 0),
                   MAX(r.answered_at),
                   MAX(CASE WHEN r.is_correct = 1 THEN r.answered_at END)
            FROM questions q
            LEFT JOIN responses r ON r.question_id = q.id AND r.user_id = ?1
            WHERE q.id = ?2
            GROUP BY q.id
            "#,
            params![user.0, question.0],
            |row| {
                Ok(QuestionHistory {
                    question_id: question,
                    topic: row.get(0)?,
                    attempts: row.get::<_, i64>(1)? as u32,
                    correct: row.get::<_, i64>(2)? as u32,
                    last_seen_at: row.get::<_, Option<i64>>(3)?.map(from_millis),
                    last_correct_at: row.get::<_, Option<i64>>(4)?.map(from_millis),
                })
            },
        )?;
        Ok(history)
    }

    fn topic_stats(&self, user: UserId, since: DateTime<Utc>) -> Result<Vec<TopicStat>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT q.topic, COUNT(*), SUM(CASE WHEN r.is_correct = 0 THEN 1 ELSE 0 END)
            FROM responses r
            JOIN questions q ON q.id = r.question_id
            WHERE r.user_id = ?1 AND r.answered_at >= ?2
            GROUP BY q.topic
            ORDER BY q.topic
            "#,
        )?;
        let stats = stmt
            .query_map(params![user.0, since.timestamp_millis()], |row| {
                Ok(TopicStat {
                    topic: row.get(0)?,
                    attempts: row.get::<_, i64>(1)? as u32,
                    incorrect: row.get::<_, i64>(2)? as u32,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(stats)
    }

    fn priority_scores(&self, user: UserId, questions: &[QuestionId]) -> Result<HashMap<QuestionId, PriorityScore>> {
        let wanted: HashSet<QuestionId> = questions.iter().copied().collect();
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT question_id, score, last_calculated_at FROM priority_scores WHERE user_id = ?1")?;
        let rows = stmt
            .query_map(params![user.0], |row| {
                Ok(PriorityScore {
                    user,
                    question: QuestionId(row.get(0)?),
                    score: row.get(1)?,
                    last_calculated_at: from_millis(row.get(2)?),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(rows
            .into_iter()
            .filter(|s| wanted.contains(&s.question))
            .map(|s| (s.question, s))
            .collect())
    }

    fn upsert_priority_score(&self, score: &PriorityScore) -> Result<()> {
        self.conn()?.execute(
            r#"
            INSERT INTO priority_scores (user_id, question_id, score, last_calculated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(user_id, question_id) DO UPDATE SET
                score = excluded.score,
                last_calculated_at = excluded.last_calculated_at
            "#,
            params![
                score.user.0,
                score.question.0,
                score.score,
                score.last_calculated_at.timestamp_millis()
            ],
        )?;
        Ok(())
    }

    fn assignments_for(&self, user: UserId, date: NaiveDate) -> Result<Vec<DailyAssignment>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT question_id, is_completed, completed_at FROM daily_assignments
            WHERE user_id = ?1 AND assignment_date = ?2
            ORDER BY id
            "#,
        )?;
        let rows = stmt
            .query_map(params![user.0, format_date(date)], |row| {
                Ok(DailyAssignment {
                    user,
                    question: QuestionId(row.get(0)?),
                    date,
                    is_completed: row.get(1)?,
                    completed_at: row.get::<_, Option<i64>>(2)?.map(from_millis),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn replace_assignments(&self, user: UserId, date: NaiveDate, questions: &[QuestionId]) -> Result<()> {
        let day = format_date(date);
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM daily_assignments WHERE user_id = ?1 AND assignment_date = ?2 AND is_completed = 0",
            params![user.0, day],
        )?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT OR IGNORE INTO daily_assignments (user_id, question_id, assignment_date, is_completed)
                VALUES (?1, ?2, ?3, 0)
                "#,
            )?;
            for question in questions {
                stmt.execute(params![user.0, question.0, day])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn save_generated(&self, pool: &PoolKey, questions: &[NewQuestion], now: DateTime<Utc>) -> Result<Vec<QuestionId>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut ids = Vec::with_capacity(questions.len());
        for question in questions {
            let id = insert_question_row(&tx, question, now)?;
            tx.execute(
                "INSERT OR IGNORE INTO user_questions (user_id, question_id, assigned_at) VALUES (?1, ?2, ?3)",
                params![pool.user.0, id.0, now.timestamp_millis()],
            )?;
            ids.push(id);
        }
        tx.commit()?;
        Ok(ids)
    }
}

impl HintStore for SqliteStorage {
    fn recent_choices(&self, pool: &PoolKey, limit: usize) -> Result<Vec<GenerationChoice>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT question_type, topic, grammar_focus, difficulty_modifier, created_at
            FROM generation_choices
            WHERE user_id = ?1 AND language = ?2 AND level = ?3
            ORDER BY created_at DESC, id DESC
            LIMIT ?4
            "#,
        )?;
        let rows = stmt
            .query_map(
                params![pool.user.0, pool.language, pool.level, limit as i64],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, i64>(4)?,
                    ))
                },
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(qtype, topic, grammar_focus, difficulty_modifier, created_at)| -> Result<GenerationChoice> {
                Ok(GenerationChoice {
                    user: pool.user,
                    language: pool.language.clone(),
                    level: pool.level.clone(),
                    question_type: qtype.parse()?,
                    topic,
                    grammar_focus,
                    difficulty_modifier,
                    created_at: from_millis(created_at),
                })
            })
            .collect()
    }

    fn record_choice(&self, choice: &GenerationChoice) -> Result<()> {
        self.conn()?.execute(
            r#"
            INSERT INTO generation_choices
                (user_id, language, level, question_type, topic, grammar_focus, difficulty_modifier, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                choice.user.0,
                choice.language,
                choice.level,
                choice.question_type.as_str(),
                choice.topic,
                choice.grammar_focus,
                choice.difficulty_modifier,
                choice.created_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    fn active_hints(&self, user: UserId, now: DateTime<Utc>) -> Result<Vec<GenerationHint>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT language, level, question_type, expires_at FROM generation_hints
            WHERE user_id = ?1 AND expires_at > ?2
            ORDER BY expires_at
            "#,
        )?;
        let rows = stmt
            .query_map(params![user.0, now.timestamp_millis()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(language, level, qtype, expires_at)| -> Result<GenerationHint> {
                Ok(GenerationHint {
                    user,
                    language,
                    level,
                    question_type: qtype.parse()?,
                    expires_at: from_millis(expires_at),
                })
            })
            .collect()
    }

    fn upsert_hint(&self, hint: &GenerationHint) -> Result<()> {
        self.conn()?.execute(
            r#"
            INSERT INTO generation_hints (user_id, language, level, question_type, expires_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(user_id, language, level, question_type) DO UPDATE SET expires_at = excluded.expires_at
            "#,
            params![
                hint.user.0,
                hint.language,
                hint.level,
                hint.question_type.as_str(),
                hint.expires_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    fn clear_hint(&self, pool: &PoolKey, question_type: QuestionType) -> Result<()> {
        self.conn()?.execute(
            "DELETE FROM generation_hints WHERE user_id = ?1 AND language = ?2 AND level = ?3 AND question_type = ?4",
            params![pool.user.0, pool.language, pool.level, question_type.as_str()],
        )?;
        Ok(())
    }
}
