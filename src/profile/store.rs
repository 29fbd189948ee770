//! SQLite-backed profile store.
//!
//! Owns the three tables the bot needs: `users` (profile + interaction
//! state), `stripe_customers` (billing identity mapping) and `messages`
//! (paid-chat history). A connection is opened per operation; every write is
//! a single statement, so each call is atomic on its own. Multi-call
//! read-modify-write sequences are serialized per user by the router's lock
//! registry, not here.
//!
//! The answer buffer is stored as a string of `0`/`1` characters so an
//! append is one `UPDATE` with a string concatenation rather than a
//! read-modify-write.

use std::path::PathBuf;

use rusqlite::{params, Connection, OptionalExtension};

use crate::errors::{BotError, BotResult};
use crate::profile::{Gender, Mode, TypeCode, UserProfile};

/// SQLite store for user profiles, billing identities and chat history.
#[derive(Debug, Clone)]
pub struct ProfileStore {
    /// Path to the SQLite database file.
    db_path: PathBuf,
}

impl ProfileStore {
    /// Open (creating if needed) the database at `db_path` and run the
    /// table migrations.
    pub fn new(db_path: impl Into<PathBuf>) -> BotResult<Self> {
        let store = Self {
            db_path: db_path.into(),
        };
        store.initialize_db()?;
        Ok(store)
    }

    fn open(&self) -> BotResult<Connection> {
        Connection::open(&self.db_path).map_err(|e| {
            log::error!("failed to open database {:?}: {}", self.db_path, e);
            BotError::Persistence(e)
        })
    }

    fn initialize_db(&self) -> BotResult<()> {
        let conn = self.open()?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS users (
                user_id TEXT PRIMARY KEY,
                mbti TEXT,
                gender TEXT,
                target_mbti TEXT,
                is_paid INTEGER NOT NULL DEFAULT 0,
                mode TEXT NOT NULL DEFAULT '',
                pending_answers TEXT NOT NULL DEFAULT ''
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS stripe_customers (
                customer_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                timestamp DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Profiles
    // -----------------------------------------------------------------------

    /// Fetch a profile, creating a default row if the user is unseen.
    ///
    /// The second tuple element reports whether the row was just created;
    /// the router uses it to auto-start a diagnosis on first contact instead
    /// of treating creation as a hidden side effect of the lookup.
    pub fn get_or_create(&self, user_id: &str) -> BotResult<(UserProfile, bool)> {
        let conn = self.open()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO users (user_id) VALUES (?1)",
            params![user_id],
        )?;
        let profile = Self::query_profile(&conn, user_id)?.ok_or_else(|| {
            BotError::Persistence(rusqlite::Error::QueryReturnedNoRows)
        })?;
        Ok((profile, inserted > 0))
    }

    /// Non-creating lookup for paths that must not mint a profile.
    pub fn get(&self, user_id: &str) -> BotResult<Option<UserProfile>> {
        let conn = self.open()?;
        Self::query_profile(&conn, user_id)
    }

    fn query_profile(conn: &Connection, user_id: &str) -> BotResult<Option<UserProfile>> {
        let row = conn
            .query_row(
                "SELECT mbti, gender, target_mbti, is_paid, mode, pending_answers
                 FROM users WHERE user_id = ?1",
                params![user_id],
                |row| {
                    let mbti: Option<String> = row.get(0)?;
                    let gender: Option<String> = row.get(1)?;
                    let target: Option<String> = row.get(2)?;
                    let is_paid: bool = row.get(3)?;
                    let mode: String = row.get(4)?;
                    let pending: String = row.get(5)?;
                    Ok((mbti, gender, target, is_paid, mode, pending))
                },
            )
            .optional()?;

        Ok(row.map(|(mbti, gender, target, is_paid, mode, pending)| UserProfile {
            user_id: user_id.to_string(),
            type_code: mbti.as_deref().and_then(|s| TypeCode::parse(s).ok()),
            gender: gender.as_deref().and_then(Gender::parse),
            partner_type_code: target.as_deref().and_then(|s| TypeCode::parse(s).ok()),
            is_paid,
            mode: Mode::from_db(&mode),
            pending_answers: decode_answers(&pending),
        }))
    }

    // -----------------------------------------------------------------------
    // Interaction state
    // -----------------------------------------------------------------------

    /// Set the interaction mode.
    pub fn set_mode(&self, user_id: &str, mode: Mode) -> BotResult<()> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE users SET mode = ?1 WHERE user_id = ?2",
            params![mode.as_str(), user_id],
        )?;
        Ok(())
    }

    /// Reset the in-progress answer buffer.
    pub fn clear_pending_answers(&self, user_id: &str) -> BotResult<()> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE users SET pending_answers = '' WHERE user_id = ?1",
            params![user_id],
        )?;
        Ok(())
    }

    /// Append one answer bit to the buffer.
    pub fn append_pending_answer(&self, user_id: &str, answer: bool) -> BotResult<()> {
        let conn = self.open()?;
        let bit = if answer { "1" } else { "0" };
        conn.execute(
            "UPDATE users SET pending_answers = pending_answers || ?1 WHERE user_id = ?2",
            params![bit, user_id],
        )?;
        Ok(())
    }

    /// Answers recorded so far in the active session.
    pub fn pending_answers(&self, user_id: &str) -> BotResult<Vec<bool>> {
        let conn = self.open()?;
        let encoded: Option<String> = conn
            .query_row(
                "SELECT pending_answers FROM users WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(encoded.as_deref().map(decode_answers).unwrap_or_default())
    }

    /// Persist a completed diagnosis: write the type code, return to idle,
    /// drop the buffer. One statement so a crash can't leave a half-committed
    /// session.
    pub fn commit_type_code(&self, user_id: &str, code: &TypeCode) -> BotResult<()> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE users SET mbti = ?1, mode = '', pending_answers = '' WHERE user_id = ?2",
            params![code.as_str(), user_id],
        )?;
        Ok(())
    }

    /// Persist a registered gender and return to idle.
    pub fn set_gender(&self, user_id: &str, gender: Gender) -> BotResult<()> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE users SET gender = ?1, mode = '' WHERE user_id = ?2",
            params![gender.as_str(), user_id],
        )?;
        Ok(())
    }

    /// Persist a registered partner type and return to idle.
    pub fn set_partner_type(&self, user_id: &str, code: &TypeCode) -> BotResult<()> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE users SET target_mbti = ?1, mode = '' WHERE user_id = ?2",
            params![code.as_str(), user_id],
        )?;
        Ok(())
    }

    /// Set the payment flag, creating the profile row if the webhook beat
    /// the user's first message.
    pub fn set_paid(&self, user_id: &str, paid: bool) -> BotResult<()> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO users (user_id, is_paid) VALUES (?1, ?2)
             ON CONFLICT(user_id) DO UPDATE SET is_paid = excluded.is_paid",
            params![user_id, paid],
        )?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Billing identities
    // -----------------------------------------------------------------------

    /// Record the Stripe customer id attached to a user after checkout.
    pub fn record_customer(&self, customer_id: &str, user_id: &str) -> BotResult<()> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO stripe_customers (customer_id, user_id) VALUES (?1, ?2)
             ON CONFLICT(customer_id) DO UPDATE SET user_id = excluded.user_id",
            params![customer_id, user_id],
        )?;
        Ok(())
    }

    /// Stripe customer id for a user, or [`BotError::NotFound`] if the user
    /// has never completed a checkout.
    pub fn customer_for_user(&self, user_id: &str) -> BotResult<String> {
        let conn = self.open()?;
        conn.query_row(
            "SELECT customer_id FROM stripe_customers WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| BotError::NotFound(format!("no billing record for user {}", user_id)))
    }

    // -----------------------------------------------------------------------
    // Chat history
    // -----------------------------------------------------------------------

    /// Append one chat-history entry.
    pub fn save_message(&self, user_id: &str, role: &str, content: &str) -> BotResult<()> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO messages (user_id, role, content) VALUES (?1, ?2, ?3)",
            params![user_id, role, content],
        )?;
        Ok(())
    }

    /// Most recent `limit` history entries, oldest first, rendered as
    /// `"role: content"` lines for prompt assembly.
    pub fn recent_history(&self, user_id: &str, limit: usize) -> BotResult<Vec<String>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT role, content FROM messages
             WHERE user_id = ?1
             ORDER BY timestamp DESC, id DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![user_id, limit as i64], |row| {
            let role: String = row.get(0)?;
            let content: String = row.get(1)?;
            Ok(format!("{}: {}", role, content))
        })?;

        let mut history = Vec::new();
        for row in rows {
            history.push(row?);
        }
        history.reverse();
        Ok(history)
    }
}

fn decode_answers(encoded: &str) -> Vec<bool> {
    encoded.chars().filter_map(|c| match c {
        '1' => Some(true),
        '0' => Some(false),
        _ => None,
    }).collect()
}
