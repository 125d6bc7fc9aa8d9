//! User persistence for gold balance and time zone.

use crate::model::task::UserId;
use crate::model::user::User;
use crate::repo::task_repo::{parse_uuid, RepoError, RepoResult};
use rusqlite::{params, Connection, OptionalExtension};

pub trait UserRepository {
    fn create_user(&self, user: &User) -> RepoResult<UserId>;
    fn get_user(&self, id: UserId) -> RepoResult<Option<User>>;
    fn set_time_zone(&self, id: UserId, time_zone: &str) -> RepoResult<()>;
    /// Adds `amount` to the balance and returns the new balance.
    fn add_gold(&self, id: UserId, amount: i64) -> RepoResult<i64>;
}

pub struct SqliteUserRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteUserRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl UserRepository for SqliteUserRepository<'_> {
    fn create_user(&self, user: &User) -> RepoResult<UserId> {
        if user.display_name.trim().is_empty() {
            return Err(RepoError::InvalidData(
                "user display name must not be blank".to_string(),
            ));
        }
        self.conn.execute(
            "INSERT INTO users (id, display_name, timezone, gold_balance)
             VALUES (?1, ?2, ?3, ?4);",
            params![
                user.id.to_string(),
                user.display_name.as_str(),
                user.time_zone.as_str(),
                user.gold_balance,
            ],
        )?;
        Ok(user.id)
    }

    fn get_user(&self, id: UserId) -> RepoResult<Option<User>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, display_name, timezone, gold_balance FROM users WHERE id = ?1;",
        )?;
        let mut rows = stmt.query([id.to_string()])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        Ok(Some(User {
            id: parse_uuid(row, "id")?,
            display_name: row.get("display_name")?,
            time_zone: row.get("timezone")?,
            gold_balance: row.get("gold_balance")?,
        }))
    }

    fn set_time_zone(&self, id: UserId, time_zone: &str) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE users SET timezone = ?1 WHERE id = ?2;",
            params![time_zone, id.to_string()],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound(id));
        }
        Ok(())
    }

    fn add_gold(&self, id: UserId, amount: i64) -> RepoResult<i64> {
        let balance = self
            .conn
            .query_row(
                "UPDATE users
                 SET gold_balance = gold_balance + ?1
                 WHERE id = ?2
                 RETURNING gold_balance;",
                params![amount, id.to_string()],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        balance.ok_or(RepoError::NotFound(id))
    }
}
