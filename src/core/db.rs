use std::path::PathBuf;

use sqlx::{migrate::MigrateDatabase, sqlite::Sqlite, SqlitePool};

use crate::{
    core::participant::{AttendanceState, Participant},
    error::Error,
};

/// Persistent store for the duty roster, the participant registry, the
/// key-value settings and the last announcement handle.
///
/// Every mutation is written through immediately; multi-step mutations run
/// inside a transaction.
pub struct DutyDb {
    db: SqlitePool,
}

impl DutyDb {
    pub async fn init(file: &PathBuf) -> anyhow::Result<Self> {
        let url = format!("sqlite://{}", file.display());
        Sqlite::create_database(&url).await?;

        let db = SqlitePool::connect(&url).await?;
        let store = DutyDb { db };
        store.create_tables().await?;
        Ok(store)
    }

    pub async fn load(file: &PathBuf) -> anyhow::Result<Self> {
        let url = format!("sqlite://{}", file.display());
        let db = SqlitePool::connect(&url).await?;
        Ok(DutyDb { db })
    }

    #[cfg(test)]
    pub async fn init_in_memory() -> anyhow::Result<Self> {
        // A single connection, otherwise every pooled connection would get
        // its own empty in-memory database.
        let db = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = DutyDb { db };
        store.create_tables().await?;
        Ok(store)
    }

    async fn create_tables(&self) -> anyhow::Result<()> {
        sqlx::query(
            "create table participants(
                        id integer primary key not null,
                        name text not null collate nocase,
                        role text not null,
                        approval text not null,
                        attendance text not null,
                        absence_reason text
                    );",
        )
        .execute(&self.db)
        .await?;

        sqlx::query(
            "create table roster(
                        position integer primary key autoincrement,
                        name text not null collate nocase
                    );",
        )
        .execute(&self.db)
        .await?;

        sqlx::query(
            "create table settings(
                        key text primary key not null,
                        value text not null
                    );",
        )
        .execute(&self.db)
        .await?;

        sqlx::query(
            "create table duty_message(
                        id integer primary key check (id = 1),
                        channel text not null,
                        message_handle text not null
                    );",
        )
        .execute(&self.db)
        .await?;

        Ok(())
    }

    // ---- participant registry ----

    /// Ensures the moderator record exists. Safe to call on every startup.
    pub async fn provision_moderator(&self, id: i64) -> anyhow::Result<()> {
        Ok(sqlx::query(
            "insert or ignore into participants(id, name, role, approval, attendance)
                    values(?, 'Moderator', 'moderator', 'approved', 'unknown')",
        )
        .bind(id)
        .execute(&self.db)
        .await
        .map(|_| ())?)
    }

    /// Registers a pending student. Re-registration under the same id
    /// replaces the old record; a name held by anybody else is rejected.
    pub async fn insert_pending(&self, id: i64, name: &str) -> anyhow::Result<()> {
        let mut tx = self.db.begin().await?;
        let taken: u32 =
            sqlx::query_scalar("select count(*) from participants where name = ? and id != ?")
                .bind(name)
                .bind(id)
                .fetch_one(&mut *tx)
                .await?;
        if taken > 0 {
            return Err(Error::Validation(format!("The name {} is already registered.", name)).into());
        }

        sqlx::query(
            "insert or replace into participants(id, name, role, approval, attendance, absence_reason)
                    values(?, ?, 'student', 'pending', 'unknown', null)",
        )
        .bind(id)
        .bind(name)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn approve(&self, id: i64) -> anyhow::Result<()> {
        Ok(
            sqlx::query("update participants set approval = 'approved' where id = ?")
                .bind(id)
                .execute(&self.db)
                .await
                .map(|_| ())?,
        )
    }

    pub async fn set_attendance(
        &self,
        id: i64,
        attendance: AttendanceState,
        reason: Option<&str>,
    ) -> anyhow::Result<()> {
        Ok(
            sqlx::query("update participants set attendance = ?, absence_reason = ? where id = ?")
                .bind(attendance)
                .bind(reason)
                .bind(id)
                .execute(&self.db)
                .await
                .map(|_| ())?,
        )
    }

    pub async fn find_by_id(&self, id: i64) -> anyhow::Result<Option<Participant>> {
        Ok(
            sqlx::query_as("select * from participants where id = ? limit 1")
                .bind(id)
                .fetch_optional(&self.db)
                .await?,
        )
    }

    pub async fn find_by_name(&self, name: &str) -> anyhow::Result<Option<Participant>> {
        Ok(
            sqlx::query_as("select * from participants where name = ? limit 1")
                .bind(name)
                .fetch_optional(&self.db)
                .await?,
        )
    }

    pub async fn delete_participant(&self, id: i64) -> anyhow::Result<()> {
        Ok(sqlx::query("delete from participants where id = ?")
            .bind(id)
            .execute(&self.db)
            .await
            .map(|_| ())?)
    }

    /// Deletes a student by name, returning whether a record existed.
    pub async fn delete_by_name(&self, name: &str) -> anyhow::Result<bool> {
        Ok(
            sqlx::query("delete from participants where name = ? and role = 'student'")
                .bind(name)
                .execute(&self.db)
                .await
                .map(|r| r.rows_affected() > 0)?,
        )
    }

    /// Removes every student record, returning the removed records so the
    /// caller can notify them.
    pub async fn delete_all_students(&self) -> anyhow::Result<Vec<Participant>> {
        let mut tx = self.db.begin().await?;
        let students: Vec<Participant> =
            sqlx::query_as("select * from participants where role = 'student'")
                .fetch_all(&mut *tx)
                .await?;
        sqlx::query("delete from participants where role = 'student'")
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(students)
    }

    pub async fn approved_students(&self) -> anyhow::Result<Vec<Participant>> {
        Ok(sqlx::query_as(
            "select * from participants
                        where role = 'student' and approval = 'approved'
                        order by name asc",
        )
        .fetch_all(&self.db)
        .await?)
    }

    /// Names of approved students who answered that they are coming today.
    pub async fn present_names(&self) -> anyhow::Result<Vec<String>> {
        Ok(sqlx::query_scalar(
            "select name from participants
                        where role = 'student'
                        and approval = 'approved'
                        and attendance = 'present'",
        )
        .fetch_all(&self.db)
        .await?)
    }

    /// Puts every student back to an unanswered attendance state.
    pub async fn reset_attendance(&self) -> anyhow::Result<()> {
        Ok(sqlx::query(
            "update participants set attendance = 'unknown', absence_reason = null
                        where role = 'student'",
        )
        .execute(&self.db)
        .await
        .map(|_| ())?)
    }

    // ---- duty roster ----

    pub async fn roster(&self) -> anyhow::Result<Vec<String>> {
        Ok(
            sqlx::query_scalar("select name from roster order by position asc")
                .fetch_all(&self.db)
                .await?,
        )
    }

    pub async fn append_to_roster(&self, name: &str) -> anyhow::Result<()> {
        Ok(sqlx::query("insert into roster(name) values(?)")
            .bind(name)
            .execute(&self.db)
            .await
            .map(|_| ())?)
    }

    pub async fn remove_from_roster(&self, name: &str) -> anyhow::Result<()> {
        Ok(sqlx::query("delete from roster where name = ?")
            .bind(name)
            .execute(&self.db)
            .await
            .map(|_| ())?)
    }

    /// Removes and returns the queue head, or `None` on an empty roster.
    pub async fn pop_roster_head(&self) -> anyhow::Result<Option<String>> {
        let mut tx = self.db.begin().await?;
        let head: Option<(i64, String)> =
            sqlx::query_as("select position, name from roster order by position asc limit 1")
                .fetch_optional(&mut *tx)
                .await?;

        let Some((position, name)) = head else {
            return Ok(None);
        };

        sqlx::query("delete from roster where position = ?")
            .bind(position)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(Some(name))
    }

    pub async fn clear_roster(&self) -> anyhow::Result<()> {
        Ok(sqlx::query("delete from roster")
            .execute(&self.db)
            .await
            .map(|_| ())?)
    }

    /// Replaces the whole queue. The only operation that may reorder it.
    pub async fn replace_roster(&self, names: &[String]) -> anyhow::Result<()> {
        let mut tx = self.db.begin().await?;
        sqlx::query("delete from roster").execute(&mut *tx).await?;
        for name in names {
            sqlx::query("insert into roster(name) values(?)")
                .bind(name)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    // ---- settings ----

    pub async fn setting(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(
            sqlx::query_scalar("select value from settings where key = ?")
                .bind(key)
                .fetch_optional(&self.db)
                .await?,
        )
    }

    pub async fn set_setting(&self, key: &str, value: &str) -> anyhow::Result<()> {
        Ok(
            sqlx::query("insert or replace into settings(key, value) values(?, ?)")
                .bind(key)
                .bind(value)
                .execute(&self.db)
                .await
                .map(|_| ())?,
        )
    }

    pub async fn rotation_started(&self) -> anyhow::Result<bool> {
        Ok(self.setting("rotation_started").await?.as_deref() == Some("true"))
    }

    pub async fn set_rotation_started(&self, started: bool) -> anyhow::Result<()> {
        self.set_setting("rotation_started", if started { "true" } else { "false" })
            .await
    }

    pub async fn channel(&self, default: &str) -> anyhow::Result<String> {
        Ok(self
            .setting("channel")
            .await?
            .unwrap_or_else(|| default.to_string()))
    }

    pub async fn set_channel(&self, channel: &str) -> anyhow::Result<()> {
        self.set_setting("channel", channel).await
    }

    // ---- announcement handle ----

    pub async fn save_duty_message(&self, channel: &str, handle: &str) -> anyhow::Result<()> {
        Ok(sqlx::query(
            "insert or replace into duty_message(id, channel, message_handle) values(1, ?, ?)",
        )
        .bind(channel)
        .bind(handle)
        .execute(&self.db)
        .await
        .map(|_| ())?)
    }

    /// The channel and handle of the last announcement, if one is editable.
    pub async fn duty_message(&self) -> anyhow::Result<Option<(String, String)>> {
        Ok(
            sqlx::query_as("select channel, message_handle from duty_message where id = 1")
                .fetch_optional(&self.db)
                .await?,
        )
    }

    pub async fn clear_duty_message(&self) -> anyhow::Result<()> {
        Ok(sqlx::query("delete from duty_message")
            .execute(&self.db)
            .await
            .map(|_| ())?)
    }

    /// Resolves a roster name to its participant record, or a consistency
    /// error when the registry has no matching row.
    pub async fn resolve_name(&self, name: &str) -> anyhow::Result<Participant> {
        self.find_by_name(name)
            .await?
            .ok_or_else(|| Error::Consistency(format!("no participant record for {}", name)).into())
    }
}
