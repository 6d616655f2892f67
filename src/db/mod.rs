use crate::errors::{AppError, AppResult};
use crate::models::{AppSettings, EntityKind, GameId, Profile, ProfileId, Scope};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const SCHEMA: &str = include_str!("schema.sql");
const SETTINGS_KEY: &str = "app";

/// Raw row of one of the per-kind record tables. `data` is the serialized item list.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordRow {
    pub id: i64,
    pub scope: Scope,
    pub data: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl Database {
    /// Opens the store file, creating parent directories and tables as needed.
    pub fn new(path: &Path) -> AppResult<Self> {
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;

        let db = Self {
            conn: Mutex::new(conn),
            db_path: path.to_owned(),
        };
        db.seed_settings()?;
        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    // ─── Scoped records ─────────────────────────────────────────────────────

    pub fn fetch_record(&self, kind: EntityKind, scope: Scope) -> AppResult<Option<RecordRow>> {
        let scope = scope.for_kind(kind);
        let conn = self.conn.lock().map_err(|_| AppError::poisoned())?;
        conn.query_row(
            &format!(
                "SELECT id, profile_id, game_id, data, updated_at FROM {} WHERE profile_id = ?1 AND game_id = ?2",
                kind.table()
            ),
            params![scope.profile_id, scope.game_id],
            parse_record_row,
        )
        .optional()
        .map_err(AppError::from)
    }

    /// Inserts the row for `scope`, or overwrites the existing one, and returns it.
    pub fn insert_record(&self, kind: EntityKind, scope: Scope, data: &str) -> AppResult<RecordRow> {
        let scope = scope.for_kind(kind);
        let now = Utc::now();
        let conn = self.conn.lock().map_err(|_| AppError::poisoned())?;
        let id: i64 = conn.query_row(
            &format!(
                "INSERT INTO {} (profile_id, game_id, data, updated_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(profile_id, game_id) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at
                 RETURNING id",
                kind.table()
            ),
            params![scope.profile_id, scope.game_id, data, now.to_rfc3339()],
            |row| row.get(0),
        )?;

        Ok(RecordRow {
            id,
            scope,
            data: data.to_string(),
            updated_at: now,
        })
    }

    pub fn update_record(&self, kind: EntityKind, id: i64, data: &str) -> AppResult<DateTime<Utc>> {
        let now = Utc::now();
        let conn = self.conn.lock().map_err(|_| AppError::poisoned())?;
        let changed = conn.execute(
            &format!("UPDATE {} SET data = ?1, updated_at = ?2 WHERE id = ?3", kind.table()),
            params![data, now.to_rfc3339(), id],
        )?;
        if changed == 0 {
            return Err(AppError::StaleRecord(format!("{} row {} no longer exists", kind.table(), id)));
        }
        Ok(now)
    }

    pub fn delete_record(&self, kind: EntityKind, id: i64) -> AppResult<()> {
        let conn = self.conn.lock().map_err(|_| AppError::poisoned())?;
        let changed = conn.execute(&format!("DELETE FROM {} WHERE id = ?1", kind.table()), [id])?;
        if changed == 0 {
            return Err(AppError::StaleRecord(format!("{} row {} no longer exists", kind.table(), id)));
        }
        Ok(())
    }

    // ─── Profiles ───────────────────────────────────────────────────────────

    pub fn list_profiles(&self, game_id: GameId) -> AppResult<Vec<Profile>> {
        let conn = self.conn.lock().map_err(|_| AppError::poisoned())?;
        let mut statement = conn.prepare(
            "SELECT id, game_id, name, is_active, created_at FROM profiles WHERE game_id = ?1 ORDER BY id ASC",
        )?;
        let profiles = statement
            .query_map([game_id], parse_profile_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(profiles)
    }

    pub fn get_profile(&self, profile_id: ProfileId) -> AppResult<Option<Profile>> {
        let conn = self.conn.lock().map_err(|_| AppError::poisoned())?;
        conn.query_row(
            "SELECT id, game_id, name, is_active, created_at FROM profiles WHERE id = ?1",
            [profile_id],
            parse_profile_row,
        )
        .optional()
        .map_err(AppError::from)
    }

    pub fn active_profile(&self, game_id: GameId) -> AppResult<Option<Profile>> {
        let conn = self.conn.lock().map_err(|_| AppError::poisoned())?;
        conn.query_row(
            "SELECT id, game_id, name, is_active, created_at FROM profiles
             WHERE game_id = ?1 AND is_active = 1 ORDER BY id ASC LIMIT 1",
            [game_id],
            parse_profile_row,
        )
        .optional()
        .map_err(AppError::from)
    }

    pub fn insert_profile(&self, game_id: GameId, name: &str) -> AppResult<Profile> {
        let now = Utc::now();
        let conn = self.conn.lock().map_err(|_| AppError::poisoned())?;
        conn.execute(
            "INSERT INTO profiles (game_id, name, is_active, created_at) VALUES (?1, ?2, 0, ?3)",
            params![game_id, name, now.to_rfc3339()],
        )?;

        Ok(Profile {
            id: Some(conn.last_insert_rowid()),
            game_id: Some(game_id),
            name: name.to_string(),
            is_active: false,
            created_at: Some(now),
        })
    }

    pub fn rename_profile(&self, profile_id: ProfileId, name: &str) -> AppResult<()> {
        let conn = self.conn.lock().map_err(|_| AppError::poisoned())?;
        let changed = conn.execute(
            "UPDATE profiles SET name = ?1 WHERE id = ?2",
            params![name, profile_id],
        )?;
        if changed == 0 {
            return Err(AppError::StaleRecord(format!("profile {} no longer exists", profile_id)));
        }
        Ok(())
    }

    /// Clears the active flag for every profile of `game_id` and sets it on
    /// `profile_id`, in one transaction.
    pub fn set_active_profile(&self, profile_id: ProfileId, game_id: GameId) -> AppResult<()> {
        let mut conn = self.conn.lock().map_err(|_| AppError::poisoned())?;
        let tx = conn.transaction()?;
        activate_within(&tx, profile_id, game_id)?;
        tx.commit()?;
        Ok(())
    }

    /// Hands the active flag to `successor`, then removes `profile_id` and every
    /// profile-scoped record it owns.
    pub fn delete_profile_cascade(
        &self,
        profile_id: ProfileId,
        successor: ProfileId,
        game_id: GameId,
    ) -> AppResult<()> {
        let mut conn = self.conn.lock().map_err(|_| AppError::poisoned())?;
        let tx = conn.transaction()?;
        activate_within(&tx, successor, game_id)?;

        for kind in EntityKind::ALL.into_iter().filter(|kind| kind.scoped_by_profile()) {
            tx.execute(
                &format!("DELETE FROM {} WHERE profile_id = ?1 AND game_id = ?2", kind.table()),
                params![profile_id, game_id],
            )?;
        }

        let changed = tx.execute("DELETE FROM profiles WHERE id = ?1", [profile_id])?;
        if changed == 0 {
            return Err(AppError::StaleRecord(format!("profile {} no longer exists", profile_id)));
        }
        tx.commit()?;
        Ok(())
    }

    // ─── Settings ───────────────────────────────────────────────────────────

    pub fn get_settings(&self) -> AppResult<AppSettings> {
        let conn = self.conn.lock().map_err(|_| AppError::poisoned())?;
        read_settings(&conn)
    }

    /// Deep-merges a camelCase JSON patch into the stored settings row.
    pub fn update_settings(&self, update: Value) -> AppResult<AppSettings> {
        let mut conn = self.conn.lock().map_err(|_| AppError::poisoned())?;
        let tx = conn.transaction()?;
        let mut document = serde_json::to_value(read_settings(&tx)?)?;
        deep_merge(&mut document, update);
        let settings = serde_json::from_value::<AppSettings>(document)?;
        write_settings(&tx, &settings, true)?;
        tx.commit()?;
        Ok(settings)
    }

    fn seed_settings(&self) -> AppResult<()> {
        let conn = self.conn.lock().map_err(|_| AppError::poisoned())?;
        write_settings(&conn, &AppSettings::default(), false)
    }
}

fn read_settings(conn: &Connection) -> AppResult<AppSettings> {
    let stored: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?1",
            [SETTINGS_KEY],
            |row| row.get(0),
        )
        .optional()?;
    let Some(raw) = stored else {
        return Ok(AppSettings::default());
    };
    match serde_json::from_str(&raw) {
        Ok(settings) => Ok(settings),
        Err(error) => {
            tracing::warn!(error = %error, "stored settings are unreadable, using defaults");
            Ok(AppSettings::default())
        }
    }
}

fn write_settings(conn: &Connection, settings: &AppSettings, overwrite: bool) -> AppResult<()> {
    let sql = if overwrite {
        "INSERT INTO settings (key, value_json, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json, updated_at = excluded.updated_at"
    } else {
        "INSERT OR IGNORE INTO settings (key, value_json, updated_at) VALUES (?1, ?2, ?3)"
    };
    conn.execute(
        sql,
        params![SETTINGS_KEY, serde_json::to_string(settings)?, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

fn activate_within(conn: &Connection, profile_id: ProfileId, game_id: GameId) -> AppResult<()> {
    conn.execute(
        "UPDATE profiles SET is_active = 0 WHERE game_id = ?1",
        [game_id],
    )?;
    let changed = conn.execute(
        "UPDATE profiles SET is_active = 1 WHERE id = ?1 AND game_id = ?2",
        params![profile_id, game_id],
    )?;
    if changed == 0 {
        return Err(AppError::StaleRecord(format!(
            "profile {} does not exist for game {}",
            profile_id, game_id
        )));
    }
    Ok(())
}

fn parse_record_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RecordRow> {
    Ok(RecordRow {
        id: row.get(0)?,
        scope: Scope::new(row.get(1)?, row.get(2)?),
        data: row.get(3)?,
        updated_at: timestamp_at(row, 4)?,
    })
}

fn parse_profile_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Profile> {
    Ok(Profile {
        id: Some(row.get(0)?),
        game_id: Some(row.get(1)?),
        name: row.get(2)?,
        is_active: row.get(3)?,
        created_at: Some(timestamp_at(row, 4)?),
    })
}

fn timestamp_at(row: &rusqlite::Row<'_>, index: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(index)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|error| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(error)))
}

fn deep_merge(base: &mut Value, patch: Value) {
    let Value::Object(patch_fields) = patch else {
        *base = patch;
        return;
    };
    match base {
        Value::Object(fields) => {
            for (key, value) in patch_fields {
                deep_merge(fields.entry(key).or_insert(Value::Null), value);
            }
        }
        other => *other = Value::Object(patch_fields),
    }
}
