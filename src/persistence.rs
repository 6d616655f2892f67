use crate::db::{Database, RecordRow};
use crate::errors::{AppError, AppResult};
use crate::models::{EntityKind, PersistedRecord, RecordItem, Scope};
use chrono::{DateTime, Utc};
use std::marker::PhantomData;
use std::sync::Arc;

/// Row-level access to the per-kind record tables.
pub trait RecordBackend: Send + Sync {
    fn fetch(&self, kind: EntityKind, scope: Scope) -> AppResult<Option<RecordRow>>;
    fn insert(&self, kind: EntityKind, scope: Scope, data: &str) -> AppResult<RecordRow>;
    fn update(&self, kind: EntityKind, id: i64, data: &str) -> AppResult<DateTime<Utc>>;
    fn delete(&self, kind: EntityKind, id: i64) -> AppResult<()>;
}

impl RecordBackend for Database {
    fn fetch(&self, kind: EntityKind, scope: Scope) -> AppResult<Option<RecordRow>> {
        self.fetch_record(kind, scope)
    }

    fn insert(&self, kind: EntityKind, scope: Scope, data: &str) -> AppResult<RecordRow> {
        self.insert_record(kind, scope, data)
    }

    fn update(&self, kind: EntityKind, id: i64, data: &str) -> AppResult<DateTime<Utc>> {
        self.update_record(kind, id, data)
    }

    fn delete(&self, kind: EntityKind, id: i64) -> AppResult<()> {
        self.delete_record(kind, id)
    }
}

/// Typed load/save of the single record of `T::KIND` for a scope.
pub struct ScopedPersistence<T> {
    backend: Arc<dyn RecordBackend>,
    _item: PhantomData<fn() -> T>,
}

impl<T> Clone for ScopedPersistence<T> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            _item: PhantomData,
        }
    }
}

impl<T: RecordItem> ScopedPersistence<T> {
    pub fn new(backend: Arc<dyn RecordBackend>) -> Self {
        Self {
            backend,
            _item: PhantomData,
        }
    }

    pub fn kind(&self) -> EntityKind {
        T::KIND
    }

    pub fn retrieve(&self, scope: Scope) -> AppResult<Option<PersistedRecord<T>>> {
        let Some(row) = self.backend.fetch(T::KIND, scope)? else {
            return Ok(None);
        };

        let data = serde_json::from_str::<Vec<T>>(&row.data).map_err(|error| {
            AppError::InvalidRecord(format!(
                "{} record {} could not be decoded: {}",
                T::KIND.as_str(),
                row.id,
                error
            ))
        })?;

        Ok(Some(PersistedRecord {
            id: Some(row.id),
            scope: row.scope,
            data,
            updated_at: Some(row.updated_at),
        }))
    }

    /// Inserts an unsaved record (assigning its id) or overwrites a saved one.
    pub fn save(&self, record: &mut PersistedRecord<T>) -> AppResult<()> {
        let data = serde_json::to_string(&record.data)?;
        match record.id {
            Some(id) => {
                record.updated_at = Some(self.backend.update(T::KIND, id, &data)?);
            }
            None => {
                let row = self.backend.insert(T::KIND, record.scope, &data)?;
                record.id = Some(row.id);
                record.scope = row.scope;
                record.updated_at = Some(row.updated_at);
            }
        }
        Ok(())
    }

    pub fn delete(&self, record: &PersistedRecord<T>) -> AppResult<()> {
        let id = record.id.ok_or_else(|| {
            AppError::MissingIdentity(format!("{} record has not been saved", T::KIND.as_str()))
        })?;
        self.backend.delete(T::KIND, id)
    }

    /// Writes `data` as the full content of the scope's record, creating it on first use.
    pub fn save_snapshot(&self, scope: Scope, data: Vec<T>) -> AppResult<PersistedRecord<T>> {
        let mut record = match self.backend.fetch(T::KIND, scope)? {
            Some(row) => PersistedRecord {
                id: Some(row.id),
                scope: row.scope,
                data,
                updated_at: Some(row.updated_at),
            },
            None => PersistedRecord::new(scope.for_kind(T::KIND), data),
        };
        self.save(&mut record)?;
        Ok(record)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::RecordBackend;
    use crate::db::RecordRow;
    use crate::errors::{AppError, AppResult};
    use crate::models::{EntityKind, Scope};
    use chrono::{DateTime, Utc};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
    use std::sync::Mutex;

    /// In-memory backend that records every write it receives.
    #[derive(Default)]
    pub struct MemoryBackend {
        rows: Mutex<HashMap<(EntityKind, Scope), RecordRow>>,
        writes: Mutex<Vec<(EntityKind, Scope, String)>>,
        next_id: AtomicI64,
        pub unavailable: AtomicBool,
    }

    impl MemoryBackend {
        pub fn writes(&self) -> Vec<(EntityKind, Scope, String)> {
            self.writes.lock().expect("writes lock").clone()
        }

        pub fn stored(&self, kind: EntityKind, scope: Scope) -> Option<String> {
            let rows = self.rows.lock().expect("rows lock");
            rows.get(&(kind, scope.for_kind(kind))).map(|row| row.data.clone())
        }

        fn check(&self) -> AppResult<()> {
            if self.unavailable.load(Ordering::SeqCst) {
                return Err(AppError::StoreUnavailable("backend offline".to_string()));
            }
            Ok(())
        }
    }

    impl RecordBackend for MemoryBackend {
        fn fetch(&self, kind: EntityKind, scope: Scope) -> AppResult<Option<RecordRow>> {
            self.check()?;
            let rows = self.rows.lock().expect("rows lock");
            Ok(rows.get(&(kind, scope.for_kind(kind))).cloned())
        }

        fn insert(&self, kind: EntityKind, scope: Scope, data: &str) -> AppResult<RecordRow> {
            self.check()?;
            let scope = scope.for_kind(kind);
            let mut rows = self.rows.lock().expect("rows lock");
            let id = rows
                .get(&(kind, scope))
                .map(|row| row.id)
                .unwrap_or_else(|| self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
            let row = RecordRow {
                id,
                scope,
                data: data.to_string(),
                updated_at: Utc::now(),
            };
            rows.insert((kind, scope), row.clone());
            self.writes
                .lock()
                .expect("writes lock")
                .push((kind, scope, data.to_string()));
            Ok(row)
        }

        fn update(&self, kind: EntityKind, id: i64, data: &str) -> AppResult<DateTime<Utc>> {
            self.check()?;
            let mut rows = self.rows.lock().expect("rows lock");
            let Some(row) = rows.values_mut().find(|row| row.id == id) else {
                return Err(AppError::StaleRecord(format!("row {} missing", id)));
            };
            row.data = data.to_string();
            row.updated_at = Utc::now();
            self.writes
                .lock()
                .expect("writes lock")
                .push((kind, row.scope, data.to_string()));
            Ok(row.updated_at)
        }

        fn delete(&self, kind: EntityKind, id: i64) -> AppResult<()> {
            self.check()?;
            let mut rows = self.rows.lock().expect("rows lock");
            let before = rows.len();
            rows.retain(|(row_kind, _), row| !(*row_kind == kind && row.id == id));
            if rows.len() == before {
                return Err(AppError::StaleRecord(format!("row {} missing", id)));
            }
            Ok(())
        }
    }
}
