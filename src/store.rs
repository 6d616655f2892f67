use crate::debounce::{DebouncedWriter, DEFAULT_WINDOW};
use crate::errors::{AppError, AppResult};
use crate::models::{
    ActivationItem, AppSettings, EntityKind, InstalledMod, MetaItem, ModType, OrderItem, PersistedRecord,
    RecordItem, Scope, SeparatorItem, SortBy, VersionItem,
};
use crate::notifications::Notifier;
use crate::order;
use crate::persistence::{RecordBackend, ScopedPersistence};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use std::ops::Deref;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Duration;

static COLOR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^#(?:[0-9a-fA-F]{3}|[0-9a-fA-F]{6})$").expect("valid regex"));

/// Nexus mods are re-checked for new releases at most once a week.
pub const VERSION_CHECK_INTERVAL_MS: i64 = 7 * 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    pub debounce: Duration,
    /// When off, edits stay in memory and are never scheduled for saving.
    pub write_back: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_WINDOW,
            write_back: true,
        }
    }
}

impl StoreOptions {
    pub fn from_settings(settings: &AppSettings) -> Self {
        Self {
            debounce: Duration::from_millis(settings.debounce_ms),
            write_back: true,
        }
    }
}

/// Reactive list for one record kind, bound to whichever scope is active.
///
/// Reads are snapshots (`Arc<Vec<T>>`); `set_items` replaces the list and
/// hands a copy to the debounced writer tagged with the scope that was active
/// at the time.
pub struct RecordStore<T: RecordItem> {
    persistence: ScopedPersistence<T>,
    writer: DebouncedWriter<T>,
    items: watch::Sender<Arc<Vec<T>>>,
    scope: watch::Sender<Option<Scope>>,
    write_back: bool,
}

impl<T: RecordItem> RecordStore<T> {
    /// Spawns the store's writer task, so this must run inside a tokio runtime.
    pub fn new(persistence: ScopedPersistence<T>, options: StoreOptions, notifier: Notifier) -> Self {
        let writer = DebouncedWriter::spawn(persistence.clone(), options.debounce, notifier);
        let (items, _) = watch::channel(Arc::new(Vec::new()));
        let (scope, _) = watch::channel(None);
        Self {
            persistence,
            writer,
            items,
            scope,
            write_back: options.write_back,
        }
    }

    pub fn kind(&self) -> EntityKind {
        T::KIND
    }

    pub fn items(&self) -> Arc<Vec<T>> {
        self.items.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<T>>> {
        self.items.subscribe()
    }

    pub fn scope(&self) -> Option<Scope> {
        *self.scope.borrow()
    }

    pub fn debounce_window(&self) -> Duration {
        self.writer.window()
    }

    pub fn write_back(&self) -> bool {
        self.write_back
    }

    /// Replaces the in-memory list right away and schedules a save. An
    /// identical list is a no-op and does not restart the debounce window.
    pub fn set_items(&self, next: Vec<T>) {
        if next == *self.items() {
            return;
        }
        let snapshot = self.write_back().then(|| next.clone());
        self.items.send_replace(Arc::new(next));

        let Some(snapshot) = snapshot else {
            tracing::debug!(kind = T::KIND.as_str(), "write-back disabled; change kept in memory");
            return;
        };
        match self.scope() {
            Some(scope) => self.writer.schedule(scope, snapshot),
            None => tracing::debug!(kind = T::KIND.as_str(), "no active scope; change kept in memory"),
        }
    }

    /// Replaces the list and saves it immediately, returning the outcome.
    pub async fn persist_now(&self, items: Vec<T>) -> AppResult<()> {
        let scope = self.scope().ok_or_else(|| {
            AppError::MissingScope(format!("{} store has no active scope", T::KIND.as_str()))
        })?;
        self.items.send_replace(Arc::new(items.clone()));
        self.writer.write_now(scope, items).await
    }

    /// Points the store at `scope` and reloads its record. Saves still pending
    /// for the previous scope land first, against that scope. When the record
    /// cannot be read the store keeps its previous scope and items.
    pub async fn activate_scope(&self, scope: Scope) -> AppResult<Option<PersistedRecord<T>>> {
        self.writer.flush().await;

        let record = self.persistence.retrieve(scope).map_err(|error| {
            tracing::warn!(
                kind = T::KIND.as_str(),
                profile_id = scope.profile_id,
                game_id = scope.game_id,
                error = %error,
                "scope activation abandoned"
            );
            error
        })?;
        let data = record.as_ref().map(|record| record.data.clone()).unwrap_or_default();
        tracing::debug!(
            kind = T::KIND.as_str(),
            profile_id = scope.profile_id,
            game_id = scope.game_id,
            count = data.len(),
            found = record.is_some(),
            "activated scope"
        );
        self.scope.send_replace(Some(scope));
        self.items.send_replace(Arc::new(data));
        Ok(record)
    }

    /// Detaches from any scope after flushing pending saves.
    pub async fn deactivate(&self) {
        self.writer.flush().await;
        self.scope.send_replace(None);
        self.items.send_replace(Arc::new(Vec::new()));
    }

    pub async fn flush(&self) {
        self.writer.flush().await;
    }

    /// Stores the reconciled list after an activation: creates the record
    /// when none existed, otherwise saves only when something changed.
    async fn settle(&self, loaded: Option<PersistedRecord<T>>, next: Vec<T>) -> AppResult<()> {
        match loaded {
            None if self.write_back() => self.persist_now(next).await,
            Some(record) if record.data == next => Ok(()),
            _ => {
                self.set_items(next);
                Ok(())
            }
        }
    }

    fn update<F>(&self, mutate: F) -> AppResult<()>
    where
        F: FnOnce(&mut Vec<T>) -> AppResult<()>,
    {
        let mut next = self.items().as_ref().clone();
        mutate(&mut next)?;
        self.set_items(next);
        Ok(())
    }
}

/// Builds stores that share one backend and notifier.
#[derive(Clone)]
pub struct StoreFactory {
    backend: Arc<dyn RecordBackend>,
    notifier: Notifier,
    options: StoreOptions,
}

impl StoreFactory {
    pub fn new(backend: Arc<dyn RecordBackend>, notifier: Notifier, options: StoreOptions) -> Self {
        Self {
            backend,
            notifier,
            options,
        }
    }

    pub fn options(&self) -> StoreOptions {
        self.options
    }

    pub fn record_store<T: RecordItem>(&self) -> RecordStore<T> {
        self.record_store_with(self.options)
    }

    pub fn record_store_with<T: RecordItem>(&self, options: StoreOptions) -> RecordStore<T> {
        RecordStore::new(ScopedPersistence::new(self.backend.clone()), options, self.notifier.clone())
    }

    pub fn order_store(&self) -> OrderStore {
        OrderStore::new(self.record_store())
    }

    pub fn activation_store(&self) -> ActivationStore {
        ActivationStore(self.record_store())
    }

    pub fn separator_store(&self) -> SeparatorStore {
        SeparatorStore(self.record_store())
    }

    pub fn meta_store(&self) -> MetaStore {
        MetaStore(self.record_store())
    }

    pub fn version_store(&self) -> VersionStore {
        VersionStore(self.record_store())
    }
}

// ─── Mod order ──────────────────────────────────────────────────────────────

pub struct OrderStore {
    store: RecordStore<OrderItem>,
    selection: watch::Sender<BTreeSet<String>>,
}

impl Deref for OrderStore {
    type Target = RecordStore<OrderItem>;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

impl OrderStore {
    pub fn new(store: RecordStore<OrderItem>) -> Self {
        let (selection, _) = watch::channel(BTreeSet::new());
        Self { store, selection }
    }

    /// `current` is the candidate list from [`order::candidates`].
    pub async fn activate(&self, scope: Scope, current: &[OrderItem]) -> AppResult<()> {
        self.selection.send_replace(BTreeSet::new());
        let loaded = self.store.activate_scope(scope).await?;
        let next = match &loaded {
            Some(record) => order::reconcile(&record.data, current),
            None => order::normalize_order(current.to_vec()),
        };
        self.store.settle(loaded, next).await
    }

    /// Display copy of the list. The stored load order is never title-sorted,
    /// and moves made while a title sort is shown still persist.
    pub fn sorted(&self, sort_by: SortBy) -> Vec<OrderItem> {
        let mut items = self.store.items().as_ref().clone();
        if sort_by == SortBy::Title {
            items.sort_by_cached_key(|item| item.title.to_lowercase());
        }
        items
    }

    pub fn move_to(&self, mod_id: &str, target: i64) -> AppResult<()> {
        let next = order::move_to_position(&self.store.items(), mod_id, target)?;
        self.store.set_items(next);
        Ok(())
    }

    pub fn move_section(&self, separators: &[SeparatorItem], separator_id: &str, target: i64) -> AppResult<()> {
        let next = order::move_section(&self.store.items(), separators, separator_id, target)?;
        self.store.set_items(next);
        Ok(())
    }

    pub fn push_row(&self, mod_id: &str, title: &str) {
        let mut next = self.store.items().as_ref().clone();
        next.push(OrderItem {
            mod_id: mod_id.to_string(),
            order: next.len() as u32 + 1,
            title: title.to_string(),
            mod_file_path: None,
        });
        self.store.set_items(next);
    }

    pub fn rename_row(&self, mod_id: &str, title: &str) -> AppResult<()> {
        self.store.update(|items| {
            let item = items
                .iter_mut()
                .find(|item| item.mod_id == mod_id)
                .ok_or_else(|| AppError::NotFound(format!("mod '{}' is not in the load order", mod_id)))?;
            item.title = title.to_string();
            Ok(())
        })
    }

    pub fn remove_row(&self, mod_id: &str) -> AppResult<()> {
        self.store.update(|items| {
            let before = items.len();
            items.retain(|item| item.mod_id != mod_id);
            if items.len() == before {
                return Err(AppError::NotFound(format!("mod '{}' is not in the load order", mod_id)));
            }
            let normalized = order::normalize_order(std::mem::take(items));
            *items = normalized;
            Ok(())
        })?;
        self.selection.send_if_modified(|selected| selected.remove(mod_id));
        Ok(())
    }

    /// Additive toggles membership; otherwise the row becomes the only
    /// selection, or the selection clears when it already was.
    pub fn toggle_row(&self, mod_id: &str, additive: bool) -> AppResult<()> {
        if !self.store.items().iter().any(|item| item.mod_id == mod_id) {
            return Err(AppError::NotFound(format!("mod '{}' is not in the load order", mod_id)));
        }
        self.selection.send_modify(|selected| {
            if additive {
                if !selected.remove(mod_id) {
                    selected.insert(mod_id.to_string());
                }
            } else if selected.len() == 1 && selected.contains(mod_id) {
                selected.clear();
            } else {
                selected.clear();
                selected.insert(mod_id.to_string());
            }
        });
        Ok(())
    }

    pub fn clear_selection(&self) {
        self.selection.send_replace(BTreeSet::new());
    }

    pub fn is_selected(&self, mod_id: &str) -> bool {
        self.selection.borrow().contains(mod_id)
    }

    /// Selected rows in load order.
    pub fn selected_rows(&self) -> Vec<OrderItem> {
        let selected = self.selection.borrow().clone();
        self.store
            .items()
            .iter()
            .filter(|item| selected.contains(&item.mod_id))
            .cloned()
            .collect()
    }

    pub fn subscribe_selection(&self) -> watch::Receiver<BTreeSet<String>> {
        self.selection.subscribe()
    }
}

// ─── Mod activation ─────────────────────────────────────────────────────────

pub struct ActivationStore(RecordStore<ActivationItem>);

impl Deref for ActivationStore {
    type Target = RecordStore<ActivationItem>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl ActivationStore {
    /// Known mods keep their flag, new ones start inactive. A scope seen for
    /// the first time starts with every mod active.
    pub async fn activate(&self, scope: Scope, installed: &[InstalledMod]) -> AppResult<()> {
        let loaded = self.0.activate_scope(scope).await?;
        let next = match &loaded {
            Some(record) => {
                let known: HashMap<&str, bool> = record
                    .data
                    .iter()
                    .map(|item| (item.mod_id.as_str(), item.is_active))
                    .collect();
                let (kept, added): (Vec<_>, Vec<_>) = installed
                    .iter()
                    .map(|installed| ActivationItem {
                        mod_id: installed.identifier.clone(),
                        is_active: known.get(installed.identifier.as_str()).copied().unwrap_or(false),
                        title: installed.title.clone(),
                    })
                    .partition(|item| known.contains_key(item.mod_id.as_str()));
                kept.into_iter().chain(added).collect()
            }
            None => installed
                .iter()
                .map(|installed| ActivationItem {
                    mod_id: installed.identifier.clone(),
                    is_active: true,
                    title: installed.title.clone(),
                })
                .collect(),
        };
        self.0.settle(loaded, next).await
    }

    /// Flips one mod and returns its new state.
    pub fn toggle(&self, mod_id: &str) -> AppResult<bool> {
        let mut state = false;
        self.0.update(|items| {
            let item = items
                .iter_mut()
                .find(|item| item.mod_id == mod_id)
                .ok_or_else(|| AppError::NotFound(format!("mod '{}' has no activation entry", mod_id)))?;
            item.is_active = !item.is_active;
            state = item.is_active;
            Ok(())
        })?;
        Ok(state)
    }

    pub fn set_all(&self, active: bool) {
        let next = self
            .0
            .items()
            .iter()
            .map(|item| ActivationItem {
                is_active: active,
                ..item.clone()
            })
            .collect();
        self.0.set_items(next);
    }

    pub fn is_active(&self, mod_id: &str) -> bool {
        self.0.items().iter().any(|item| item.mod_id == mod_id && item.is_active)
    }

    pub fn active_ids(&self) -> Vec<String> {
        self.0
            .items()
            .iter()
            .filter(|item| item.is_active)
            .map(|item| item.mod_id.clone())
            .collect()
    }
}

// ─── Separators ─────────────────────────────────────────────────────────────

pub struct SeparatorStore(RecordStore<SeparatorItem>);

impl Deref for SeparatorStore {
    type Target = RecordStore<SeparatorItem>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl SeparatorStore {
    pub async fn activate(&self, scope: Scope) -> AppResult<()> {
        let loaded = self.0.activate_scope(scope).await?;
        let next = loaded.as_ref().map(|record| record.data.clone()).unwrap_or_default();
        self.0.settle(loaded, next).await
    }

    pub fn create(&self, title: &str, background_color: &str, text_color: &str) -> AppResult<SeparatorItem> {
        let title = title.trim();
        if title.is_empty() {
            return Err(AppError::InvalidRecord("separator title cannot be empty".to_string()));
        }
        validate_color(background_color)?;
        validate_color(text_color)?;

        let separator = SeparatorItem {
            identifier: format!("separator_{}", uuid::Uuid::new_v4()),
            title: title.to_string(),
            background_color: background_color.to_string(),
            text_color: text_color.to_string(),
            collapsed: false,
        };
        let created = separator.clone();
        self.0.update(move |items| {
            if items.iter().any(|item| item.title == separator.title) {
                return Err(AppError::DuplicateName(format!(
                    "separator '{}' already exists",
                    separator.title
                )));
            }
            items.push(separator);
            Ok(())
        })?;
        Ok(created)
    }

    /// Replaces title and colours of an existing separator; the identifier is
    /// the merge key.
    pub fn update(&self, separator: SeparatorItem) -> AppResult<()> {
        if separator.title.trim().is_empty() {
            return Err(AppError::InvalidRecord("separator title cannot be empty".to_string()));
        }
        validate_color(&separator.background_color)?;
        validate_color(&separator.text_color)?;

        self.0.update(|items| {
            if items
                .iter()
                .any(|item| item.identifier != separator.identifier && item.title == separator.title)
            {
                return Err(AppError::DuplicateName(format!(
                    "separator '{}' already exists",
                    separator.title
                )));
            }
            let existing = items
                .iter_mut()
                .find(|item| item.identifier == separator.identifier)
                .ok_or_else(|| AppError::NotFound(format!("separator '{}' does not exist", separator.identifier)))?;
            *existing = separator;
            Ok(())
        })
    }

    pub fn remove(&self, identifier: &str) -> AppResult<SeparatorItem> {
        let mut removed = None;
        self.0.update(|items| {
            let index = items
                .iter()
                .position(|item| item.identifier == identifier)
                .ok_or_else(|| AppError::NotFound(format!("separator '{}' does not exist", identifier)))?;
            removed = Some(items.remove(index));
            Ok(())
        })?;
        removed.ok_or_else(|| AppError::Internal("separator removal produced no item".to_string()))
    }

    pub fn toggle_collapse(&self, identifier: &str) -> AppResult<bool> {
        let mut collapsed = false;
        self.0.update(|items| {
            let item = items
                .iter_mut()
                .find(|item| item.identifier == identifier)
                .ok_or_else(|| AppError::NotFound(format!("separator '{}' does not exist", identifier)))?;
            item.collapsed = !item.collapsed;
            collapsed = item.collapsed;
            Ok(())
        })?;
        Ok(collapsed)
    }

    pub fn is_collapsed(&self, identifier: &str) -> bool {
        self.0
            .items()
            .iter()
            .any(|item| item.identifier == identifier && item.collapsed)
    }
}

pub fn validate_color(value: &str) -> AppResult<()> {
    if COLOR_PATTERN.is_match(value) {
        Ok(())
    } else {
        Err(AppError::InvalidRecord(format!("'{}' is not a #rgb or #rrggbb colour", value)))
    }
}

// ─── Mod metadata ───────────────────────────────────────────────────────────

pub struct MetaStore(RecordStore<MetaItem>);

impl Deref for MetaStore {
    type Target = RecordStore<MetaItem>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl MetaStore {
    /// Known entries are kept as-is; new mods get a blank entry.
    pub async fn activate(&self, scope: Scope, installed: &[InstalledMod]) -> AppResult<()> {
        let loaded = self.0.activate_scope(scope).await?;
        let known: HashMap<&str, &MetaItem> = loaded
            .iter()
            .flat_map(|record| record.data.iter())
            .map(|item| (item.mod_id.as_str(), item))
            .collect();
        let next = installed
            .iter()
            .map(|installed| match known.get(installed.identifier.as_str()) {
                Some(item) => (*item).clone(),
                None => MetaItem {
                    mod_id: installed.identifier.clone(),
                    title: String::new(),
                    categories: String::new(),
                    version: String::new(),
                },
            })
            .collect();
        self.0.settle(loaded, next).await
    }

    pub fn get(&self, mod_id: &str) -> Option<MetaItem> {
        self.0.items().iter().find(|item| item.mod_id == mod_id).cloned()
    }

    /// Overwrites the user-editable fields of one entry.
    pub fn annotate(&self, mod_id: &str, title: &str, categories: &str, version: &str) -> AppResult<()> {
        self.0.update(|items| {
            let item = items
                .iter_mut()
                .find(|item| item.mod_id == mod_id)
                .ok_or_else(|| AppError::NotFound(format!("mod '{}' has no metadata entry", mod_id)))?;
            item.title = title.trim().to_string();
            item.categories = categories.trim().to_string();
            item.version = version.trim().to_string();
            Ok(())
        })
    }
}

// ─── Mod versions ───────────────────────────────────────────────────────────

pub struct VersionStore(RecordStore<VersionItem>);

impl Deref for VersionStore {
    type Target = RecordStore<VersionItem>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl VersionStore {
    /// Refreshes installed versions while keeping check history. First-seen
    /// mods treat their installed version as the latest.
    pub async fn activate(&self, scope: Scope, installed: &[InstalledMod]) -> AppResult<()> {
        let loaded = self.0.activate_scope(scope).await?;
        let known: HashMap<&str, &VersionItem> = loaded
            .iter()
            .flat_map(|record| record.data.iter())
            .map(|item| (item.mod_id.as_str(), item))
            .collect();
        let next = installed
            .iter()
            .map(|installed| {
                let (last_time_checked, latest_version) = match known.get(installed.identifier.as_str()) {
                    Some(item) => (item.last_time_checked, item.latest_version.clone()),
                    None => (installed.updated_at, installed.version.clone()),
                };
                VersionItem {
                    mod_id: installed.identifier.clone(),
                    mod_type: installed.mod_type,
                    title: installed.title.clone(),
                    version: installed.version.clone(),
                    last_time_checked,
                    latest_version,
                    url: installed.url.clone(),
                }
            })
            .collect();
        self.0.settle(loaded, next).await
    }

    /// Mods whose installed version differs from the latest one known.
    pub fn changed_mods(&self) -> Vec<VersionItem> {
        self.0
            .items()
            .iter()
            .filter(|item| item.version != item.latest_version)
            .cloned()
            .collect()
    }

    /// Nexus mods whose last remote check is older than the check interval.
    pub fn due_for_check(&self, now_ms: i64) -> Vec<VersionItem> {
        self.0
            .items()
            .iter()
            .filter(|item| item.mod_type == ModType::NexusMod)
            .filter(|item| now_ms - item.last_time_checked > VERSION_CHECK_INTERVAL_MS)
            .cloned()
            .collect()
    }

    pub fn record_latest(&self, mod_id: &str, latest_version: &str, checked_at_ms: i64) -> AppResult<()> {
        self.0.update(|items| {
            let item = find_version(items, mod_id)?;
            item.latest_version = latest_version.to_string();
            item.last_time_checked = checked_at_ms;
            Ok(())
        })
    }

    /// Marks the installed version as seen so the mod drops out of `changed_mods`.
    pub fn acknowledge(&self, mod_id: &str) -> AppResult<()> {
        self.0.update(|items| {
            let item = find_version(items, mod_id)?;
            item.latest_version = item.version.clone();
            Ok(())
        })
    }
}

fn find_version<'a>(items: &'a mut [VersionItem], mod_id: &str) -> AppResult<&'a mut VersionItem> {
    items
        .iter_mut()
        .find(|item| item.mod_id == mod_id)
        .ok_or_else(|| AppError::NotFound(format!("mod '{}' has no version entry", mod_id)))
}

#[cfg(test)]
mod tests {
    use super::{validate_color, StoreFactory, StoreOptions};
    use crate::models::{ActivationItem, AppSettings, EntityKind, InstalledMod, ModType, OrderItem, Scope, SortBy};
    use crate::notifications::Notifier;
    use crate::order;
    use crate::persistence::testing::MemoryBackend;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use tokio::time::Duration;

    fn factory(backend: &Arc<MemoryBackend>) -> StoreFactory {
        StoreFactory::new(backend.clone(), Notifier::default(), StoreOptions::default())
    }

    fn installed(id: &str, mod_type: ModType, version: &str) -> InstalledMod {
        InstalledMod {
            identifier: id.to_string(),
            title: id.to_uppercase(),
            mod_type,
            mod_file_path: Some(format!("/workshop/{}.pack", id)),
            version: version.to_string(),
            updated_at: 1_700_000_000_000,
            url: None,
        }
    }

    fn mods(ids: &[&str]) -> Vec<InstalledMod> {
        ids.iter().map(|id| installed(id, ModType::SteamMod, "1")).collect()
    }

    fn ids(items: &[OrderItem]) -> Vec<&str> {
        items.iter().map(|item| item.mod_id.as_str()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_moves_collapse_into_one_save() {
        let backend = Arc::new(MemoryBackend::default());
        let store = factory(&backend).order_store();
        let scope = Scope::new(1, 1142710);
        store
            .activate(scope, &order::candidates(&mods(&["a", "b", "c", "d"]), &[]))
            .await
            .expect("activate");
        let initial_writes = backend.writes().len();

        for (mod_id, target) in [("a", 4), ("b", 3), ("c", 1), ("d", 2)] {
            store.move_to(mod_id, target).expect("move");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let expected = store.items();
        tokio::time::sleep(Duration::from_millis(400)).await;

        let writes = backend.writes();
        assert_eq!(writes.len(), initial_writes + 1);
        let saved: Vec<OrderItem> = serde_json::from_str(&writes[writes.len() - 1].2).expect("decode");
        assert_eq!(saved, *expected);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_move_leaves_list_and_store_untouched() {
        let backend = Arc::new(MemoryBackend::default());
        let store = factory(&backend).order_store();
        store
            .activate(Scope::new(1, 594570), &order::candidates(&mods(&["a", "b"]), &[]))
            .await
            .expect("activate");
        let before = store.items();
        let writes = backend.writes().len();

        let err = store.move_to("missing", 1).expect_err("unknown");
        assert_eq!(err.code(), "NOT_FOUND");
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(store.items(), before);
        assert_eq!(backend.writes().len(), writes);
    }

    #[tokio::test(start_paused = true)]
    async fn scope_switch_reloads_and_keeps_pending_save_on_old_scope() {
        let backend = Arc::new(MemoryBackend::default());
        let store = factory(&backend).activation_store();
        let first = Scope::new(1, 594570);
        let second = Scope::new(2, 594570);

        store.activate(first, &mods(&["a", "b"])).await.expect("first");
        store.toggle("a").expect("toggle");
        store.activate(second, &mods(&["a", "b"])).await.expect("second");

        assert!(store.is_active("a"), "second scope starts fresh");
        tokio::time::sleep(Duration::from_secs(1)).await;
        let stored_first = backend.stored(EntityKind::ModActivation, first).expect("first row");
        assert!(stored_first.contains("\"isActive\":false"));
        let stored_second = backend.stored(EntityKind::ModActivation, second).expect("second row");
        assert!(!stored_second.contains("false"));
    }

    #[tokio::test(start_paused = true)]
    async fn activation_merge_marks_new_mods_inactive() {
        let backend = Arc::new(MemoryBackend::default());
        let store = factory(&backend).activation_store();
        let scope = Scope::new(1, 1142710);

        store.activate(scope, &mods(&["a", "b"])).await.expect("create");
        assert_eq!(store.active_ids(), vec!["a".to_string(), "b".to_string()]);
        store.set_all(false);
        store.flush().await;

        store.activate(scope, &mods(&["new", "b"])).await.expect("merge");
        let items = store.items();
        let listed: Vec<(&str, bool)> = items.iter().map(|item| (item.mod_id.as_str(), item.is_active)).collect();
        assert_eq!(listed, vec![("b", false), ("new", false)]);
        assert!(store.toggle("new").expect("toggle"));
        assert_eq!(store.toggle("ghost").expect_err("missing").code(), "NOT_FOUND");
    }

    #[tokio::test(start_paused = true)]
    async fn order_merge_keeps_positions_and_appends() {
        let backend = Arc::new(MemoryBackend::default());
        let store = factory(&backend).order_store();
        let scope = Scope::new(1, 1142710);

        store
            .activate(scope, &order::candidates(&mods(&["a", "b", "c"]), &[]))
            .await
            .expect("create");
        store.move_to("c", 1).expect("move");
        store.flush().await;

        store
            .activate(scope, &order::candidates(&mods(&["a", "c", "d"]), &[]))
            .await
            .expect("merge");
        assert_eq!(ids(&store.items()), vec!["c", "a", "d"]);
    }

    #[tokio::test(start_paused = true)]
    async fn row_selection_follows_load_order() {
        let backend = Arc::new(MemoryBackend::default());
        let store = factory(&backend).order_store();
        store
            .activate(Scope::new(1, 594570), &order::candidates(&mods(&["a", "b", "c"]), &[]))
            .await
            .expect("activate");

        store.toggle_row("c", false).expect("select c");
        store.toggle_row("a", true).expect("add a");
        assert_eq!(ids(&store.selected_rows()), vec!["a", "c"]);

        store.toggle_row("a", true).expect("drop a");
        assert_eq!(ids(&store.selected_rows()), vec!["c"]);
        store.toggle_row("c", false).expect("deselect");
        assert!(store.selected_rows().is_empty());

        store.toggle_row("b", false).expect("select b");
        store.clear_selection();
        assert!(!store.is_selected("b"));
        assert_eq!(store.toggle_row("zzz", true).expect_err("missing").code(), "NOT_FOUND");
    }

    #[tokio::test(start_paused = true)]
    async fn title_sort_is_display_only() {
        let backend = Arc::new(MemoryBackend::default());
        let store = factory(&backend).order_store();
        store
            .activate(Scope::new(1, 594570), &order::candidates(&mods(&["b", "a"]), &[]))
            .await
            .expect("activate");
        let writes = backend.writes().len();

        assert_eq!(ids(&store.sorted(SortBy::Title)), vec!["a", "b"]);
        assert_eq!(ids(&store.items()), vec!["b", "a"]);

        store.move_to("a", 1).expect("move");
        store.flush().await;
        let all = backend.writes();
        assert_eq!(all.len(), writes + 1);
        let saved: Vec<OrderItem> = serde_json::from_str(&all[writes].2).expect("decode");
        assert_eq!(ids(&saved), vec!["a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn identical_list_does_not_schedule_a_save() {
        let backend = Arc::new(MemoryBackend::default());
        let store = factory(&backend).order_store();
        store
            .activate(Scope::new(1, 594570), &order::candidates(&mods(&["a", "b"]), &[]))
            .await
            .expect("activate");
        let writes = backend.writes().len();

        store.set_items(store.items().as_ref().clone());
        store.move_to("a", 1).expect("already first");
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(backend.writes().len(), writes);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_activation_keeps_previous_scope_and_items() {
        let backend = Arc::new(MemoryBackend::default());
        let store = factory(&backend).separator_store();
        let saved = Scope::new(2, 1142710);
        let other = Scope::new(3, 1142710);

        store.activate(saved).await.expect("saved scope");
        store.create("One", "#111", "#fff").expect("one");
        store.create("Two", "#222", "#fff").expect("two");
        store.activate(other).await.expect("other scope");
        store.create("Other", "#333", "#fff").expect("other");
        store.flush().await;

        backend.unavailable.store(true, Ordering::SeqCst);
        let err = store.activate(saved).await.expect_err("offline");
        assert_eq!(err.code(), "STORE_UNAVAILABLE");
        backend.unavailable.store(false, Ordering::SeqCst);

        assert_eq!(store.scope(), Some(other));
        assert_eq!(store.items().len(), 1);
        assert_eq!(store.items()[0].title, "Other");

        store.create("Three", "#444", "#fff").expect("three");
        tokio::time::sleep(Duration::from_secs(1)).await;
        let stored_saved = backend.stored(EntityKind::ModSeparator, saved).expect("saved row");
        assert!(stored_saved.contains("One") && stored_saved.contains("Two"));
        assert!(!stored_saved.contains("Three"));
        let stored_other = backend.stored(EntityKind::ModSeparator, other).expect("other row");
        assert!(stored_other.contains("Three"));
    }

    #[tokio::test(start_paused = true)]
    async fn each_store_uses_its_own_debounce_window() {
        let backend = Arc::new(MemoryBackend::default());
        let factory = factory(&backend);
        let fast = factory.record_store_with::<ActivationItem>(StoreOptions {
            debounce: Duration::from_millis(50),
            ..StoreOptions::default()
        });
        let slow = factory.record_store::<ActivationItem>();
        assert_eq!(fast.debounce_window(), Duration::from_millis(50));
        assert_eq!(slow.debounce_window(), Duration::from_millis(300));

        let fast_scope = Scope::new(1, 594570);
        let slow_scope = Scope::new(2, 594570);
        fast.activate_scope(fast_scope).await.expect("fast scope");
        slow.activate_scope(slow_scope).await.expect("slow scope");
        let item = ActivationItem {
            mod_id: "a".to_string(),
            is_active: true,
            title: "A".to_string(),
        };
        fast.set_items(vec![item.clone()]);
        slow.set_items(vec![item]);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(backend.stored(EntityKind::ModActivation, fast_scope).is_some());
        assert!(backend.stored(EntityKind::ModActivation, slow_scope).is_none());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(backend.stored(EntityKind::ModActivation, slow_scope).is_some());
    }

    #[test]
    fn options_follow_debounce_setting() {
        let settings = AppSettings {
            debounce_ms: 120,
            ..AppSettings::default()
        };
        let options = StoreOptions::from_settings(&settings);
        assert_eq!(options.debounce, Duration::from_millis(120));
        assert!(options.write_back);
    }

    #[tokio::test(start_paused = true)]
    async fn separators_validate_and_toggle() {
        let backend = Arc::new(MemoryBackend::default());
        let store = factory(&backend).separator_store();
        store.activate(Scope::new(1, 1142710)).await.expect("activate");

        let separator = store.create("  Overhauls ", "#262626", "#fefefe").expect("create");
        assert!(separator.identifier.starts_with("separator_"));
        assert_eq!(separator.title, "Overhauls");
        assert_eq!(
            store.create("Overhauls", "#000", "#fff").expect_err("duplicate").code(),
            "DUPLICATE_NAME"
        );
        assert_eq!(
            store.create("UI", "red", "#fff").expect_err("bad colour").code(),
            "INVALID_RECORD"
        );

        assert!(store.toggle_collapse(&separator.identifier).expect("collapse"));
        assert!(store.is_collapsed(&separator.identifier));
        assert!(!store.toggle_collapse(&separator.identifier).expect("expand"));

        let mut renamed = separator.clone();
        renamed.title = "Graphics".to_string();
        store.update(renamed).expect("update");
        assert_eq!(store.items()[0].title, "Graphics");

        store.remove(&separator.identifier).expect("remove");
        assert!(store.items().is_empty());
        assert_eq!(store.toggle_collapse("separator_x").expect_err("gone").code(), "NOT_FOUND");
    }

    #[tokio::test(start_paused = true)]
    async fn meta_and_versions_are_game_scoped() {
        let backend = Arc::new(MemoryBackend::default());
        let factory = factory(&backend);
        let meta = factory.meta_store();
        let versions = factory.version_store();
        let installed = vec![
            installed("steam", ModType::SteamMod, "10"),
            installed("nexus", ModType::NexusMod, "1.0"),
        ];

        meta.activate(Scope::new(1, 1142710), &installed).await.expect("meta");
        meta.annotate("steam", "Steam Mod", "ui, overhaul", "").expect("annotate");
        meta.flush().await;
        meta.activate(Scope::new(2, 1142710), &installed).await.expect("other profile");
        assert_eq!(meta.get("steam").expect("entry").categories, "ui, overhaul");
        assert_eq!(meta.get("nexus").expect("blank").title, "");

        versions.activate(Scope::new(1, 1142710), &installed).await.expect("versions");
        assert!(versions.changed_mods().is_empty());
        versions.record_latest("nexus", "1.1", 1_700_000_000_000).expect("record");
        assert_eq!(versions.changed_mods().len(), 1);
        versions.acknowledge("nexus").expect("ack");
        assert!(versions.changed_mods().is_empty());

        let due = versions.due_for_check(1_700_000_000_000 + super::VERSION_CHECK_INTERVAL_MS + 1);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].mod_id, "nexus");
    }

    #[test]
    fn colours_accept_short_and_long_hex() {
        assert!(validate_color("#abc").is_ok());
        assert!(validate_color("#A1B2C3").is_ok());
        assert!(validate_color("#abcd").is_err());
        assert!(validate_color("abc").is_err());
    }
}
