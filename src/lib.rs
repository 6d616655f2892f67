pub mod config;
pub mod conflicts;
pub mod db;
pub mod debounce;
pub mod errors;
pub mod games;
pub mod models;
pub mod notifications;
pub mod order;
pub mod pack_tree;
pub mod persistence;
pub mod profiles;
pub mod store;

use crate::config::AppPaths;
use crate::conflicts::ConflictReport;
use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::models::{
    AppSettings, GameId, InstalledMod, ModListEntry, Notice, OrderItem, Profile, ProfileId, Scope, SeparatorItem,
    VersionItem,
};
use crate::notifications::Notifier;
use crate::profiles::ProfileService;
use crate::store::{ActivationStore, MetaStore, OrderStore, SeparatorStore, StoreFactory, StoreOptions, VersionStore};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::broadcast;

pub use crate::pack_tree::{build_tree, get_parent_paths, PackEntry, PackTree, TreeNode};

#[derive(Debug, Clone)]
struct ActiveContext {
    scope: Scope,
    installed: Vec<InstalledMod>,
}

/// Entry point for a UI bridge: one selected game, its active profile, and
/// the record stores bound to that scope.
pub struct ModManager {
    db: Arc<Database>,
    paths: AppPaths,
    profiles: ProfileService,
    notifier: Notifier,
    settings: RwLock<AppSettings>,
    order: OrderStore,
    activation: ActivationStore,
    separators: SeparatorStore,
    meta: MetaStore,
    versions: VersionStore,
    context: Mutex<Option<ActiveContext>>,
}

impl ModManager {
    /// Opens (or creates) the database under `paths`. Store writers are
    /// spawned on the current tokio runtime.
    pub async fn open(paths: AppPaths) -> AppResult<Self> {
        let db = Arc::new(Database::new(&paths.db_path())?);
        let settings = db.get_settings()?;
        let notifier = Notifier::default();
        let factory = StoreFactory::new(db.clone(), notifier.clone(), StoreOptions::from_settings(&settings));

        tracing::info!(
            db = %db.path().display(),
            debounce_ms = settings.debounce_ms,
            selected_game = ?settings.selected_game,
            "opened mod manager"
        );

        Ok(Self {
            profiles: ProfileService::new(db.clone()),
            db,
            paths,
            notifier,
            settings: RwLock::new(settings),
            order: factory.order_store(),
            activation: factory.activation_store(),
            separators: factory.separator_store(),
            meta: factory.meta_store(),
            versions: factory.version_store(),
            context: Mutex::new(None),
        })
    }

    pub fn paths(&self) -> &AppPaths {
        &self.paths
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<Notice> {
        self.notifier.subscribe()
    }

    pub fn order(&self) -> &OrderStore {
        &self.order
    }

    pub fn activation(&self) -> &ActivationStore {
        &self.activation
    }

    pub fn separators(&self) -> &SeparatorStore {
        &self.separators
    }

    pub fn meta(&self) -> &MetaStore {
        &self.meta
    }

    pub fn versions(&self) -> &VersionStore {
        &self.versions
    }

    // ─── Settings ───────────────────────────────────────────────────────────

    pub fn settings(&self) -> AppSettings {
        self.settings
            .read()
            .map(|settings| settings.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// Deep-merges `update` into the stored settings. A new debounce window
    /// applies to stores created after the next open.
    pub fn update_settings(&self, update: serde_json::Value) -> AppResult<AppSettings> {
        let result = self.db.update_settings(update).map(|settings| {
            self.replace_settings(settings.clone());
            settings
        });
        self.reported("updating settings", result)
    }

    // ─── Scope ──────────────────────────────────────────────────────────────

    pub fn scope(&self) -> Option<Scope> {
        self.context_guard()
            .ok()
            .and_then(|context| context.as_ref().map(|context| context.scope))
    }

    /// Selects a game, making sure it has an active profile, and loads every
    /// store for the resulting scope against the installed mods.
    pub async fn switch_game(&self, game_id: GameId, installed: Vec<InstalledMod>) -> AppResult<Profile> {
        let result = self.switch_game_inner(game_id, installed).await;
        self.reported("switching game", result)
    }

    async fn switch_game_inner(&self, game_id: GameId, installed: Vec<InstalledMod>) -> AppResult<Profile> {
        let game = games::require_game(game_id)?;
        let profile = self.profiles.ensure_active_profile(game_id)?;
        self.activate(profile.scope()?, installed).await?;
        let settings = self.db.update_settings(serde_json::json!({ "selectedGame": game_id }))?;
        self.replace_settings(settings);
        tracing::info!(game = game.slug, profile_id = ?profile.id, "switched game");
        Ok(profile)
    }

    pub async fn switch_profile(&self, profile_id: ProfileId) -> AppResult<Profile> {
        let result = self.switch_profile_inner(profile_id).await;
        self.reported("switching profile", result)
    }

    async fn switch_profile_inner(&self, profile_id: ProfileId) -> AppResult<Profile> {
        let context = self.require_context()?;
        let profile = self.profiles.set_active(profile_id, context.scope.game_id)?;
        self.activate(profile.scope()?, context.installed).await?;
        Ok(profile)
    }

    /// Re-merges every store against a fresh installed-mod enumeration.
    pub async fn refresh_installed(&self, installed: Vec<InstalledMod>) -> AppResult<()> {
        let result = match self.require_context() {
            Ok(context) => self.activate(context.scope, installed).await,
            Err(error) => Err(error),
        };
        self.reported("refreshing installed mods", result)
    }

    /// Loads every store for `scope`. The context only moves to the new scope
    /// once all stores have loaded; on failure the stores go back to the
    /// previous context.
    async fn activate(&self, scope: Scope, installed: Vec<InstalledMod>) -> AppResult<()> {
        if let Err(error) = self.load_stores(scope, &installed).await {
            let previous = self.context_guard()?.clone();
            if let Some(previous) = previous.filter(|previous| previous.scope != scope) {
                if let Err(restore) = self.load_stores(previous.scope, &previous.installed).await {
                    tracing::warn!(error = %restore, "could not restore previous scope");
                }
            }
            return Err(error);
        }
        self.set_context(ActiveContext {
            scope,
            installed: installed.clone(),
        })?;

        tracing::info!(
            profile_id = scope.profile_id,
            game_id = scope.game_id,
            installed = installed.len(),
            "activated scope"
        );
        Ok(())
    }

    async fn load_stores(&self, scope: Scope, installed: &[InstalledMod]) -> AppResult<()> {
        self.separators.activate(scope).await?;
        let candidates = order::candidates(installed, &self.separators.items());
        self.order.activate(scope, &candidates).await?;
        self.activation.activate(scope, installed).await?;
        self.meta.activate(scope, installed).await?;
        self.versions.activate(scope, installed).await
    }

    // ─── Profiles ───────────────────────────────────────────────────────────

    pub fn list_profiles(&self) -> AppResult<Vec<Profile>> {
        let result = self
            .require_context()
            .and_then(|context| self.profiles.list_for_game(context.scope.game_id));
        self.reported("listing profiles", result)
    }

    pub fn create_profile(&self, name: &str) -> AppResult<Profile> {
        let result = self.require_context().and_then(|context| {
            let mut profile = Profile::draft(context.scope.game_id, name);
            self.profiles.save(&mut profile)?;
            Ok(profile)
        });
        self.reported("creating profile", result)
    }

    pub fn rename_profile(&self, profile_id: ProfileId, name: &str) -> AppResult<Profile> {
        let result = self.find_profile(profile_id).and_then(|mut profile| {
            profile.name = name.to_string();
            self.profiles.save(&mut profile)?;
            Ok(profile)
        });
        self.reported("renaming profile", result)
    }

    /// Deletes a profile of the selected game and returns the profile that is
    /// active afterwards, reloading the stores when the active one changed.
    pub async fn delete_profile(&self, profile_id: ProfileId) -> AppResult<Profile> {
        let result = self.delete_profile_inner(profile_id).await;
        self.reported("deleting profile", result)
    }

    async fn delete_profile_inner(&self, profile_id: ProfileId) -> AppResult<Profile> {
        let context = self.require_context()?;
        let profile = self.find_profile(profile_id)?;
        self.flush().await;

        let active = self.profiles.delete(&profile)?;
        if context.scope.profile_id == profile_id {
            self.activate(active.scope()?, context.installed).await?;
        }
        Ok(active)
    }

    pub async fn export_profile(&self, profile_id: ProfileId) -> AppResult<String> {
        self.flush().await;
        let result = self.profiles.export_json(profile_id);
        self.reported("exporting profile", result)
    }

    /// Imports a profile export as a new profile. Shared metadata of the
    /// selected game is reloaded because the import may have extended it.
    pub async fn import_profile(&self, raw: &str, name: Option<&str>) -> AppResult<Profile> {
        self.flush().await;
        let result = self.import_profile_inner(raw, name).await;
        self.reported("importing profile", result)
    }

    async fn import_profile_inner(&self, raw: &str, name: Option<&str>) -> AppResult<Profile> {
        let profile = self.profiles.import_json(raw, name)?;
        if let Ok(context) = self.require_context() {
            if Some(context.scope.game_id) == profile.game_id {
                self.meta.activate(context.scope, &context.installed).await?;
            }
        }
        Ok(profile)
    }

    // ─── Mod list ───────────────────────────────────────────────────────────

    /// Mods and separators in display order for the current sort.
    pub fn mod_list(&self) -> Vec<ModListEntry> {
        order::combine(&self.order.sorted(self.settings().sort_by), &self.separators.items())
    }

    /// Like [`Self::mod_list`] with rows under collapsed separators removed.
    pub fn visible_mod_list(&self) -> Vec<ModListEntry> {
        order::visible_entries(&self.mod_list()).into_iter().cloned().collect()
    }

    /// Moves a mod (or separator row) to a 1-based position in the load order.
    pub fn set_priority(&self, mod_id: &str, target: i64) -> AppResult<()> {
        let result = self.order.move_to(mod_id, target);
        self.reported("reordering mods", result)
    }

    pub fn move_section(&self, separator_id: &str, target: i64) -> AppResult<()> {
        let result = self.order.move_section(&self.separators.items(), separator_id, target);
        self.reported("moving separator section", result)
    }

    pub fn toggle_row(&self, mod_id: &str, additive: bool) -> AppResult<()> {
        let result = self.order.toggle_row(mod_id, additive);
        self.reported("selecting row", result)
    }

    pub fn clear_selection(&self) {
        self.order.clear_selection();
    }

    pub fn selected_rows(&self) -> Vec<OrderItem> {
        self.order.selected_rows()
    }

    pub fn toggle_active(&self, mod_id: &str) -> AppResult<bool> {
        let result = self.activation.toggle(mod_id);
        self.reported("toggling mod", result)
    }

    pub fn set_all_active(&self, active: bool) {
        self.activation.set_all(active);
    }

    pub fn annotate(&self, mod_id: &str, title: &str, categories: &str, version: &str) -> AppResult<()> {
        let result = self.meta.annotate(mod_id, title, categories, version);
        self.reported("editing mod metadata", result)
    }

    pub fn changed_mods(&self) -> Vec<VersionItem> {
        self.versions.changed_mods()
    }

    pub fn acknowledge_version(&self, mod_id: &str) -> AppResult<()> {
        let result = self.versions.acknowledge(mod_id);
        self.reported("acknowledging mod update", result)
    }

    // ─── Separators ─────────────────────────────────────────────────────────

    /// Creates a separator and appends its row to the end of the load order.
    pub fn create_separator(&self, title: &str, background_color: &str, text_color: &str) -> AppResult<SeparatorItem> {
        let result = self
            .separators
            .create(title, background_color, text_color)
            .map(|separator| {
                self.order.push_row(&separator.identifier, &separator.title);
                separator
            });
        self.reported("creating separator", result)
    }

    pub fn update_separator(&self, separator: SeparatorItem) -> AppResult<()> {
        let identifier = separator.identifier.clone();
        let title = separator.title.clone();
        let result = self
            .separators
            .update(separator)
            .and_then(|()| ignore_missing(self.order.rename_row(&identifier, &title)));
        self.reported("updating separator", result)
    }

    pub fn remove_separator(&self, identifier: &str) -> AppResult<()> {
        let result = self
            .separators
            .remove(identifier)
            .and_then(|_| ignore_missing(self.order.remove_row(identifier)));
        self.reported("removing separator", result)
    }

    pub fn toggle_separator_collapse(&self, identifier: &str) -> AppResult<bool> {
        let result = self.separators.toggle_collapse(identifier);
        self.reported("collapsing separator", result)
    }

    // ─── Derived views ──────────────────────────────────────────────────────

    /// Win/lose buckets for per-mod contributed titles against the current
    /// load order and configured precedence.
    pub fn conflicts(&self, contributions: &BTreeMap<String, BTreeSet<String>>) -> ConflictReport {
        conflicts::aggregate(contributions, &self.order.items(), self.settings().conflict_precedence)
    }

    /// Same as [`Self::conflicts`], fed by the backend's pairwise pack map.
    pub fn pack_conflicts(&self, pairs: &BTreeMap<String, BTreeMap<String, Vec<String>>>) -> ConflictReport {
        let order = self.order.items();
        let contributions = conflicts::contributions_from_pack_conflicts(pairs, &order);
        conflicts::aggregate(&contributions, &order, self.settings().conflict_precedence)
    }

    // ─── Lifecycle ──────────────────────────────────────────────────────────

    /// Lands every pending debounced save.
    pub async fn flush(&self) {
        self.order.flush().await;
        self.activation.flush().await;
        self.separators.flush().await;
        self.meta.flush().await;
        self.versions.flush().await;
    }

    pub async fn shutdown(&self) {
        self.flush().await;
        tracing::info!("mod manager shut down");
    }

    // ─── Helpers ────────────────────────────────────────────────────────────

    fn reported<T>(&self, context: &str, result: AppResult<T>) -> AppResult<T> {
        if let Err(error) = &result {
            self.notifier.report(context, error);
        }
        result
    }

    fn replace_settings(&self, settings: AppSettings) {
        match self.settings.write() {
            Ok(mut current) => *current = settings,
            Err(poisoned) => *poisoned.into_inner() = settings,
        }
    }

    fn context_guard(&self) -> AppResult<std::sync::MutexGuard<'_, Option<ActiveContext>>> {
        self.context
            .lock()
            .map_err(|_| AppError::Internal("scope context lock poisoned".to_string()))
    }

    fn require_context(&self) -> AppResult<ActiveContext> {
        self.context_guard()?
            .clone()
            .ok_or_else(|| AppError::MissingScope("no game has been selected".to_string()))
    }

    fn set_context(&self, context: ActiveContext) -> AppResult<()> {
        *self.context_guard()? = Some(context);
        Ok(())
    }

    fn find_profile(&self, profile_id: ProfileId) -> AppResult<Profile> {
        let context = self.require_context()?;
        self.profiles
            .list_for_game(context.scope.game_id)?
            .into_iter()
            .find(|profile| profile.id == Some(profile_id))
            .ok_or_else(|| AppError::NotFound(format!("profile {} does not exist", profile_id)))
    }
}

fn ignore_missing(result: AppResult<()>) -> AppResult<()> {
    match result {
        Err(AppError::NotFound(_)) => Ok(()),
        other => other,
    }
}
