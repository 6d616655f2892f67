use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::games;
use crate::models::{
    ActivationItem, GameId, MetaItem, OrderItem, Profile, ProfileExport, ProfileId, RecordItem, Scope, SeparatorItem,
};
use crate::persistence::ScopedPersistence;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;

pub const DEFAULT_PROFILE_NAME: &str = "Default";
const MAX_NAME_LEN: usize = 255;

/// Owns which profile is active for each game. Every game that has been
/// touched has exactly one active profile.
#[derive(Clone)]
pub struct ProfileService {
    db: Arc<Database>,
}

impl ProfileService {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn list_for_game(&self, game_id: GameId) -> AppResult<Vec<Profile>> {
        self.db.list_profiles(game_id)
    }

    pub fn current_profile(&self, game_id: GameId) -> AppResult<Profile> {
        self.ensure_active_profile(game_id)
    }

    /// Returns the active profile of `game_id`, activating the oldest one or
    /// creating "Default" when there is none.
    pub fn ensure_active_profile(&self, game_id: GameId) -> AppResult<Profile> {
        if let Some(active) = self.db.active_profile(game_id)? {
            return Ok(active);
        }

        let profile = match self.db.list_profiles(game_id)?.into_iter().next() {
            Some(existing) => existing,
            None => {
                tracing::info!(game_id, "creating default profile");
                self.db.insert_profile(game_id, DEFAULT_PROFILE_NAME)?
            }
        };
        let profile_id = profile
            .id
            .ok_or_else(|| AppError::Internal("stored profile has no id".to_string()))?;
        self.set_active(profile_id, game_id)
    }

    /// Clears the active flag on every profile of the game and sets it on
    /// `profile_id` as one unit.
    pub fn set_active(&self, profile_id: ProfileId, game_id: GameId) -> AppResult<Profile> {
        self.db.set_active_profile(profile_id, game_id)?;
        tracing::info!(profile_id, game_id, "activated profile");
        self.db
            .get_profile(profile_id)?
            .ok_or_else(|| AppError::StaleRecord(format!("profile {} vanished after activation", profile_id)))
    }

    /// Inserts a new profile (assigning its id) or renames an existing one.
    pub fn save(&self, profile: &mut Profile) -> AppResult<()> {
        let name = profile.name.trim().to_string();
        if name.is_empty() {
            return Err(AppError::EmptyName);
        }
        if name.chars().count() > MAX_NAME_LEN {
            return Err(AppError::InvalidRecord(format!(
                "profile name is longer than {} characters",
                MAX_NAME_LEN
            )));
        }

        match profile.id {
            Some(profile_id) => {
                self.db.rename_profile(profile_id, &name)?;
                profile.name = name;
            }
            None => {
                let game_id = profile
                    .game_id
                    .ok_or_else(|| AppError::MissingScope(format!("profile '{}' has no game", name)))?;
                *profile = self.db.insert_profile(game_id, &name)?;
                tracing::info!(profile_id = ?profile.id, game_id, "created profile");
            }
        }
        Ok(())
    }

    /// Removes a profile with all of its profile-scoped records. When it was
    /// active, the next remaining profile of the game takes over. Returns the
    /// active profile afterwards.
    pub fn delete(&self, profile: &Profile) -> AppResult<Profile> {
        let profile_id = profile
            .id
            .ok_or_else(|| AppError::MissingIdentity(format!("profile '{}' has not been saved", profile.name)))?;
        let stored = self
            .db
            .get_profile(profile_id)?
            .ok_or_else(|| AppError::StaleRecord(format!("profile {} no longer exists", profile_id)))?;
        let game_id = stored
            .game_id
            .ok_or_else(|| AppError::MissingScope(format!("profile {} has no game", profile_id)))?;

        let siblings = self.db.list_profiles(game_id)?;
        let remaining: Vec<&Profile> = siblings
            .iter()
            .filter(|sibling| sibling.id != Some(profile_id))
            .collect();
        let successor = remaining
            .iter()
            .find(|sibling| sibling.is_active)
            .or_else(|| remaining.first())
            .and_then(|sibling| sibling.id)
            .ok_or_else(|| {
                AppError::LastProfile(format!("'{}' is the only profile for game {}", stored.name, game_id))
            })?;

        self.db.delete_profile_cascade(profile_id, successor, game_id)?;
        tracing::info!(profile_id, successor, game_id, "deleted profile");
        self.db
            .get_profile(successor)?
            .ok_or_else(|| AppError::StaleRecord(format!("profile {} vanished after delete", successor)))
    }

    /// Snapshot of what is currently persisted for a profile.
    pub fn export_profile(&self, profile_id: ProfileId) -> AppResult<ProfileExport> {
        let profile = self
            .db
            .get_profile(profile_id)?
            .ok_or_else(|| AppError::NotFound(format!("profile {} does not exist", profile_id)))?;
        let scope = profile.scope()?;

        Ok(ProfileExport {
            game_id: scope.game_id,
            name: profile.name,
            mod_order: self.load::<OrderItem>(scope)?,
            mod_activation: self.load::<ActivationItem>(scope)?,
            mod_meta: self.load::<MetaItem>(scope)?,
            mod_separators: self.load::<SeparatorItem>(scope)?,
            exported_at: Utc::now(),
        })
    }

    pub fn export_json(&self, profile_id: ProfileId) -> AppResult<String> {
        Ok(serde_json::to_string_pretty(&self.export_profile(profile_id)?)?)
    }

    /// Creates a new, inactive profile from an export. Exported metadata is
    /// merged into the game's shared metadata, replacing entries by mod id.
    pub fn import_profile(&self, export: ProfileExport, name: Option<&str>) -> AppResult<Profile> {
        games::require_game(export.game_id)?;
        let mut profile = Profile::draft(export.game_id, name.unwrap_or(&export.name));
        self.save(&mut profile)?;
        let scope = profile.scope()?;

        self.persistence::<OrderItem>()
            .save_snapshot(scope, crate::order::normalize_order(export.mod_order))?;
        self.persistence::<ActivationItem>()
            .save_snapshot(scope, export.mod_activation)?;
        self.persistence::<SeparatorItem>()
            .save_snapshot(scope, export.mod_separators)?;

        if !export.mod_meta.is_empty() {
            let mut meta = self.load::<MetaItem>(scope)?;
            let imported: HashMap<String, MetaItem> = export
                .mod_meta
                .into_iter()
                .map(|item| (item.mod_id.clone(), item))
                .collect();
            for item in meta.iter_mut() {
                if let Some(replacement) = imported.get(&item.mod_id) {
                    *item = replacement.clone();
                }
            }
            let known: Vec<String> = meta.iter().map(|item| item.mod_id.clone()).collect();
            let mut added: Vec<MetaItem> = imported
                .into_values()
                .filter(|item| !known.contains(&item.mod_id))
                .collect();
            added.sort_by(|a, b| a.mod_id.cmp(&b.mod_id));
            meta.extend(added);
            self.persistence::<MetaItem>().save_snapshot(scope, meta)?;
        }

        tracing::info!(profile_id = ?profile.id, game_id = export.game_id, "imported profile");
        Ok(profile)
    }

    pub fn import_json(&self, raw: &str, name: Option<&str>) -> AppResult<Profile> {
        let export: ProfileExport = serde_json::from_str(raw)?;
        self.import_profile(export, name)
    }

    fn persistence<T: RecordItem>(&self) -> ScopedPersistence<T> {
        ScopedPersistence::new(self.db.clone())
    }

    fn load<T: RecordItem>(&self, scope: Scope) -> AppResult<Vec<T>> {
        Ok(self
            .persistence::<T>()
            .retrieve(scope)?
            .map(|record| record.data)
            .unwrap_or_default())
    }
}
