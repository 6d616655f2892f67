use crate::errors::{AppError, AppResult};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub type GameId = u32;
pub type ProfileId = i64;

/// Profile id stored on rows of game-scoped kinds.
pub const GAME_SCOPE_PROFILE_ID: ProfileId = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    pub profile_id: ProfileId,
    pub game_id: GameId,
}

impl Scope {
    pub fn new(profile_id: ProfileId, game_id: GameId) -> Self {
        Self { profile_id, game_id }
    }

    /// Narrows the scope to what `kind` is actually keyed by.
    pub fn for_kind(self, kind: EntityKind) -> Self {
        if kind.scoped_by_profile() {
            self
        } else {
            Self {
                profile_id: GAME_SCOPE_PROFILE_ID,
                game_id: self.game_id,
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityKind {
    ModOrder,
    ModActivation,
    ModSeparator,
    ModMeta,
    ModVersion,
}

impl EntityKind {
    pub const ALL: [EntityKind; 5] = [
        Self::ModOrder,
        Self::ModActivation,
        Self::ModSeparator,
        Self::ModMeta,
        Self::ModVersion,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ModOrder => "mod-order",
            Self::ModActivation => "mod-activation",
            Self::ModSeparator => "mod-separator",
            Self::ModMeta => "mod-meta",
            Self::ModVersion => "mod-version",
        }
    }

    pub fn table(self) -> &'static str {
        match self {
            Self::ModOrder => "mod_orders",
            Self::ModActivation => "mod_activations",
            Self::ModSeparator => "mod_separators",
            Self::ModMeta => "mod_metas",
            Self::ModVersion => "mod_versions",
        }
    }

    pub fn scoped_by_profile(self) -> bool {
        matches!(self, Self::ModOrder | Self::ModActivation | Self::ModSeparator)
    }
}

/// Item type stored in the record table of exactly one [`EntityKind`].
pub trait RecordItem: Serialize + DeserializeOwned + Clone + PartialEq + Send + Sync + 'static {
    const KIND: EntityKind;
}

#[derive(Debug, Clone, PartialEq)]
pub struct PersistedRecord<T> {
    pub id: Option<i64>,
    pub scope: Scope,
    pub data: Vec<T>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl<T> PersistedRecord<T> {
    pub fn new(scope: Scope, data: Vec<T>) -> Self {
        Self {
            id: None,
            scope,
            data,
            updated_at: None,
        }
    }

    pub fn is_saved(&self) -> bool {
        self.id.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub mod_id: String,
    pub order: u32,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mod_file_path: Option<String>,
}

impl RecordItem for OrderItem {
    const KIND: EntityKind = EntityKind::ModOrder;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivationItem {
    pub mod_id: String,
    pub is_active: bool,
    pub title: String,
}

impl RecordItem for ActivationItem {
    const KIND: EntityKind = EntityKind::ModActivation;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeparatorItem {
    pub identifier: String,
    pub title: String,
    pub background_color: String,
    pub text_color: String,
    #[serde(default)]
    pub collapsed: bool,
}

impl RecordItem for SeparatorItem {
    const KIND: EntityKind = EntityKind::ModSeparator;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaItem {
    pub mod_id: String,
    pub title: String,
    pub categories: String,
    pub version: String,
}

impl RecordItem for MetaItem {
    const KIND: EntityKind = EntityKind::ModMeta;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModType {
    SteamMod,
    NexusMod,
    BaseMod,
    LocalMod,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionItem {
    pub mod_id: String,
    pub mod_type: ModType,
    pub title: String,
    pub version: String,
    pub last_time_checked: i64,
    pub latest_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl RecordItem for VersionItem {
    const KIND: EntityKind = EntityKind::ModVersion;
}

/// A mod as enumerated by the backend for the selected game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstalledMod {
    pub identifier: String,
    pub title: String,
    pub mod_type: ModType,
    #[serde(default)]
    pub mod_file_path: Option<String>,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub updated_at: i64,
    #[serde(default)]
    pub url: Option<String>,
}

/// One row of the combined mod list as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ModListEntry {
    Mod(OrderItem),
    Separator(SeparatorItem),
}

impl ModListEntry {
    pub fn identifier(&self) -> &str {
        match self {
            Self::Mod(item) => &item.mod_id,
            Self::Separator(item) => &item.identifier,
        }
    }

    pub fn is_separator(&self) -> bool {
        matches!(self, Self::Separator(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: Option<ProfileId>,
    pub game_id: Option<GameId>,
    pub name: String,
    pub is_active: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Profile {
    pub fn draft(game_id: GameId, name: impl Into<String>) -> Self {
        Self {
            id: None,
            game_id: Some(game_id),
            name: name.into(),
            is_active: false,
            created_at: None,
        }
    }

    pub fn scope(&self) -> AppResult<Scope> {
        let id = self
            .id
            .ok_or_else(|| AppError::MissingIdentity(format!("profile '{}' has not been saved", self.name)))?;
        let game_id = self
            .game_id
            .ok_or_else(|| AppError::MissingScope(format!("profile '{}' has no game", self.name)))?;
        Ok(Scope::new(id, game_id))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileExport {
    pub game_id: GameId,
    pub name: String,
    #[serde(default)]
    pub mod_order: Vec<OrderItem>,
    #[serde(default)]
    pub mod_activation: Vec<ActivationItem>,
    #[serde(default)]
    pub mod_meta: Vec<MetaItem>,
    #[serde(default)]
    pub mod_separators: Vec<SeparatorItem>,
    pub exported_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPrecedence {
    /// Order 1 beats order 2.
    #[default]
    FirstInOrderWins,
    LastInOrderWins,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SortBy {
    #[default]
    LoadOrder,
    Title,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppSettings {
    pub selected_game: Option<GameId>,
    pub debounce_ms: u64,
    pub conflict_precedence: ConflictPrecedence,
    pub sort_by: SortBy,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            selected_game: None,
            debounce_ms: 300,
            conflict_precedence: ConflictPrecedence::default(),
            sort_by: SortBy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notice {
    pub level: NoticeLevel,
    pub code: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}
