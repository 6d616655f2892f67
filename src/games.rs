use crate::errors::{AppError, AppResult};
use crate::models::GameId;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum GameFamily {
    TotalWar,
    Bannerlord,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedGame {
    /// Steam app id, used as the game id throughout persistence.
    pub id: GameId,
    pub name: &'static str,
    pub slug: &'static str,
    pub family: GameFamily,
    pub nexus_slug: &'static str,
}

pub const SUPPORTED_GAMES: &[SupportedGame] = &[
    SupportedGame {
        id: 594570,
        name: "Total War: WARHAMMER 2",
        slug: "tww2",
        family: GameFamily::TotalWar,
        nexus_slug: "totalwarwarhammer2",
    },
    SupportedGame {
        id: 1142710,
        name: "Total War: WARHAMMER 3",
        slug: "tww3",
        family: GameFamily::TotalWar,
        nexus_slug: "totalwarwarhammer3",
    },
    SupportedGame {
        id: 779340,
        name: "Total War: Three Kingdoms",
        slug: "tw3k",
        family: GameFamily::TotalWar,
        nexus_slug: "totalwarthreekingdoms",
    },
    SupportedGame {
        id: 261550,
        name: "Mount & Blade II: Bannerlord",
        slug: "mbbl",
        family: GameFamily::Bannerlord,
        nexus_slug: "mountandblade2bannerlord",
    },
];

pub fn find_game(game_id: GameId) -> Option<&'static SupportedGame> {
    SUPPORTED_GAMES.iter().find(|game| game.id == game_id)
}

pub fn require_game(game_id: GameId) -> AppResult<&'static SupportedGame> {
    find_game(game_id).ok_or_else(|| AppError::NotFound(format!("game {} is not supported", game_id)))
}

pub fn find_by_slug(slug: &str) -> Option<&'static SupportedGame> {
    SUPPORTED_GAMES.iter().find(|game| game.slug.eq_ignore_ascii_case(slug))
}
