use crate::models::{ConflictPrecedence, OrderItem};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Contested titles mapped to the other side of each conflict.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictBucket {
    pub cases: BTreeMap<String, Vec<String>>,
    /// Number of distinct titles in `cases`.
    pub total: usize,
}

impl ConflictBucket {
    fn record(&mut self, title: &str, others: Vec<String>) {
        self.cases.insert(title.to_string(), others);
        self.total = self.cases.len();
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictSummary {
    pub win: ConflictBucket,
    pub lose: ConflictBucket,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictReport {
    pub by_mod: BTreeMap<String, ConflictSummary>,
}

impl ConflictReport {
    pub fn summary_for(&self, mod_id: &str) -> ConflictSummary {
        self.by_mod.get(mod_id).cloned().unwrap_or_default()
    }

    pub fn contested_titles(&self) -> BTreeSet<&str> {
        self.by_mod
            .values()
            .flat_map(|summary| summary.win.cases.keys())
            .map(String::as_str)
            .collect()
    }
}

/// Buckets every title contributed by two or more mods into one winner and its
/// losers. Mods missing from `order` rank below every ordered mod.
pub fn aggregate(
    contributions: &BTreeMap<String, BTreeSet<String>>,
    order: &[OrderItem],
    precedence: ConflictPrecedence,
) -> ConflictReport {
    let positions: HashMap<&str, u32> = order
        .iter()
        .map(|item| (item.mod_id.as_str(), item.order))
        .collect();
    let rank = |mod_id: &str| -> (u8, i64) {
        match positions.get(mod_id) {
            Some(order) => match precedence {
                ConflictPrecedence::FirstInOrderWins => (0, i64::from(*order)),
                ConflictPrecedence::LastInOrderWins => (0, -i64::from(*order)),
            },
            None => (1, 0),
        }
    };

    let mut contributors: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (mod_id, titles) in contributions {
        for title in titles {
            contributors.entry(title.as_str()).or_default().push(mod_id.as_str());
        }
    }

    let mut report = ConflictReport::default();
    for (title, mut mods) in contributors {
        if mods.len() < 2 {
            continue;
        }
        mods.sort_by(|a, b| rank(*a).cmp(&rank(*b)).then_with(|| a.cmp(b)));
        let (winner, losers) = (mods[0], &mods[1..]);

        report
            .by_mod
            .entry(winner.to_string())
            .or_default()
            .win
            .record(title, losers.iter().map(|loser| loser.to_string()).collect());
        for loser in losers {
            report
                .by_mod
                .entry(loser.to_string())
                .or_default()
                .lose
                .record(title, vec![winner.to_string()]);
        }
    }

    tracing::debug!(
        mods = contributions.len(),
        conflicted = report.by_mod.len(),
        "aggregated conflicts"
    );
    report
}

/// Turns the backend's pairwise map (`pack path -> other pack path -> files`)
/// into per-mod title sets. Pack paths are resolved to mod ids through the
/// order list; unresolved paths are kept as-is.
pub fn contributions_from_pack_conflicts(
    pairs: &BTreeMap<String, BTreeMap<String, Vec<String>>>,
    order: &[OrderItem],
) -> BTreeMap<String, BTreeSet<String>> {
    let by_path: HashMap<&str, &str> = order
        .iter()
        .filter_map(|item| item.mod_file_path.as_deref().map(|path| (path, item.mod_id.as_str())))
        .collect();
    let resolve = |path: &str| by_path.get(path).copied().unwrap_or(path).to_string();

    let mut contributions: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for (pack, others) in pairs {
        for (other, files) in others {
            for file in files {
                contributions.entry(resolve(pack)).or_default().insert(file.clone());
                contributions.entry(resolve(other)).or_default().insert(file.clone());
            }
        }
    }
    contributions
}
