//! Load-order bookkeeping. Positions are always re-derived from list index,
//! so `order` values stay a gap-free `1..=N` sequence.
//!
//! Separators share the order list with mods: a separator row is an
//! [`OrderItem`] whose `mod_id` is the separator identifier.

use crate::errors::{AppError, AppResult};
use crate::models::{InstalledMod, ModListEntry, OrderItem, SeparatorItem};
use std::collections::HashMap;

/// Moves `mod_id` to the 1-based `target` position, clamped to `[1, N]`.
pub fn move_to_position(items: &[OrderItem], mod_id: &str, target: i64) -> AppResult<Vec<OrderItem>> {
    let Some(current) = items.iter().position(|item| item.mod_id == mod_id) else {
        return Err(AppError::NotFound(format!("mod '{}' is not in the load order", mod_id)));
    };

    let len = items.len() as i64;
    let target = target.clamp(1, len) as usize;

    let mut next = items.to_vec();
    let moved = next.remove(current);
    next.insert(target - 1, moved);
    Ok(reindex(next))
}

/// Moves a separator together with every row under it (up to the next
/// separator) so the separator lands at `target`, clamped so the whole
/// section still fits.
pub fn move_section(
    items: &[OrderItem],
    separators: &[SeparatorItem],
    separator_id: &str,
    target: i64,
) -> AppResult<Vec<OrderItem>> {
    if !separators.iter().any(|separator| separator.identifier == separator_id) {
        return Err(AppError::NotFound(format!("separator '{}' does not exist", separator_id)));
    }
    let Some(start) = items.iter().position(|item| item.mod_id == separator_id) else {
        return Err(AppError::NotFound(format!("separator '{}' is not in the load order", separator_id)));
    };

    let end = items[start + 1..]
        .iter()
        .position(|item| separators.iter().any(|separator| separator.identifier == item.mod_id))
        .map(|offset| start + 1 + offset)
        .unwrap_or(items.len());

    let mut rest = items.to_vec();
    let section: Vec<OrderItem> = rest.drain(start..end).collect();
    let last_start = rest.len() as i64 + 1;
    let insert_at = target.clamp(1, last_start) as usize - 1;
    rest.splice(insert_at..insert_at, section);
    Ok(reindex(rest))
}

/// Sorts by the stored `order` and closes any gaps or duplicates.
pub fn normalize_order(mut items: Vec<OrderItem>) -> Vec<OrderItem> {
    items.sort_by_key(|item| item.order);
    reindex(items)
}

/// Rows that should currently appear in the order list: installed mods in
/// enumeration order, then separators.
pub fn candidates(installed: &[InstalledMod], separators: &[SeparatorItem]) -> Vec<OrderItem> {
    let mods = installed.iter().map(|installed| OrderItem {
        mod_id: installed.identifier.clone(),
        order: 0,
        title: installed.title.clone(),
        mod_file_path: installed.mod_file_path.clone(),
    });
    let separators = separators.iter().map(|separator| OrderItem {
        mod_id: separator.identifier.clone(),
        order: 0,
        title: separator.title.clone(),
        mod_file_path: None,
    });
    reindex(mods.chain(separators).collect())
}

/// Rebuilds the order list against the current candidate rows. Known rows keep
/// their relative position, new ones are appended after the highest known
/// order in candidate order, and rows no longer present are dropped.
pub fn reconcile(existing: &[OrderItem], current: &[OrderItem]) -> Vec<OrderItem> {
    let known: HashMap<&str, u32> = existing
        .iter()
        .map(|item| (item.mod_id.as_str(), item.order))
        .collect();
    let mut next_order = current
        .iter()
        .filter_map(|item| known.get(item.mod_id.as_str()).copied())
        .max()
        .unwrap_or(0);

    let merged = current
        .iter()
        .map(|item| {
            let order = match known.get(item.mod_id.as_str()) {
                Some(order) => *order,
                None => {
                    next_order += 1;
                    next_order
                }
            };
            OrderItem {
                order,
                ..item.clone()
            }
        })
        .collect();

    normalize_order(merged)
}

/// Interleaves mods and separators as they appear in the order list.
pub fn combine(order: &[OrderItem], separators: &[SeparatorItem]) -> Vec<ModListEntry> {
    let by_id: HashMap<&str, &SeparatorItem> = separators
        .iter()
        .map(|separator| (separator.identifier.as_str(), separator))
        .collect();
    order
        .iter()
        .map(|item| match by_id.get(item.mod_id.as_str()) {
            Some(separator) => ModListEntry::Separator((*separator).clone()),
            None => ModListEntry::Mod(item.clone()),
        })
        .collect()
}

/// `(separator identifier, index)` for every separator row.
pub fn separator_positions(entries: &[ModListEntry]) -> Vec<(String, usize)> {
    entries
        .iter()
        .enumerate()
        .filter(|(_, entry)| entry.is_separator())
        .map(|(index, entry)| (entry.identifier().to_string(), index))
        .collect()
}

/// Mods grouped under `separator_id`, up to the next separator.
pub fn children_of<'a>(entries: &'a [ModListEntry], separator_id: &str) -> Vec<&'a OrderItem> {
    entries
        .iter()
        .skip_while(|entry| !(entry.is_separator() && entry.identifier() == separator_id))
        .skip(1)
        .map_while(|entry| match entry {
            ModListEntry::Mod(item) => Some(item),
            ModListEntry::Separator(_) => None,
        })
        .collect()
}

/// Drops rows hidden under collapsed separators.
pub fn visible_entries(entries: &[ModListEntry]) -> Vec<&ModListEntry> {
    let mut collapsed = false;
    entries
        .iter()
        .filter(|entry| match entry {
            ModListEntry::Separator(separator) => {
                collapsed = separator.collapsed;
                true
            }
            ModListEntry::Mod(_) => !collapsed,
        })
        .collect()
}

fn reindex(items: Vec<OrderItem>) -> Vec<OrderItem> {
    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| OrderItem {
            order: index as u32 + 1,
            ..item
        })
        .collect()
}
