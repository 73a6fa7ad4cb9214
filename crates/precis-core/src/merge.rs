//! Item-map merging.
//!
//! Pure functions: no I/O, no clock access. Every replica merges the remote
//! map with its local map on read (`cloud` first, `local` second), keeps the
//! record with the strictly newer `updatedAt`, and falls back to the local
//! record on an exact tie. Ties are therefore resolved in favour of whichever
//! device happens to be syncing, which can make two devices with identical
//! timestamps trade values back and forth; this is accepted behaviour.

use crate::models::ItemMap;

/// Tombstones are kept (and pushed) for this long after their last update.
pub const TOMBSTONE_RETENTION_MS: i64 = 30 * 24 * 60 * 60 * 1000;

/// Union of both maps; newer `updatedAt` wins, local wins ties.
pub fn merge_items_map(cloud: &ItemMap, local: &ItemMap) -> ItemMap {
    let mut merged = cloud.clone();
    for (id, local_item) in local {
        match merged.get(id) {
            Some(cloud_item) if cloud_item.updated_at > local_item.updated_at => {}
            _ => {
                merged.insert(id.clone(), local_item.clone());
            }
        }
    }
    merged
}

/// Whether a tombstone has outlived the retention window.
pub const fn is_tombstone_expired(
    deleted: bool,
    updated_at_ms: i64,
    now_ms: i64,
    retention_ms: i64,
) -> bool {
    deleted && now_ms.saturating_sub(updated_at_ms) > retention_ms
}

/// Drop tombstones older than `retention_ms`; everything else is kept as-is.
pub fn cleanup_soft_deleted(map: ItemMap, now_ms: i64, retention_ms: i64) -> ItemMap {
    map.into_iter()
        .filter(|(_, item)| {
            !is_tombstone_expired(item.deleted, item.updated_at_ms(), now_ms, retention_ms)
        })
        .collect()
}

/// Whether `merged` carries anything the cloud copy does not.
///
/// Used to skip redundant remote writes.
pub fn detect_changes(cloud: &ItemMap, merged: &ItemMap) -> bool {
    if cloud.len() != merged.len() {
        return true;
    }

    merged.iter().any(|(id, item)| match cloud.get(id) {
        None => true,
        Some(cloud_item) => {
            item.updated_at > cloud_item.updated_at || item.deleted != cloud_item.deleted
        }
    })
}

/// Strip tag references that do not resolve to a live tag in `tags`.
///
/// Returns `true` when any archive lost a reference.
pub fn prune_archive_tags(archives: &mut ItemMap, tags: &ItemMap) -> bool {
    let mut pruned = false;
    for archive in archives.values_mut() {
        pruned |= archive.retain_tags(|tag_id| tags.get(tag_id).is_some_and(|tag| !tag.deleted));
    }
    pruned
}

/// Outcome of merging one item map.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedItems {
    pub items: ItemMap,
    /// The cloud copy is stale and should be replaced.
    pub changed: bool,
}

/// Merge, purge expired tombstones and compare against the cloud copy.
pub fn merge_history(
    cloud: &ItemMap,
    local: &ItemMap,
    now_ms: i64,
    retention_ms: i64,
) -> MergedItems {
    let items = cleanup_soft_deleted(merge_items_map(cloud, local), now_ms, retention_ms);
    let changed = detect_changes(cloud, &items);
    MergedItems { items, changed }
}

/// Outcome of merging the library (archives + tags).
#[derive(Debug, Clone, PartialEq)]
pub struct MergedLibrary {
    pub archives: ItemMap,
    pub tags: ItemMap,
    pub changed: bool,
}

/// Merge tags and archives independently, then enforce referential integrity.
///
/// Pruning a dangling reference changes an archive without bumping its
/// clock, so it also marks the library as changed.
pub fn merge_library(
    cloud_archives: &ItemMap,
    cloud_tags: &ItemMap,
    local_archives: &ItemMap,
    local_tags: &ItemMap,
    now_ms: i64,
    retention_ms: i64,
) -> MergedLibrary {
    let tags = cleanup_soft_deleted(merge_items_map(cloud_tags, local_tags), now_ms, retention_ms);
    let mut archives = cleanup_soft_deleted(
        merge_items_map(cloud_archives, local_archives),
        now_ms,
        retention_ms,
    );
    let pruned = prune_archive_tags(&mut archives, &tags);

    let changed = pruned
        || detect_changes(cloud_archives, &archives)
        || detect_changes(cloud_tags, &tags);

    MergedLibrary {
        archives,
        tags,
        changed,
    }
}
