//! Nesting of grouped entries under their named group.
//!
//! Entries that belong to a named group carry the group's id as their own
//! key. After all entries are folded, each group adopts the top-level slot
//! keyed by its id as `data`, and that slot leaves the top level.

use crate::bininfo::types::{EntryMap, EntryValue, Key, KEY_NAMED_GROUP};
use tracing::debug;

/// Move grouped entries under their group; returns how many groups adopted data.
///
/// When several groups share an id, the last one in entry order adopts the
/// data and the earlier ones stay empty.
pub fn assemble(entries: &mut EntryMap) -> usize {
    let key = Key::Named(KEY_NAMED_GROUP);
    let Some(groups) = entries.get(&key) else {
        return 0;
    };
    let ids: Vec<Option<u32>> = groups
        .values()
        .iter()
        .map(|v| v.as_named_group().map(|g| g.id))
        .collect();

    // Members leave the top level first; the group slot stays where it is.
    let mut adopted = Vec::new();
    for (at, id) in ids.into_iter().enumerate().rev() {
        if let Some(slot) = id.and_then(|id| entries.remove(&Key::Id(id))) {
            adopted.push((at, slot));
        }
    }

    let count = adopted.len();
    if let Some(groups) = entries.get_mut(&key) {
        let values = groups.values_mut();
        for (at, slot) in adopted {
            if let Some(EntryValue::NamedGroup(group)) = values.get_mut(at) {
                debug!(group = %group.label, id = group.id, count = slot.len(), "Group adopted entries");
                group.data = Some(Box::new(slot));
            }
        }
    }
    count
}
