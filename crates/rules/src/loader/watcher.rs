//! Filesystem event handler for the notify watcher (hot-reload).

use std::path::Path;

use notify::event::{CreateKind, ModifyKind, RemoveKind};
use notify::{Event, EventKind};
use tracing::info;

use crate::cache::RuleCache;

use super::core::{install_file, is_hidden, is_yaml, FileIndex};

/// Handle a single filesystem event from the notify watcher.
pub(super) fn handle_fs_event(event: &Event, cache: &RuleCache, files: &FileIndex) {
    for path in &event.paths {
        if !is_yaml(path) || is_hidden(path) {
            continue;
        }

        match &event.kind {
            EventKind::Create(CreateKind::File)
            | EventKind::Modify(ModifyKind::Data(_))
            | EventKind::Modify(ModifyKind::Name(_))
                if path.exists() =>
            {
                install_file(path, cache, files);
            }
            EventKind::Remove(RemoveKind::File) | EventKind::Modify(ModifyKind::Name(_)) => {
                evict(path, cache, files);
            }
            _ => {}
        }
    }
}

fn evict(path: &Path, cache: &RuleCache, files: &FileIndex) {
    let removed = files.write().expect("file index lock poisoned").remove(path);
    if let Some(rule_id) = removed {
        cache.remove(&rule_id);
        info!(rule_id = %rule_id, path = %path.display(), "removed rule after file deletion");
    }
}
