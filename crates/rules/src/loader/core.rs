//! Core [`RuleLoader`] struct: compiles rule files from a directory into a
//! [`RuleCache`], with optional hot-reload.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{info, warn};

use crate::cache::RuleCache;
use crate::schema::RuleDefinition;

use super::error::{LoadResult, LoadStatus, Result};
use super::watcher::handle_fs_event;

/// Rule file path → rule id, so deletions can evict the right rule.
pub(super) type FileIndex = Arc<RwLock<HashMap<PathBuf, String>>>;

/// Filesystem-backed rule loader.
///
/// Scans a directory (recursively) for `*.yml` / `*.yaml` files, parses each
/// into a [`RuleDefinition`] and installs it into the shared [`RuleCache`].
pub struct RuleLoader {
    rules_dir: PathBuf,
    cache: Arc<RuleCache>,
    files: FileIndex,
    /// Active filesystem watcher (held to keep it alive).
    _watcher: Option<RecommendedWatcher>,
}

impl RuleLoader {
    /// Create a loader for `rules_dir`, creating the directory if missing.
    pub fn new(rules_dir: PathBuf, cache: Arc<RuleCache>) -> Self {
        if !rules_dir.exists() {
            if let Err(e) = fs::create_dir_all(&rules_dir) {
                warn!(path = %rules_dir.display(), error = %e, "failed to create rules directory");
            }
        }
        Self {
            rules_dir,
            cache,
            files: Arc::new(RwLock::new(HashMap::new())),
            _watcher: None,
        }
    }

    /// Recursively scan the rules directory and install every rule file.
    ///
    /// Dotfiles and non-YAML files are skipped. Per-file failures are reported
    /// in the results and never abort the scan.
    pub fn load_all(&self) -> Result<Vec<LoadResult>> {
        let mut results = Vec::new();
        self.scan_dir_recursive(&self.rules_dir, &mut results)?;
        Ok(results)
    }

    fn scan_dir_recursive(&self, dir: &Path, results: &mut Vec<LoadResult>) -> Result<()> {
        let entries = match fs::read_dir(dir) {
            Ok(e) => e,
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "failed to read directory");
                return Ok(());
            }
        };

        let mut paths: Vec<PathBuf> = entries
            .collect::<std::io::Result<Vec<_>>>()?
            .into_iter()
            .map(|e| e.path())
            .collect();
        // Deterministic install order across platforms.
        paths.sort();

        for path in paths {
            if is_hidden(&path) {
                if path.is_file() {
                    results.push(skipped(path, "dotfile"));
                }
                continue;
            }

            if path.is_dir() {
                self.scan_dir_recursive(&path, results)?;
                continue;
            }

            if !is_yaml(&path) {
                results.push(skipped(path, "not a YAML file"));
                continue;
            }

            let status = install_file(&path, &self.cache, &self.files);
            results.push(LoadResult { path, status });
        }

        Ok(())
    }

    /// Parse a single YAML file into a [`RuleDefinition`] without installing it.
    pub fn load_file(&self, path: &Path) -> Result<RuleDefinition> {
        read_definition(path)
    }

    /// Start a filesystem watcher.
    ///
    /// Created or modified files are recompiled and installed; deleted files
    /// evict their rule. Failures are logged and the previous version is kept.
    pub fn watch(&mut self) -> Result<()> {
        let cache = Arc::clone(&self.cache);
        let files = Arc::clone(&self.files);

        let mut watcher = notify::recommended_watcher(
            move |res: std::result::Result<notify::Event, notify::Error>| match res {
                Ok(event) => handle_fs_event(&event, &cache, &files),
                Err(e) => warn!(error = %e, "filesystem watcher error"),
            },
        )?;

        watcher.watch(&self.rules_dir, RecursiveMode::Recursive)?;
        let _ = watcher.configure(notify::Config::default().with_poll_interval(Duration::from_millis(500)));

        info!(path = %self.rules_dir.display(), "watching rules directory for changes (recursive)");
        self._watcher = Some(watcher);
        Ok(())
    }

    pub fn rules_dir(&self) -> &Path {
        &self.rules_dir
    }

    pub fn cache(&self) -> &Arc<RuleCache> {
        &self.cache
    }

    /// Rule id loaded from `path`, if any.
    pub fn rule_for_path(&self, path: &Path) -> Option<String> {
        self.files
            .read()
            .expect("file index lock poisoned")
            .get(path)
            .cloned()
    }
}

pub(super) fn read_definition(path: &Path) -> Result<RuleDefinition> {
    let contents = fs::read_to_string(path)?;
    Ok(RuleDefinition::from_yaml(&contents)?)
}

/// Parse, compile and install one file, recording it in the file index.
pub(super) fn install_file(path: &Path, cache: &RuleCache, files: &FileIndex) -> LoadStatus {
    let result = read_definition(path).and_then(|def| {
        cache.install(&def)?;
        Ok(def)
    });

    match result {
        Ok(def) => {
            info!(rule_id = %def.id, version = def.version, path = %path.display(), "loaded rule");
            files
                .write()
                .expect("file index lock poisoned")
                .insert(path.to_path_buf(), def.id.clone());
            LoadStatus::Loaded {
                rule_id: def.id,
                version: def.version,
            }
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to load rule file");
            LoadStatus::Failed { error: e.to_string() }
        }
    }
}

pub(super) fn is_yaml(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e == "yml" || e == "yaml")
        .unwrap_or(false)
}

pub(super) fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}

fn skipped(path: PathBuf, reason: &str) -> LoadResult {
    LoadResult {
        path,
        status: LoadStatus::Skipped {
            reason: reason.to_string(),
        },
    }
}
