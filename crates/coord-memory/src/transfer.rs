//! Bulk export and import
//!
//! Used for backup and migration between backing files. Keys, values and
//! metadata are preserved exactly; timestamps are re-assigned by the target
//! store, except that a remaining expiry carries over as the same absolute
//! `expiresAt`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::entry::{resolve_namespace, validate_key, Entry, ListOptions};
use crate::error::{Result, StoreError};
use crate::namespaces;
use crate::store::MemoryStore;

/// Namespace → entries, in insertion order
pub type ExportMap = BTreeMap<String, Vec<Entry>>;

/// Current backup document version
pub const EXPORT_FORMAT_VERSION: u32 = 1;

/// On-disk backup document
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDocument {
    pub version: u32,
    pub exported_at: DateTime<Utc>,
    pub namespaces: ExportMap,
}

/// Outcome of an import
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub imported: usize,
    /// Entries whose expiry had already passed
    pub skipped_expired: usize,
}

impl MemoryStore {
    /// Dump live entries of one namespace, or of every known namespace.
    ///
    /// A full export covers [`namespaces::EXPORTED`] plus any other namespace
    /// that currently holds live entries. Empty namespaces are omitted.
    pub fn export_data(&self, namespace: Option<&str>) -> Result<ExportMap> {
        let targets: Vec<String> = match namespace {
            Some(ns) => vec![resolve_namespace(ns)?.to_string()],
            None => {
                let mut all: Vec<String> =
                    namespaces::EXPORTED.iter().map(|ns| ns.to_string()).collect();
                for (ns, _) in self.namespaces()? {
                    if !all.contains(&ns) {
                        all.push(ns);
                    }
                }
                all
            }
        };

        let mut export = ExportMap::new();
        for ns in targets {
            let entries = self.list(&ns, ListOptions::default())?;
            if !entries.is_empty() {
                export.insert(ns, entries);
            }
        }
        Ok(export)
    }

    /// Restore entries produced by [`MemoryStore::export_data`].
    ///
    /// Existing keys are overwritten. The map key wins over an entry's own
    /// `namespace` field.
    ///
    /// Every namespace and key is validated before anything is written, so
    /// malformed input leaves the store untouched. Entries are written one at
    /// a time: a backend error partway through keeps the entries already
    /// written, and the count is logged with the error. Importing the same
    /// document again is safe.
    pub fn import_data(&self, data: &ExportMap) -> Result<ImportSummary> {
        for (namespace, entries) in data {
            resolve_namespace(namespace)?;
            for entry in entries {
                validate_key(&entry.key)?;
            }
        }

        let now = self.now();
        let mut summary = ImportSummary::default();
        for (namespace, entries) in data {
            for entry in entries {
                if entry.is_expired_at(now) {
                    summary.skipped_expired += 1;
                    continue;
                }
                let written = self.write(
                    namespace,
                    &entry.key,
                    &entry.value,
                    &entry.metadata,
                    entry.expires_at,
                );
                if let Err(err) = written {
                    tracing::warn!(
                        imported = summary.imported,
                        namespace = namespace.as_str(),
                        key = entry.key.as_str(),
                        "import stopped partway: {}",
                        err
                    );
                    return Err(err);
                }
                summary.imported += 1;
            }
        }

        tracing::info!(
            imported = summary.imported,
            skipped_expired = summary.skipped_expired,
            "import finished"
        );
        Ok(summary)
    }

    /// Write a JSON backup document; returns the number of entries written
    pub fn export_to_file(&self, path: impl AsRef<Path>, namespace: Option<&str>) -> Result<usize> {
        let path = path.as_ref();
        let document = ExportDocument {
            version: EXPORT_FORMAT_VERSION,
            exported_at: self.now(),
            namespaces: self.export_data(namespace)?,
        };
        let count = document.namespaces.values().map(Vec::len).sum();

        let json = serde_json::to_string_pretty(&document)
            .map_err(|e| StoreError::serialization(path.display().to_string(), e))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)?;
        Ok(count)
    }

    /// Load a JSON backup document written by [`MemoryStore::export_to_file`]
    pub fn import_from_file(&self, path: impl AsRef<Path>) -> Result<ImportSummary> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let document: ExportDocument = serde_json::from_str(&content)
            .map_err(|e| StoreError::serialization(path.display().to_string(), e))?;
        if document.version > EXPORT_FORMAT_VERSION {
            return Err(StoreError::validation(
                "version",
                format!(
                    "backup format {} is newer than supported format {}",
                    document.version, EXPORT_FORMAT_VERSION
                ),
            ));
        }
        self.import_data(&document.namespaces)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::entry::StoreOptions;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_export_covers_fixed_and_discovered_namespaces() {
        let store = MemoryStore::in_memory(Arc::new(ManualClock::starting_now()));
        let record = json!({"status": "active"});
        store.store("agents", "agent:1", record, StoreOptions::default()).unwrap();
        store.store("scratch", "k", json!(1), StoreOptions::default()).unwrap();

        let all = store.export_data(None).unwrap();
        assert_eq!(all.keys().collect::<Vec<_>>(), vec!["agents", "scratch"]);

        let one = store.export_data(Some("agents")).unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one["agents"][0].key, "agent:1");
    }

    #[test]
    fn test_import_skips_expired_and_keeps_expiry() {
        let clock = Arc::new(ManualClock::starting_now());
        let source = MemoryStore::in_memory(clock.clone());
        let (minute, ten_secs) = (Duration::from_secs(60), Duration::from_secs(10));
        source
            .store("coordination", "coord:a", json!("a"), StoreOptions::with_ttl(minute))
            .unwrap();
        source
            .store("coordination", "coord:b", json!("b"), StoreOptions::with_ttl(ten_secs))
            .unwrap();
        let dump = source.export_data(None).unwrap();

        clock.advance(Duration::from_secs(30));
        let target = MemoryStore::in_memory(clock.clone());
        let summary = target.import_data(&dump).unwrap();
        assert_eq!(summary, ImportSummary { imported: 1, skipped_expired: 1 });

        let restored = target.retrieve("coordination", "coord:a").unwrap().unwrap();
        assert_eq!(restored.expires_at, dump["coordination"][0].expires_at);
        clock.advance(Duration::from_secs(30));
        assert!(target.retrieve("coordination", "coord:a").unwrap().is_none());
    }

    #[test]
    fn test_file_round_trip_and_version_check() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backup").join("memory.json");
        let clock = Arc::new(ManualClock::starting_now());

        let source = MemoryStore::in_memory(clock.clone());
        source
            .store(
                "knowledge",
                "knowledge:rust:ownership",
                json!({"rule": "one owner"}),
                StoreOptions::default().meta("source", "book"),
            )
            .unwrap();
        assert_eq!(source.export_to_file(&path, None).unwrap(), 1);

        let target = MemoryStore::in_memory(clock);
        assert_eq!(target.import_from_file(&path).unwrap().imported, 1);
        let entry = target.retrieve("knowledge", "knowledge:rust:ownership").unwrap().unwrap();
        assert_eq!(entry.value, json!({"rule": "one owner"}));
        assert_eq!(entry.metadata["source"], "book");

        let newer = r#"{"version": 99, "exportedAt": "2024-01-01T00:00:00Z", "namespaces": {}}"#;
        std::fs::write(&path, newer).unwrap();
        assert!(matches!(
            target.import_from_file(&path),
            Err(StoreError::Validation { field: "version", .. })
        ));
    }

    #[test]
    fn test_malformed_import_writes_nothing() {
        let clock = Arc::new(ManualClock::starting_now());
        let source = MemoryStore::in_memory(clock.clone());
        source.store("scratch", "first", json!(1), StoreOptions::default()).unwrap();
        source.store("scratch", "second", json!(2), StoreOptions::default()).unwrap();
        let mut dump = source.export_data(None).unwrap();
        let mut broken = dump["scratch"][0].clone();
        broken.key = String::new();
        dump.get_mut("scratch").unwrap().push(broken);

        let target = MemoryStore::in_memory(clock);
        assert!(matches!(
            target.import_data(&dump),
            Err(StoreError::Validation { field: "key", .. })
        ));
        assert!(target.list("scratch", ListOptions::default()).unwrap().is_empty());
    }
}
