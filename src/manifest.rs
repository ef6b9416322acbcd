use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{CieError, Result};

/// Every id a file contributed to the store, grouped by relation. Deletion
/// is always by primary key, so the manifest must remember each one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OwnedIds {
    pub functions: Vec<String>,
    pub types: Vec<String>,
    pub fields: Vec<String>,
    pub imports: Vec<String>,
    pub calls: Vec<String>,
    pub defines: Vec<String>,
    pub defines_type: Vec<String>,
    pub implements: Vec<String>,
}

impl OwnedIds {
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
            && self.types.is_empty()
            && self.fields.is_empty()
            && self.imports.is_empty()
            && self.calls.is_empty()
            && self.defines.is_empty()
            && self.defines_type.is_empty()
            && self.implements.is_empty()
    }

    /// Mutation count of deleting everything this file owns (including the
    /// file row itself and the function/type side tables).
    pub fn deletion_count(&self) -> usize {
        self.calls.len()
            + self.defines.len()
            + self.defines_type.len()
            + self.implements.len()
            + self.fields.len()
            + self.imports.len()
            // function meta + code + embedding rows
            + self.functions.len() * 3
            + self.types.len() * 3
            + 1 // the cie_file row
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub hash: String,
    pub file_id: String,
    pub entity_ids: OwnedIds,
}

/// The persisted picture of the previous run: path → (hash, owned ids).
///
/// A BTreeMap keeps serialization deterministic, which keeps checkpoint
/// diffs readable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    pub entries: BTreeMap<String, ManifestEntry>,
}

impl Manifest {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Load from disk. A missing file means "first run"; a corrupt file is
    /// reported as manifest corruption rather than silently rebuilt, since
    /// the store may still hold the old facts.
    pub fn load(path: &Path) -> Result<Manifest> {
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Manifest::default());
            }
            Err(e) => return Err(CieError::io(format!("reading {}", path.display()), e)),
        };
        serde_json::from_str(&text).map_err(|e| {
            CieError::io(
                format!(
                    "corrupt manifest at {} (run with force_reindex to rebuild)",
                    path.display()
                ),
                std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()),
            )
        })
    }

    /// Atomic save: write to a sibling temp file, then rename over the old
    /// snapshot. An interrupted run keeps the previous manifest intact.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| CieError::io(format!("creating {}", parent.display()), e))?;
        }
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| CieError::store("manifest serialization failed", e.to_string()))?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, text)
            .map_err(|e| CieError::io(format!("writing {}", tmp.display()), e))?;
        std::fs::rename(&tmp, path)
            .map_err(|e| CieError::io(format!("renaming {}", tmp.display()), e))?;
        Ok(())
    }
}
