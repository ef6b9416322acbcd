//! Checkpoint persistence: the manifest snapshot plus a small phase marker
//! (`phase.json`) carrying the last phase reached and the git HEAD the run
//! saw. Both are written after every committed batch, so an interrupted
//! run resumes from the last batch that actually reached the store.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CieError, Result};
use crate::manifest::Manifest;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseMarker {
    /// Last phase the run entered ("walking" … "writing", "done").
    pub phase: String,
    /// HEAD at checkpoint time; feeds the next run's git-delta candidates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_head: Option<String>,
    pub batches_committed: usize,
}

#[derive(Debug, Clone)]
pub struct Checkpointer {
    dir: PathBuf,
}

impl Checkpointer {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.dir.join("manifest.json")
    }

    fn phase_path(&self) -> PathBuf {
        self.dir.join("phase.json")
    }

    pub fn load_manifest(&self) -> Result<Manifest> {
        Manifest::load(&self.manifest_path())
    }

    /// Missing or unreadable phase markers are not fatal — the manifest is
    /// the source of truth; the marker only carries resume hints.
    pub fn load_phase(&self) -> Option<PhaseMarker> {
        let text = std::fs::read_to_string(self.phase_path()).ok()?;
        serde_json::from_str(&text).ok()
    }

    pub fn save_manifest(&self, manifest: &Manifest) -> Result<()> {
        manifest.save(&self.manifest_path())
    }

    pub fn save_phase(&self, marker: &PhaseMarker) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| CieError::io(format!("creating {}", self.dir.display()), e))?;
        let text = serde_json::to_string_pretty(marker)
            .map_err(|e| CieError::store("phase marker serialization failed", e.to_string()))?;
        let tmp = self.phase_path().with_extension("json.tmp");
        std::fs::write(&tmp, text)
            .map_err(|e| CieError::io(format!("writing {}", tmp.display()), e))?;
        std::fs::rename(&tmp, self.phase_path())
            .map_err(|e| CieError::io(format!("renaming {}", tmp.display()), e))?;
        Ok(())
    }

    /// Force-full cleanup: drop the checkpoint files and the store's data
    /// directory. Missing pieces are fine; a half-created tree is not.
    pub fn wipe(&self, db_dir: &Path) -> Result<()> {
        for path in [self.manifest_path(), self.phase_path()] {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(CieError::io(format!("removing {}", path.display()), e)),
            }
        }
        match std::fs::remove_dir_all(db_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(CieError::io(format!("removing {}", db_dir.display()), e)),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{ManifestEntry, OwnedIds};

    #[test]
    fn phase_marker_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let ckpt = Checkpointer::new(dir.path().join("checkpoints"));

        assert!(ckpt.load_phase().is_none());

        ckpt.save_phase(&PhaseMarker {
            phase: "writing".into(),
            git_head: Some("abc123".into()),
            batches_committed: 3,
        })
        .unwrap();

        let marker = ckpt.load_phase().unwrap();
        assert_eq!(marker.phase, "writing");
        assert_eq!(marker.git_head.as_deref(), Some("abc123"));
        assert_eq!(marker.batches_committed, 3);
    }

    #[test]
    fn wipe_clears_checkpoints_and_db() {
        let dir = tempfile::tempdir().unwrap();
        let ckpt = Checkpointer::new(dir.path().join("checkpoints"));
        let db_dir = dir.path().join("db");
        std::fs::create_dir_all(&db_dir).unwrap();
        std::fs::write(db_dir.join("cie.db"), b"x").unwrap();

        let mut manifest = Manifest::default();
        manifest.entries.insert(
            "a.go".into(),
            ManifestEntry {
                hash: "h".into(),
                file_id: "f".into(),
                entity_ids: OwnedIds::default(),
            },
        );
        ckpt.save_manifest(&manifest).unwrap();
        ckpt.save_phase(&PhaseMarker::default()).unwrap();

        ckpt.wipe(&db_dir).unwrap();
        assert!(ckpt.load_manifest().unwrap().is_empty());
        assert!(ckpt.load_phase().is_none());
        assert!(!db_dir.exists());

        // Wiping twice is fine.
        ckpt.wipe(&db_dir).unwrap();
    }
}
