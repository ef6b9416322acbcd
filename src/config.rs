use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CieError, Result};

/// Hard safety ceiling: files larger than this are always skipped, no matter
/// what the config says. Protects against tree-sitter-parsing a multi-MB
/// minified bundle.
pub const ABSOLUTE_MAX_FILE_BYTES: u64 = 8 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParserMode {
    /// Grammar-driven when a grammar exists, heuristic otherwise.
    Auto,
    /// Grammar-driven only; files without grammar support are skipped.
    Grammar,
    /// Heuristic extractor for everything.
    Heuristic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    Ollama,
    Openai,
    Nomic,
    Mock,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepoSource {
    LocalPath(PathBuf),
}

impl Default for RepoSource {
    fn default() -> Self {
        RepoSource::LocalPath(PathBuf::from("."))
    }
}

impl RepoSource {
    pub fn path(&self) -> &Path {
        match self {
            RepoSource::LocalPath(p) => p,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProviderKind,
    /// Base URL of the embedding service. Ignored by the mock provider.
    pub base_url: String,
    pub model: String,
    /// Expected vector dimension; also the dimension of the mock provider's
    /// zero vectors and of the store's HNSW columns.
    pub dimensions: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::Ollama,
            base_url: "http://localhost:11434".to_string(),
            model: "nomic-embed-text".to_string(),
            dimensions: 768,
            api_key: None,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingConfig {
    /// Mutations per store script; batches close when they reach this.
    pub batch_target: usize,
    pub max_file_size: u64,
    /// Glob patterns pruned during the walk, on top of the built-in
    /// high-noise defaults (VCS metadata, dependency caches, build output).
    pub exclude: Vec<String>,
    /// Narrow the candidate set with `git diff` against the checkpointed
    /// commit. Hashes are still verified, so uncommitted edits are caught.
    pub use_git: bool,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            batch_target: 500,
            max_file_size: 1024 * 1024,
            exclude: vec![],
            use_git: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    /// CPU-bound extraction workers.
    pub parse_workers: usize,
    /// Blocking HTTP embedding workers.
    pub embed_workers: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            parse_workers: 4,
            embed_workers: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logical namespace; everything persisted lives under
    /// `local_data_dir/<project_id>/`.
    pub project_id: String,
    pub repo: RepoSource,
    pub parser_mode: ParserMode,
    pub embedding: EmbeddingConfig,
    pub indexing: IndexingConfig,
    pub concurrency: ConcurrencyConfig,
    /// Drop the checkpoint and the store's data directory, then reindex
    /// everything.
    pub force_reindex: bool,
    pub local_data_dir: PathBuf,
    /// Overrides the default `<data_dir>/checkpoints/` location when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_path: Option<PathBuf>,
    /// Cozo engine backing the store: "sqlite" for persisted runs, "mem"
    /// for throwaway/test runs.
    pub store_engine: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            repo: RepoSource::default(),
            parser_mode: ParserMode::Auto,
            embedding: EmbeddingConfig::default(),
            indexing: IndexingConfig::default(),
            concurrency: ConcurrencyConfig::default(),
            force_reindex: false,
            local_data_dir: PathBuf::from(".cie"),
            checkpoint_path: None,
            store_engine: "sqlite".to_string(),
        }
    }
}

impl Config {
    /// Load from a JSON file. A missing file is not an error (defaults plus
    /// whatever the caller fills in afterwards); malformed JSON is.
    pub fn load(path: &Path) -> Result<Config> {
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Config::default());
            }
            Err(e) => return Err(CieError::io(format!("reading {}", path.display()), e)),
        };
        serde_json::from_str(&text).map_err(|e| {
            CieError::config(
                format!("malformed config file {}", path.display()),
                e.to_string(),
                "fix the JSON or delete the file to start from defaults",
            )
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.project_id.trim().is_empty() {
            return Err(CieError::config(
                "project_id is required",
                "an empty project_id would collapse all projects into one data directory",
                "set project_id to a unique name for this repository",
            ));
        }
        if self.embedding.dimensions == 0 {
            return Err(CieError::config(
                "embedding.dimensions must be positive",
                format!("got {}", self.embedding.dimensions),
                "set embedding.dimensions to the provider's vector size (commonly 768)",
            ));
        }
        if self.indexing.batch_target == 0 {
            return Err(CieError::config(
                "indexing.batch_target must be positive",
                "a zero batch target would never close a batch",
                "use the default of 500 unless you have a reason not to",
            ));
        }
        if self.concurrency.parse_workers == 0 || self.concurrency.embed_workers == 0 {
            return Err(CieError::config(
                "worker counts must be positive",
                format!(
                    "parse_workers={}, embed_workers={}",
                    self.concurrency.parse_workers, self.concurrency.embed_workers
                ),
                "defaults are 4 parse workers and 8 embed workers",
            ));
        }
        if !matches!(self.store_engine.as_str(), "sqlite" | "mem") {
            return Err(CieError::config(
                format!("unknown store engine '{}'", self.store_engine),
                "supported engines are 'sqlite' and 'mem'",
                "use 'sqlite' for persisted runs",
            ));
        }
        Ok(())
    }

    /// `local_data_dir/<project_id>/`
    pub fn project_dir(&self) -> PathBuf {
        self.local_data_dir.join(&self.project_id)
    }

    pub fn db_dir(&self) -> PathBuf {
        self.project_dir().join("db")
    }

    pub fn checkpoint_dir(&self) -> PathBuf {
        self.checkpoint_path
            .clone()
            .unwrap_or_else(|| self.project_dir().join("checkpoints"))
    }

    /// Effective per-file size cap: the configured cap, bounded by the hard
    /// ceiling.
    pub fn effective_max_file_size(&self) -> u64 {
        self.indexing.max_file_size.min(ABSOLUTE_MAX_FILE_BYTES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> Config {
        Config {
            project_id: "demo".into(),
            ..Config::default()
        }
    }

    #[test]
    fn defaults_match_the_documented_knobs() {
        let c = Config::default();
        assert_eq!(c.indexing.batch_target, 500);
        assert_eq!(c.indexing.max_file_size, 1024 * 1024);
        assert_eq!(c.concurrency.parse_workers, 4);
        assert_eq!(c.concurrency.embed_workers, 8);
        assert_eq!(c.embedding.dimensions, 768);
        assert_eq!(c.embedding.timeout_secs, 30);
    }

    #[test]
    fn empty_project_id_is_rejected() {
        let err = Config::default().validate().unwrap_err();
        assert_eq!(err.category(), crate::error::ErrorCategory::Config);
    }

    #[test]
    fn valid_config_passes() {
        valid().validate().unwrap();
    }

    #[test]
    fn unknown_engine_is_rejected() {
        let mut c = valid();
        c.store_engine = "rocksdb".into();
        assert!(c.validate().is_err());
    }

    #[test]
    fn paths_nest_under_the_project() {
        let c = valid();
        assert_eq!(c.db_dir(), PathBuf::from(".cie/demo/db"));
        assert_eq!(c.checkpoint_dir(), PathBuf::from(".cie/demo/checkpoints"));

        let mut c = valid();
        c.checkpoint_path = Some(PathBuf::from("/tmp/ckpt"));
        assert_eq!(c.checkpoint_dir(), PathBuf::from("/tmp/ckpt"));
    }

    #[test]
    fn config_round_trips_through_json() {
        let c = valid();
        let text = serde_json::to_string(&c).unwrap();
        let back: Config = serde_json::from_str(&text).unwrap();
        assert_eq!(back.project_id, "demo");
        assert_eq!(back.embedding.dimensions, 768);
    }
}
