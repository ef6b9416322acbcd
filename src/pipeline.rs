//! The orchestrator: walk → plan → parse → validate → embed → write, with
//! checkpointed batches and a progress callback.
//!
//! Crash safety is manifest-based: the manifest on disk always describes
//! exactly what the store holds, because both advance together per
//! committed batch. A rerun after an interruption replans from that
//! manifest and only touches what is still outstanding.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use crate::checkpoint::{Checkpointer, PhaseMarker};
use crate::config::Config;
use crate::delta;
use crate::embed::{provider_from_config, EmbedRequest, Embedder};
use crate::error::{CieError, Result};
use crate::git;
use crate::ids;
use crate::manifest::{Manifest, ManifestEntry, OwnedIds};
use crate::model::{
    FileFacts, FileRecord, Phase, Progress, RunCounters, RunError, RunReport,
};
use crate::mutation::ScriptBuilder;
use crate::parser::{self, implements, ParseOutcome};
use crate::store::{QueryResult, Store};
use crate::validate::Validator;
use crate::walker::{walk_repository, SourceFile, WalkOptions};

/// Per-mutation slice of a write batch's deadline; batches always get at
/// least [`MIN_WRITE_TIMEOUT`].
const WRITE_BUDGET_PER_MUTATION: Duration = Duration::from_millis(20);
const MIN_WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Cooperative cancellation handle. Workers drain their current unit of
/// work and exit; the last committed batch's manifest stays on disk.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub(crate) fn flag(&self) -> &AtomicBool {
        &self.0
    }
}

fn collect_owned_ids(facts: &FileFacts) -> OwnedIds {
    OwnedIds {
        functions: facts.functions.iter().map(|f| f.id.clone()).collect(),
        types: facts.types.iter().map(|t| t.id.clone()).collect(),
        fields: facts.fields.iter().map(|f| f.id.clone()).collect(),
        imports: facts.imports.iter().map(|i| i.id.clone()).collect(),
        calls: facts.calls.iter().map(|c| c.id.clone()).collect(),
        defines: facts.defines.iter().map(|d| d.id.clone()).collect(),
        defines_type: facts.defines_type.iter().map(|d| d.id.clone()).collect(),
        implements: facts.implements.iter().map(|i| i.id.clone()).collect(),
    }
}

/// The engine owns the store for its lifetime: open on construction,
/// closed on drop, never shared across overlapping runs on one data dir.
pub struct Engine {
    config: Config,
    store: Store,
    checkpointer: Checkpointer,
}

impl Engine {
    pub fn open(config: Config) -> Result<Engine> {
        config.validate()?;
        let checkpointer = Checkpointer::new(config.checkpoint_dir());
        if config.force_reindex {
            info!("force_reindex: wiping checkpoint and store data");
            checkpointer.wipe(&config.db_dir())?;
        }
        let store = Store::open(
            &config.store_engine,
            &config.db_dir(),
            config.embedding.dimensions,
        )?;
        store.put_meta("project_id", &config.project_id)?;
        Ok(Engine {
            config,
            store,
            checkpointer,
        })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// The single query surface exposed to downstream consumers.
    pub fn query(
        &self,
        script: &str,
        params: &serde_json::Map<String, JsonValue>,
        timeout: Duration,
    ) -> Result<QueryResult> {
        self.store.query(script, params, timeout)
    }

    fn save_phase(&self, phase: &str, git_head: &Option<String>, batches: usize) -> Result<()> {
        self.checkpointer.save_phase(&PhaseMarker {
            phase: phase.to_string(),
            git_head: git_head.clone(),
            batches_committed: batches,
        })
    }

    /// Paths git guarantees unchanged since the checkpointed commit; their
    /// manifest hashes can be reused without re-reading the files.
    fn git_reuse_hashes(&self, manifest: &Manifest) -> BTreeMap<String, String> {
        let mut reuse = BTreeMap::new();
        if !self.config.indexing.use_git || self.config.force_reindex {
            return reuse;
        }
        let Some(prev_head) = self.checkpointer.load_phase().and_then(|p| p.git_head) else {
            return reuse;
        };
        let root = self.config.repo.path();
        let Some(changes) = git::changed_since(root, &prev_head) else {
            debug!("git delta unavailable, falling back to full hash sweep");
            return reuse;
        };
        let changed: BTreeSet<&str> = changes.iter().map(|c| c.path.as_str()).collect();
        for (path, entry) in &manifest.entries {
            if !changed.contains(path.as_str()) {
                reuse.insert(path.clone(), entry.hash.clone());
            }
        }
        debug!(
            candidates = changes.len(),
            reused = reuse.len(),
            "git-delta narrowed the hash sweep"
        );
        reuse
    }

    /// Run the full ingestion pipeline.
    pub fn index(
        &self,
        progress: &mut dyn FnMut(Progress),
        cancel: &CancelToken,
    ) -> Result<RunReport> {
        let started = Instant::now();
        let counters = RunCounters::default();
        let mut report = RunReport::default();
        let mut manifest = self.checkpointer.load_manifest()?;

        let repo_root = self.config.repo.path().to_path_buf();
        let git_head = if self.config.indexing.use_git {
            git::head_commit(&repo_root)
        } else {
            None
        };

        // ── Walk + hash ──────────────────────────────────────────────────
        self.save_phase("walking", &git_head, 0)?;
        let walk = walk_repository(&WalkOptions {
            repo_root: repo_root.clone(),
            exclude: self.config.indexing.exclude.clone(),
            max_file_bytes: self.config.effective_max_file_size(),
            reuse_hashes: self.git_reuse_hashes(&manifest),
        })?;
        report.files_walked = walk.files.len();
        for s in &walk.skipped {
            *report.skipped.entry(s.reason.as_str().to_string()).or_insert(0) += 1;
        }
        progress(Progress {
            phase: Phase::Walking,
            current: walk.files.len(),
            total: walk.files.len(),
        });
        if cancel.is_cancelled() {
            return Err(CieError::Cancelled);
        }

        // ── Delta plan ───────────────────────────────────────────────────
        let current: Vec<(&str, &str)> = walk
            .files
            .iter()
            .map(|f| (f.rel_path.as_str(), f.hash.as_str()))
            .collect();
        let plan = delta::plan(&manifest, current, self.config.force_reindex);
        report.files_added = plan.added.len();
        report.files_modified = plan.modified.len();
        report.files_deleted = plan.deleted.len();
        report.files_unchanged = plan.unchanged.len();
        info!(
            added = plan.added.len(),
            modified = plan.modified.len(),
            deleted = plan.deleted.len(),
            unchanged = plan.unchanged.len(),
            "delta planned"
        );

        // ── Parse ────────────────────────────────────────────────────────
        self.save_phase("parsing", &git_head, 0)?;
        let by_path: HashMap<&str, &SourceFile> =
            walk.files.iter().map(|f| (f.rel_path.as_str(), f)).collect();
        let to_parse: Vec<&SourceFile> = plan
            .to_parse()
            .filter_map(|p| by_path.get(p).copied())
            .collect();

        let parse_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.concurrency.parse_workers.max(1))
            .thread_name(|i| format!("cie-parse-{i}"))
            .build()
            .map_err(|e| CieError::config("could not start parse pool", e.to_string(), "lower concurrency.parse_workers"))?;

        let mode = self.config.parser_mode;
        let mut parsed: Vec<(&SourceFile, ParseOutcome)> = Vec::with_capacity(to_parse.len());
        let chunk_size = (self.config.concurrency.parse_workers * 2).max(1);
        for chunk in to_parse.chunks(chunk_size) {
            if cancel.is_cancelled() {
                return Err(CieError::Cancelled);
            }
            let results: Vec<(&SourceFile, ParseOutcome)> = parse_pool.install(|| {
                chunk
                    .par_iter()
                    .map(|sf| {
                        let outcome =
                            parser::extract_file(&sf.rel_path, &sf.content, sf.language, mode);
                        (*sf, outcome)
                    })
                    .collect()
            });
            parsed.extend(results);
            progress(Progress {
                phase: Phase::Parsing,
                current: parsed.len(),
                total: to_parse.len(),
            });
        }

        for (sf, outcome) in &parsed {
            if outcome.parse_errors > 0 {
                counters
                    .parse_errors
                    .fetch_add(outcome.parse_errors as u64, Ordering::Relaxed);
                report.errors.push(RunError {
                    category: "parse".into(),
                    path: sf.rel_path.clone(),
                    message: format!("{} parse error(s), partial extraction", outcome.parse_errors),
                });
            }
            for _ in 0..outcome.truncated {
                counters.bump_truncated();
            }
        }

        // ── Implements pass over the whole extraction ────────────────────
        let edges = {
            let all_types: Vec<_> = parsed.iter().flat_map(|(_, o)| o.facts.types.iter()).collect();
            let all_fns: Vec<_> = parsed
                .iter()
                .flat_map(|(_, o)| o.facts.functions.iter())
                .collect();
            implements::compute(&all_types, &all_fns)
        };
        let idx_by_path: HashMap<String, usize> = parsed
            .iter()
            .enumerate()
            .map(|(i, (sf, _))| (sf.rel_path.clone(), i))
            .collect();
        for edge in edges {
            if let Some(&i) = idx_by_path.get(edge.file_path.as_str()) {
                parsed[i].1.facts.implements.push(edge);
            }
        }

        let records: Vec<FileRecord> = parsed
            .iter()
            .map(|(sf, _)| FileRecord {
                id: ids::file_id(&sf.rel_path),
                path: sf.rel_path.clone(),
                hash: sf.hash.clone(),
                language: sf.language.as_str().to_string(),
                size_bytes: sf.size_bytes,
            })
            .collect();

        // ── Structural validation, before any embedding spend ────────────
        let mut validator = Validator::new();
        let mut issues = Vec::new();
        for ((_, outcome), record) in parsed.iter().zip(&records) {
            issues.extend(validator.validate_file(record, &outcome.facts));
        }
        if !issues.is_empty() {
            return Err(CieError::Validation { issues });
        }

        // ── Embedding: functions, then types ─────────────────────────────
        self.save_phase("embedding", &git_head, 0)?;
        let embedder = Embedder::new(
            provider_from_config(&self.config.embedding),
            self.config.concurrency.embed_workers,
        )?;

        let fn_requests: Vec<EmbedRequest> = parsed
            .iter()
            .flat_map(|(_, o)| o.facts.functions.iter())
            .filter(|f| !f.code_text.trim().is_empty())
            .map(|f| EmbedRequest {
                entity_id: f.id.clone(),
                text: f.code_text.clone(),
            })
            .collect();
        let total = fn_requests.len();
        let mut vectors =
            embedder.run(&fn_requests, &counters, cancel.flag(), |done, total| {
                progress(Progress {
                    phase: Phase::Embedding,
                    current: done,
                    total,
                })
            });
        progress(Progress {
            phase: Phase::Embedding,
            current: total,
            total,
        });
        if cancel.is_cancelled() {
            return Err(CieError::Cancelled);
        }
        for (_, outcome) in parsed.iter_mut() {
            for f in outcome.facts.functions.iter_mut() {
                f.embedding = vectors.remove(&f.id);
            }
        }

        let ty_requests: Vec<EmbedRequest> = parsed
            .iter()
            .flat_map(|(_, o)| o.facts.types.iter())
            .filter(|t| !t.code_text.trim().is_empty())
            .map(|t| EmbedRequest {
                entity_id: t.id.clone(),
                text: t.code_text.clone(),
            })
            .collect();
        let total = ty_requests.len();
        let mut vectors =
            embedder.run(&ty_requests, &counters, cancel.flag(), |done, total| {
                progress(Progress {
                    phase: Phase::EmbeddingTypes,
                    current: done,
                    total,
                })
            });
        progress(Progress {
            phase: Phase::EmbeddingTypes,
            current: total,
            total,
        });
        if cancel.is_cancelled() {
            return Err(CieError::Cancelled);
        }
        for (_, outcome) in parsed.iter_mut() {
            for t in outcome.facts.types.iter_mut() {
                t.embedding = vectors.remove(&t.id);
            }
        }

        // ── Full validation (now with vectors) ───────────────────────────
        let mut validator = Validator::new();
        let mut issues = Vec::new();
        for ((_, outcome), record) in parsed.iter().zip(&records) {
            issues.extend(validator.validate_file(record, &outcome.facts));
        }
        if !issues.is_empty() {
            return Err(CieError::Validation { issues });
        }

        for (_, outcome) in &parsed {
            report.functions += outcome.facts.functions.len();
            report.types += outcome.facts.types.len();
            report.fields += outcome.facts.fields.len();
            report.imports += outcome.facts.imports.len();
            report.calls += outcome.facts.calls.len();
            report.implements += outcome.facts.implements.len();
        }

        // ── Write: batched delete+upsert scripts ─────────────────────────
        self.save_phase("writing", &git_head, 0)?;
        let batch_target = self.config.indexing.batch_target;
        let total_units = plan.deleted.len() + parsed.len();
        let mut units_done = 0usize;
        let mut batches = 0usize;

        let mut builder = ScriptBuilder::new();
        let mut batch_removed: Vec<String> = Vec::new();
        let mut batch_upserted: Vec<(String, ManifestEntry)> = Vec::new();
        let mut queued_removals: HashSet<String> = HashSet::new();

        macro_rules! commit_batch {
            () => {{
                let pending = std::mem::replace(&mut builder, ScriptBuilder::new());
                let mutations = pending.mutations();
                if mutations > 0 {
                    let script = pending.build();
                    let timeout = (WRITE_BUDGET_PER_MUTATION * mutations as u32).max(MIN_WRITE_TIMEOUT);
                    if let Err(first) = self.store.execute_with_timeout(&script, timeout) {
                        warn!(error = %first, "batch failed, retrying once");
                        self.store.execute_with_timeout(&script, timeout)?;
                    }
                    for path in batch_removed.drain(..) {
                        manifest.entries.remove(&path);
                    }
                    for (path, entry) in batch_upserted.drain(..) {
                        manifest.entries.insert(path, entry);
                    }
                    self.checkpointer.save_manifest(&manifest)?;
                    batches += 1;
                    report.batches_committed = batches;
                    report.mutations_emitted += mutations;
                    self.save_phase("writing", &git_head, batches)?;
                    debug!(batch = batches, mutations, "batch committed");
                }
            }};
        }

        for path in &plan.deleted {
            if cancel.is_cancelled() {
                return Err(CieError::Cancelled);
            }
            if let Some(entry) = manifest.entries.get(path) {
                builder.remove_file(entry);
                batch_removed.push(path.clone());
                queued_removals.insert(path.clone());
            }
            units_done += 1;
            if builder.mutations() >= batch_target {
                commit_batch!();
                progress(Progress {
                    phase: Phase::Writing,
                    current: units_done,
                    total: total_units,
                });
            }
        }

        for ((sf, outcome), record) in parsed.iter().zip(&records) {
            if cancel.is_cancelled() {
                return Err(CieError::Cancelled);
            }
            // Modified files shed their previous entities first, in the
            // same script that re-inserts them.
            if !queued_removals.contains(&sf.rel_path) {
                if let Some(old) = manifest.entries.get(&sf.rel_path) {
                    builder.remove_file(old);
                    queued_removals.insert(sf.rel_path.clone());
                }
            }
            builder.put_file(record, &outcome.facts);
            batch_upserted.push((
                sf.rel_path.clone(),
                ManifestEntry {
                    hash: sf.hash.clone(),
                    file_id: record.id.clone(),
                    entity_ids: collect_owned_ids(&outcome.facts),
                },
            ));
            units_done += 1;
            if builder.mutations() >= batch_target {
                commit_batch!();
                progress(Progress {
                    phase: Phase::Writing,
                    current: units_done,
                    total: total_units,
                });
            }
        }

        commit_batch!();
        progress(Progress {
            phase: Phase::Writing,
            current: units_done,
            total: total_units,
        });

        self.checkpointer.save_manifest(&manifest)?;
        self.save_phase("done", &git_head, batches)?;

        report.counters = counters.snapshot();
        report.duration = started.elapsed();
        info!(
            files = report.files_walked,
            functions = report.functions,
            mutations = report.mutations_emitted,
            batches = report.batches_committed,
            secs = %format!("{:.2}", report.duration.as_secs_f64()),
            "ingestion finished"
        );
        Ok(report)
    }
}
