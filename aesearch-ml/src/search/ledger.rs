//! Directory-backed experiment ledger with an append-only index.
//!
//! Layout of one experiment directory:
//!
//! ```text
//! <experiment_dir>/
//!   ledger.jsonl              one IndexEntry per line, appended on every record write
//!   version_0/hparams.json
//!   version_0/meta_tags.json
//!   version_1/...
//! ```
//!
//! Each process owns the version directory it claimed; other versions are only read.

use aesearch_core::ModelClass;
use aesearch_core::persistence::{atomic_write, atomic_write_json, load_json};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::record::{ExperimentRecord, VersionId};
use crate::error::Result;

pub const INDEX_FILE: &str = "ledger.jsonl";
pub const HPARAMS_FILE: &str = "hparams.json";
pub const META_TAGS_FILE: &str = "meta_tags.json";

/// `<session_dir>/<model_class>/conv/<NN>_latents/<experiment_name>`
pub fn experiment_dir(
    session_dir: &Path,
    model_class: ModelClass,
    n_latents: usize,
    experiment_name: &str,
) -> PathBuf {
    session_dir
        .join(model_class.as_str())
        .join("conv")
        .join(format!("{n_latents:02}_latents"))
        .join(experiment_name)
}

/// Index line summarizing one record write. The latest line per version wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub version: VersionId,
    pub fingerprint: String,
    pub training_completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_val_loss: Option<f64>,
}

impl From<&ExperimentRecord> for IndexEntry {
    fn from(record: &ExperimentRecord) -> Self {
        Self {
            version: record.version,
            fingerprint: record.fingerprint.clone(),
            training_completed: record.training_completed,
            best_val_loss: record.best_val_loss(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExperimentLedger {
    dir: PathBuf,
}

impl ExperimentLedger {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn version_dir(&self, version: VersionId) -> PathBuf {
        self.dir.join(version.to_string())
    }

    pub fn meta_tags_path(&self, version: VersionId) -> PathBuf {
        self.version_dir(version).join(META_TAGS_FILE)
    }

    /// Claim the next free version directory.
    ///
    /// Non-recursive `create_dir` either creates the directory or reports that
    /// another process got there first, in which case the next number is tried.
    pub fn claim_version(&self) -> Result<VersionId> {
        fs::create_dir_all(&self.dir)?;
        let mut candidate = self
            .version_dirs()?
            .last()
            .map_or(VersionId(0), |v| v.next());
        loop {
            match fs::create_dir(self.version_dir(candidate)) {
                Ok(()) => {
                    debug!(dir = %self.dir.display(), version = %candidate, "Claimed version");
                    return Ok(candidate);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    candidate = candidate.next();
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Export the snapshot files of `record` and append its index line.
    pub fn write_record(&self, record: &ExperimentRecord) -> Result<()> {
        let version_dir = self.version_dir(record.version);
        atomic_write_json(&version_dir.join(HPARAMS_FILE), &record.hparams)?;
        atomic_write_json(&version_dir.join(META_TAGS_FILE), record)?;
        self.append_index(&IndexEntry::from(record))
    }

    pub fn load_record(&self, version: VersionId) -> Result<Option<ExperimentRecord>> {
        Ok(load_json(&self.meta_tags_path(version))?)
    }

    /// Version directories present on disk, ascending.
    pub fn version_dirs(&self) -> Result<Vec<VersionId>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut versions = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(version) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<VersionId>().ok())
            {
                versions.push(version);
            }
        }
        versions.sort();
        Ok(versions)
    }

    /// Current index, one entry per recorded version, ascending.
    ///
    /// Rebuilt from the version directories when the index file is missing or
    /// covers a different number of versions than exist on disk. Entries still
    /// marked incomplete are checked against their `meta_tags.json`, which is
    /// written before the index line and so is never behind it.
    pub fn index(&self) -> Result<Vec<IndexEntry>> {
        let on_disk = self.version_dirs()?;
        if let Some(entries) = self.read_index()? {
            if entries.len() == on_disk.len() {
                return entries
                    .into_values()
                    .map(|entry| self.refresh_incomplete(entry))
                    .collect();
            }
            debug!(
                dir = %self.dir.display(),
                indexed = entries.len(),
                on_disk = on_disk.len(),
                "Ledger index is stale"
            );
        }
        self.reindex()
    }

    /// Rebuild the index from every readable `meta_tags.json`.
    ///
    /// Version directories without a readable record (a claim that crashed before
    /// its first export, or a corrupt file) are left out.
    pub fn reindex(&self) -> Result<Vec<IndexEntry>> {
        let mut entries = Vec::new();
        for version in self.version_dirs()? {
            match self.load_record(version) {
                Ok(Some(record)) => entries.push(IndexEntry::from(&record)),
                Ok(None) => debug!(version = %version, "Version has no record yet"),
                Err(e) => warn!(version = %version, error = %e, "Skipping unreadable record"),
            }
        }
        if self.dir.exists() {
            let mut body = Vec::new();
            for entry in &entries {
                serde_json::to_writer(&mut body, entry)?;
                body.push(b'\n');
            }
            atomic_write(&self.dir.join(INDEX_FILE), &body)?;
            info!(dir = %self.dir.display(), entries = entries.len(), "Rebuilt ledger index");
        }
        Ok(entries)
    }

    /// Completed record whose launch fingerprint is `fingerprint`, if any.
    pub fn find_completed(&self, fingerprint: &str) -> Result<Option<ExperimentRecord>> {
        let hit = self
            .index()?
            .into_iter()
            .find(|e| e.training_completed && e.fingerprint == fingerprint);
        match hit {
            Some(entry) => self.load_record(entry.version),
            None => Ok(None),
        }
    }

    /// An incomplete entry whose record has since completed gets the record's
    /// entry, and a repair line so later reads agree.
    fn refresh_incomplete(&self, entry: IndexEntry) -> Result<IndexEntry> {
        if entry.training_completed {
            return Ok(entry);
        }
        let record = match self.load_record(entry.version) {
            Ok(Some(record)) if record.training_completed => record,
            Ok(_) => return Ok(entry),
            Err(e) => {
                warn!(version = %entry.version, error = %e, "Skipping unreadable record");
                return Ok(entry);
            }
        };
        let repaired = IndexEntry::from(&record);
        info!(
            dir = %self.dir.display(),
            version = %entry.version,
            "Index line for completed run was missing, repairing"
        );
        self.append_index(&repaired)?;
        Ok(repaired)
    }

    fn append_index(&self, entry: &IndexEntry) -> Result<()> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(INDEX_FILE))?;
        // one write per line keeps concurrent appenders from interleaving
        file.write_all(&line)?;
        Ok(())
    }

    fn read_index(&self) -> Result<Option<BTreeMap<VersionId, IndexEntry>>> {
        let file = match fs::File::open(self.dir.join(INDEX_FILE)) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut latest = BTreeMap::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<IndexEntry>(&line) {
                Ok(entry) => {
                    latest.insert(entry.version, entry);
                }
                Err(e) => {
                    // a torn last line; the caller's count check decides whether to rebuild
                    warn!(dir = %self.dir.display(), error = %e, "Ignoring malformed index line");
                }
            }
        }
        Ok(Some(latest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::record::tests::sample_hparams;
    use crate::training::TrainingMetrics;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn completed(ledger: &ExperimentLedger, val_loss: f64) -> ExperimentRecord {
        let version = ledger.claim_version().unwrap();
        let mut record = ExperimentRecord::new(version, sample_hparams());
        ledger.write_record(&record).unwrap();
        let mut metrics = TrainingMetrics::default();
        metrics.record_epoch(val_loss, Some(val_loss));
        record.mark_completed(metrics);
        ledger.write_record(&record).unwrap();
        record
    }

    #[test]
    fn test_experiment_dir_layout() {
        let dir = experiment_dir(Path::new("/s"), ModelClass::Ae, 8, "initial_grid_search");
        assert_eq!(dir, PathBuf::from("/s/ae/conv/08_latents/initial_grid_search"));
    }

    #[test]
    fn test_claims_are_sequential_and_skip_taken() {
        let tmp = TempDir::new().unwrap();
        let ledger = ExperimentLedger::new(tmp.path().join("exp"));
        assert_eq!(ledger.claim_version().unwrap(), VersionId(0));
        assert_eq!(ledger.claim_version().unwrap(), VersionId(1));

        fs::create_dir(ledger.version_dir(VersionId(5))).unwrap();
        assert_eq!(ledger.claim_version().unwrap(), VersionId(6));
    }

    #[test]
    fn test_concurrent_claims_are_distinct() {
        let tmp = TempDir::new().unwrap();
        let ledger = ExperimentLedger::new(tmp.path().join("exp"));
        let mut claimed: Vec<VersionId> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| ledger.claim_version().unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        claimed.sort();
        claimed.dedup();
        assert_eq!(claimed.len(), 8);
    }

    #[test]
    fn test_write_exports_both_snapshots() {
        let tmp = TempDir::new().unwrap();
        let ledger = ExperimentLedger::new(tmp.path());
        let record = completed(&ledger, 0.5);

        let dir = ledger.version_dir(record.version);
        assert!(dir.join(HPARAMS_FILE).exists());
        assert_eq!(ledger.load_record(record.version).unwrap(), Some(record));
    }

    #[test]
    fn test_index_keeps_latest_line_per_version() {
        let tmp = TempDir::new().unwrap();
        let ledger = ExperimentLedger::new(tmp.path());
        let record = completed(&ledger, 0.5);

        let index = ledger.index().unwrap();
        assert_eq!(index.len(), 1);
        assert!(index[0].training_completed);
        assert_eq!(index[0].best_val_loss, Some(0.5));
        assert_eq!(index[0].fingerprint, record.fingerprint);
    }

    #[test]
    fn test_missing_index_is_rebuilt() {
        let tmp = TempDir::new().unwrap();
        let ledger = ExperimentLedger::new(tmp.path());
        completed(&ledger, 0.5);
        completed(&ledger, 0.2);
        fs::remove_file(tmp.path().join(INDEX_FILE)).unwrap();

        let index = ledger.index().unwrap();
        assert_eq!(index.len(), 2);
        assert!(tmp.path().join(INDEX_FILE).exists());
    }

    #[test]
    fn test_stale_index_is_rebuilt() {
        let tmp = TempDir::new().unwrap();
        let ledger = ExperimentLedger::new(tmp.path());
        completed(&ledger, 0.5);

        // a record copied in by hand, never indexed
        let foreign = ExperimentRecord::new(VersionId(7), sample_hparams());
        atomic_write_json(&ledger.meta_tags_path(VersionId(7)), &foreign).unwrap();

        let index = ledger.index().unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index[1].version, VersionId(7));
    }

    #[test]
    fn test_completed_record_without_index_line_is_picked_up() {
        let tmp = TempDir::new().unwrap();
        let ledger = ExperimentLedger::new(tmp.path());
        let version = ledger.claim_version().unwrap();
        let mut record = ExperimentRecord::new(version, sample_hparams());
        ledger.write_record(&record).unwrap();

        // completed snapshot whose index append never landed
        let mut metrics = TrainingMetrics::default();
        metrics.record_epoch(0.3, Some(0.3));
        record.mark_completed(metrics);
        atomic_write_json(&ledger.meta_tags_path(version), &record).unwrap();

        let index = ledger.index().unwrap();
        assert_eq!(index.len(), 1);
        assert!(index[0].training_completed);
        assert_eq!(index[0].best_val_loss, Some(0.3));

        // the repair line makes the file itself agree
        let on_file = ledger.read_index().unwrap().unwrap();
        assert!(on_file[&version].training_completed);
        assert_eq!(
            ledger
                .find_completed(&record.fingerprint)
                .unwrap()
                .map(|r| r.version),
            Some(version)
        );
    }

    #[test]
    fn test_find_completed_by_fingerprint() {
        let tmp = TempDir::new().unwrap();
        let ledger = ExperimentLedger::new(tmp.path());
        let fingerprint = sample_hparams().fingerprint();
        assert!(ledger.find_completed(&fingerprint).unwrap().is_none());

        // incomplete runs do not count
        let version = ledger.claim_version().unwrap();
        ledger
            .write_record(&ExperimentRecord::new(version, sample_hparams()))
            .unwrap();
        assert!(ledger.find_completed(&fingerprint).unwrap().is_none());

        let record = completed(&ledger, 0.4);
        let found = ledger.find_completed(&fingerprint).unwrap().unwrap();
        assert_eq!(found.version, record.version);
    }

    #[test]
    fn test_empty_dir_has_no_versions() {
        let tmp = TempDir::new().unwrap();
        let ledger = ExperimentLedger::new(tmp.path().join("absent"));
        assert!(ledger.version_dirs().unwrap().is_empty());
        assert!(ledger.index().unwrap().is_empty());
    }
}
