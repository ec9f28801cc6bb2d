//! Best-model selection over one experiment directory.

use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::ledger::ExperimentLedger;
use super::record::VersionId;
use crate::error::{MlError, Result};

/// A completed run and the validation loss it was ranked by.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedVersion {
    pub version: VersionId,
    pub val_loss: f64,
    pub meta_tags: PathBuf,
}

/// The `k` completed runs in `dir` with the lowest validation loss, ascending; ties
/// go to the lower version. Incomplete runs are left out, not penalized.
pub fn select_best(dir: &Path, k: usize) -> Result<Vec<RankedVersion>> {
    let ledger = ExperimentLedger::new(dir);
    let mut ranked = Vec::new();
    for entry in ledger.index()? {
        if !entry.training_completed {
            continue;
        }
        match entry.best_val_loss {
            Some(val_loss) => ranked.push(RankedVersion {
                version: entry.version,
                val_loss,
                meta_tags: ledger.meta_tags_path(entry.version),
            }),
            None => warn!(
                dir = %dir.display(),
                version = %entry.version,
                "Completed run has no validation loss, not ranked"
            ),
        }
    }
    if ranked.is_empty() {
        return Err(MlError::NoCompletedRuns {
            dir: dir.to_path_buf(),
        });
    }

    ranked.sort_by(|a, b| {
        a.val_loss
            .total_cmp(&b.val_loss)
            .then(a.version.cmp(&b.version))
    });
    ranked.truncate(k);
    info!(
        dir = %dir.display(),
        best = ?ranked.iter().map(|r| r.version.to_string()).collect::<Vec<_>>(),
        "Ranked completed runs"
    );
    Ok(ranked)
}
