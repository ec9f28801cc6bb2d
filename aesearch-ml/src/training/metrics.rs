//! Training metrics tracking.

use serde::{Deserialize, Serialize};

/// Per-epoch loss history of one run; persisted with its experiment record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetrics {
    pub epochs_completed: usize,
    pub loss_history: Vec<f64>,
    pub val_loss_history: Vec<f64>,
    pub best_epoch: Option<usize>,
    pub best_loss: Option<f64>,
    #[serde(default)]
    pub stopped_early: bool,
    #[serde(default)]
    pub total_training_time_secs: f64,
}

impl TrainingMetrics {
    /// Record one epoch. The best epoch tracks validation loss when present,
    /// training loss otherwise.
    pub fn record_epoch(&mut self, loss: f64, val_loss: Option<f64>) {
        self.loss_history.push(loss);
        if let Some(vl) = val_loss {
            self.val_loss_history.push(vl);
        }
        self.epochs_completed += 1;

        let check_loss = val_loss.unwrap_or(loss);
        if self.best_loss.is_none_or(|best| check_loss < best) {
            self.best_loss = Some(check_loss);
            self.best_epoch = Some(self.epochs_completed);
        }
    }

    /// Lowest finite validation loss seen, if any epoch was validated.
    pub fn best_val_loss(&self) -> Option<f64> {
        self.val_loss_history
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .min_by(f64::total_cmp)
    }

    /// True when the last `history` validations brought no improvement over the
    /// best value seen before them.
    pub fn plateaued(&self, history: usize) -> bool {
        let n = self.val_loss_history.len();
        if history == 0 || n <= history {
            return false;
        }
        let (before, recent) = self.val_loss_history.split_at(n - history);
        let best_before = before.iter().copied().fold(f64::INFINITY, f64::min);
        recent.iter().all(|&v| v >= best_before)
    }
}
