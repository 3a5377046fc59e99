//! Convergence tracking and run metadata.
//!
//! Scores are fitness values, higher is better. Metadata is persisted as
//! JSON next to the best network snapshot.

use std::collections::VecDeque;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::network::{snapshot, SnapshotError};

/// Convergence status of a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Improving,
    Plateaued,
    Converged,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Improving => write!(f, "improving"),
            RunStatus::Plateaued => write!(f, "plateaued"),
            RunStatus::Converged => write!(f, "converged"),
        }
    }
}

/// Tracks best-of-generation scores over a sliding window.
///
/// A full window whose newest score beats the oldest by less than
/// `min_delta` counts as a plateau; `patience` consecutive plateaus
/// mean the run has converged.
#[derive(Clone, Debug)]
pub struct ConvergenceTracker {
    scores: VecDeque<f64>,
    window: usize,
    min_delta: f64,
    patience: usize,
    plateau_count: usize,
}

impl Default for ConvergenceTracker {
    fn default() -> Self {
        Self::new(50, 1.0, 3)
    }
}

impl ConvergenceTracker {
    pub fn new(window: usize, min_delta: f64, patience: usize) -> Self {
        Self {
            scores: VecDeque::with_capacity(window),
            window: window.max(2),
            min_delta,
            patience: patience.max(1),
            plateau_count: 0,
        }
    }

    /// Record a generation's best score and return the current status.
    pub fn record(&mut self, score: f64) -> RunStatus {
        self.scores.push_back(score);
        if self.scores.len() > self.window {
            self.scores.pop_front();
        }
        match self.window_gain() {
            None => RunStatus::Improving,
            Some(gain) if gain < self.min_delta => {
                self.plateau_count += 1;
                self.status()
            }
            Some(_) => {
                self.plateau_count = 0;
                RunStatus::Improving
            }
        }
    }

    pub fn status(&self) -> RunStatus {
        match self.window_gain() {
            Some(gain) if gain < self.min_delta => {
                if self.plateau_count >= self.patience {
                    RunStatus::Converged
                } else {
                    RunStatus::Plateaued
                }
            }
            _ => RunStatus::Improving,
        }
    }

    fn window_gain(&self) -> Option<f64> {
        if self.scores.len() < self.window {
            return None;
        }
        Some(self.scores.back()? - self.scores.front()?)
    }
}

/// Run metadata persisted alongside the best network.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunMeta {
    pub generation: u64,
    pub weight_hash: String,
    pub best_score: f64,
    pub prev_score: f64,
    pub status: RunStatus,
}

impl RunMeta {
    pub fn save(&self, path: &Path) -> Result<(), SnapshotError> {
        let text = serde_json::to_string_pretty(self)?;
        snapshot::write_creating_parent(path, text.as_bytes())
    }

    pub fn load(path: &Path) -> Result<Self, SnapshotError> {
        let text = std::fs::read_to_string(path).map_err(|e| snapshot::io_error(path, e))?;
        Ok(serde_json::from_str(&text)?)
    }
}
