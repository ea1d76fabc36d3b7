//! Metrics Module
//!
//! Epoch-level metric accumulators for the fit loop. Losses are averaged over
//! the steps of an epoch; accuracies accumulate correct/total counts across
//! the epoch the way a streaming sparse-categorical accuracy does.

use burn::prelude::*;
use burn::tensor::ElementConversion;
use serde::{Deserialize, Serialize};

/// Running average for tracking losses during training
#[derive(Debug, Clone, Default)]
pub struct RunningAverage {
    sum: f64,
    count: usize,
}

impl RunningAverage {
    /// Create a new running average
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value
    pub fn add(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    /// Get the current average
    pub fn average(&self) -> f64 {
        if self.count > 0 {
            self.sum / self.count as f64
        } else {
            0.0
        }
    }

    /// Get the count
    pub fn count(&self) -> usize {
        self.count
    }

    /// Reset the running average
    pub fn reset(&mut self) {
        self.sum = 0.0;
        self.count = 0;
    }
}

/// Streaming accuracy: correct / total over everything added since the last reset
#[derive(Debug, Clone, Default)]
pub struct AccuracyTracker {
    correct: usize,
    total: usize,
}

impl AccuracyTracker {
    /// Create a new accuracy tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Add pre-counted results
    pub fn add_counts(&mut self, correct: usize, total: usize) {
        self.correct += correct;
        self.total += total;
    }

    /// Add a batch of logits `[n, classes]` against integer targets `[n]`
    pub fn add_logits<B: Backend>(&mut self, logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) {
        let total = targets.dims()[0];
        let correct = count_correct(logits, targets);
        self.add_counts(correct, total);
    }

    /// Get the current accuracy
    pub fn accuracy(&self) -> f64 {
        if self.total > 0 {
            self.correct as f64 / self.total as f64
        } else {
            0.0
        }
    }

    /// Number of samples seen
    pub fn count(&self) -> usize {
        self.total
    }

    /// Reset the tracker
    pub fn reset(&mut self) {
        self.correct = 0;
        self.total = 0;
    }
}

/// Count rows whose argmax equals the target index
pub fn count_correct<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> usize {
    let [batch_size, _] = logits.dims();
    let predictions = logits.argmax(1).reshape([batch_size]);
    let correct: i64 = predictions.equal(targets).int().sum().into_scalar().elem();
    correct.max(0) as usize
}

/// Training-side metrics reported once per epoch
#[derive(Debug, Clone, Default)]
pub struct TrainMetrics {
    /// Contrastive loss
    pub contrastive_loss: RunningAverage,
    /// SimCLR-style view-matching accuracy on encoder features
    pub contrastive_accuracy: AccuracyTracker,
    /// BarlowTwins-style feature-matching accuracy on encoder features
    pub correlation_accuracy: AccuracyTracker,
    /// Linear probe loss on the labeled batch
    pub probe_loss: RunningAverage,
    /// Linear probe accuracy on the labeled batch
    pub probe_accuracy: AccuracyTracker,
}

impl TrainMetrics {
    /// Reset all accumulators at the start of an epoch
    pub fn reset(&mut self) {
        self.contrastive_loss.reset();
        self.contrastive_accuracy.reset();
        self.correlation_accuracy.reset();
        self.probe_loss.reset();
        self.probe_accuracy.reset();
    }
}

/// Evaluation-side metrics for one pass over the test split
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ProbeEvaluation {
    /// Mean probe loss over test batches
    pub loss: f64,
    /// Probe accuracy over all test samples
    pub accuracy: f64,
    /// Number of test samples evaluated
    pub samples: usize,
}
