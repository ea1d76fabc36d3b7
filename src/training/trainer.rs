//! Fit loop for contrastive pre-training with an online linear probe
//!
//! Every step trains two things side by side:
//! - the representation path (encoder + projection head) on the algorithm's
//!   loss between two augmented views of the whole batch
//! - a linear probe on the labeled part of the batch, fed encoder features
//!   with the gradient cut so the probe never shapes the representation
//!
//! After each epoch the probe is evaluated on the test split and one
//! `EpochRecord` is appended to the history.

use std::path::{Path, PathBuf};

use burn::{
    module::{AutodiffModule, Module},
    nn::loss::CrossEntropyLossConfig,
    optim::{AdamConfig, GradientsParams, Optimizer},
    record::CompactRecorder,
    tensor::{backend::AutodiffBackend, ElementConversion},
};
use indicatif::{ProgressBar, ProgressStyle};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};

use super::algorithm::ContrastiveAlgorithm;
use super::history::{EpochRecord, History};
use super::losses::{contrastive_accuracy_counts, correlation_accuracy_counts};
use crate::dataset::{Augmenter, PreparedDatasets, TrainBatch};
use crate::model::config::OptimizerConfig;
use crate::model::networks::{ContrastiveNetworks, LinearProbe};
use crate::utils::error::{Result, SslError};
use crate::utils::logging::TrainingLogger;
use crate::utils::metrics::{AccuracyTracker, ProbeEvaluation, RunningAverage, TrainMetrics};

/// Owns the networks, their optimizers and the algorithm state of one run
pub struct Trainer<B, A, OC, OP>
where
    B: AutodiffBackend,
{
    networks: ContrastiveNetworks<B>,
    probe: LinearProbe<B>,
    algorithm: A,
    contrastive_augmenter: Augmenter,
    classification_augmenter: Augmenter,
    representation_optimizer: OC,
    probe_optimizer: OP,
    contrastive_learning_rate: f64,
    probe_learning_rate: f64,
    metrics: TrainMetrics,
    /// Shuffling of the training splits
    data_rng: ChaCha8Rng,
    /// Augmentation draws
    augment_rng: ChaCha8Rng,
    device: B::Device,
    show_progress: bool,
}

/// Attach two Adam optimizers and the default augmenters to the networks
///
/// The representation optimizer sees the encoder and projection head, the
/// probe optimizer only the probe. Epsilon follows `OptimizerConfig` (1e-7 by
/// default, as in Keras).
#[allow(clippy::type_complexity)]
pub fn compile<B, A>(
    networks: ContrastiveNetworks<B>,
    probe: LinearProbe<B>,
    algorithm: A,
    optimizer: &OptimizerConfig,
    seed: u64,
    device: B::Device,
) -> Trainer<
    B,
    A,
    impl Optimizer<ContrastiveNetworks<B>, B>,
    impl Optimizer<LinearProbe<B>, B>,
>
where
    B: AutodiffBackend,
    A: ContrastiveAlgorithm<B>,
{
    let representation_optimizer = AdamConfig::new()
        .with_epsilon(optimizer.epsilon)
        .init::<B, ContrastiveNetworks<B>>();
    let probe_optimizer = AdamConfig::new()
        .with_epsilon(optimizer.epsilon)
        .init::<B, LinearProbe<B>>();

    Trainer::new(
        networks,
        probe,
        algorithm,
        representation_optimizer,
        probe_optimizer,
        optimizer,
        seed,
        device,
    )
}

impl<B, A, OC, OP> Trainer<B, A, OC, OP>
where
    B: AutodiffBackend,
    A: ContrastiveAlgorithm<B>,
    OC: Optimizer<ContrastiveNetworks<B>, B>,
    OP: Optimizer<LinearProbe<B>, B>,
{
    /// Create a trainer from explicit optimizers
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        networks: ContrastiveNetworks<B>,
        probe: LinearProbe<B>,
        algorithm: A,
        representation_optimizer: OC,
        probe_optimizer: OP,
        optimizer: &OptimizerConfig,
        seed: u64,
        device: B::Device,
    ) -> Self {
        Self {
            networks,
            probe,
            algorithm,
            contrastive_augmenter: Augmenter::contrastive(),
            classification_augmenter: Augmenter::classification(),
            representation_optimizer,
            probe_optimizer,
            contrastive_learning_rate: optimizer.contrastive_learning_rate,
            probe_learning_rate: optimizer.probe_learning_rate,
            metrics: TrainMetrics::default(),
            data_rng: ChaCha8Rng::seed_from_u64(seed),
            augment_rng: ChaCha8Rng::seed_from_u64(seed.wrapping_add(1)),
            device,
            show_progress: false,
        }
    }

    /// Show an indicatif bar over the steps of each epoch
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn networks(&self) -> &ContrastiveNetworks<B> {
        &self.networks
    }

    pub fn probe(&self) -> &LinearProbe<B> {
        &self.probe
    }

    pub fn algorithm(&self) -> &A {
        &self.algorithm
    }

    /// Metrics accumulated since the start of the current epoch
    pub fn metrics(&self) -> &TrainMetrics {
        &self.metrics
    }

    /// One optimisation step on a zipped (unlabeled, labeled) batch
    pub fn train_step(&mut self, batch: &TrainBatch) -> Result<()> {
        let images = batch.images();

        let views_1 = self
            .contrastive_augmenter
            .augment(&images.images, &mut self.augment_rng)?
            .into_tensor::<B>(&self.device);
        let views_2 = self
            .contrastive_augmenter
            .augment(&images.images, &mut self.augment_rng)?
            .into_tensor::<B>(&self.device);

        let (features_1, projections_1) = self.networks.forward(views_1.clone());
        let (features_2, projections_2) = self.networks.forward(views_2.clone());

        let loss = self
            .algorithm
            .contrastive_loss(views_1, views_2, projections_1, projections_2);
        let loss_value: f64 = loss.clone().into_scalar().elem();
        if !loss_value.is_finite() {
            return Err(SslError::Training(format!(
                "{} loss diverged ({})",
                self.algorithm.name(),
                loss_value
            )));
        }

        let grads = GradientsParams::from_grads(loss.backward(), &self.networks);
        self.networks = self.representation_optimizer.step(
            self.contrastive_learning_rate,
            self.networks.clone(),
            grads,
        );
        self.algorithm.momentum_update(&self.networks);

        let features_1 = features_1.detach();
        let features_2 = features_2.detach();
        let (correct, total) = contrastive_accuracy_counts(features_1.clone(), features_2.clone());
        self.metrics.contrastive_accuracy.add_counts(correct, total);
        let (correct, total) = correlation_accuracy_counts(features_1, features_2);
        self.metrics.correlation_accuracy.add_counts(correct, total);
        self.metrics.contrastive_loss.add(loss_value);

        self.probe_step(batch)
    }

    fn probe_step(&mut self, batch: &TrainBatch) -> Result<()> {
        let labeled = &batch.labeled;
        let views = self
            .classification_augmenter
            .augment(&labeled.images, &mut self.augment_rng)?
            .into_tensor::<B>(&self.device);
        let targets = labeled.labels_tensor::<B>(&self.device)?;

        let features = self.networks.encoder.forward(views).detach();
        let logits = self.probe.forward(features);
        let loss = CrossEntropyLossConfig::new()
            .init(&logits.device())
            .forward(logits.clone(), targets.clone());
        let loss_value: f64 = loss.clone().into_scalar().elem();

        let grads = GradientsParams::from_grads(loss.backward(), &self.probe);
        self.probe = self
            .probe_optimizer
            .step(self.probe_learning_rate, self.probe.clone(), grads);

        self.metrics.probe_loss.add(loss_value);
        self.metrics.probe_accuracy.add_logits(logits.detach(), targets);
        Ok(())
    }

    /// Probe loss and accuracy on the test split
    ///
    /// Runs the inner (non-autodiff) encoder and probe on rescaled images.
    pub fn evaluate(&self, data: &PreparedDatasets) -> Result<ProbeEvaluation> {
        let encoder = self.networks.encoder.valid();
        let probe = self.probe.valid();

        let mut loss = RunningAverage::new();
        let mut accuracy = AccuracyTracker::new();

        for batch in data.test_batches() {
            let batch = batch?;
            let images = self
                .classification_augmenter
                .preprocess(&batch.images)?
                .into_tensor::<B::InnerBackend>(&self.device);
            let targets = batch.labels_tensor::<B::InnerBackend>(&self.device)?;

            let logits = probe.forward(encoder.forward(images));
            let batch_loss = CrossEntropyLossConfig::new()
                .init(&logits.device())
                .forward(logits.clone(), targets.clone());

            loss.add(batch_loss.into_scalar().elem());
            accuracy.add_logits(logits, targets);
        }

        let evaluation = ProbeEvaluation {
            loss: loss.average(),
            accuracy: accuracy.accuracy(),
            samples: accuracy.count(),
        };
        debug!(
            "Evaluation: loss = {:.4}, accuracy = {:.2}%, samples = {}",
            evaluation.loss,
            evaluation.accuracy * 100.0,
            evaluation.samples
        );
        Ok(evaluation)
    }

    /// Train for exactly `num_epochs` epochs and return one record per epoch
    pub fn fit(&mut self, data: &PreparedDatasets, num_epochs: usize) -> Result<History> {
        let mut history = History::new();
        let mut logger = TrainingLogger::new(num_epochs);

        info!(
            "Training {} for {} epochs x {} steps (batch size {} = {} unlabeled + {} labeled)",
            self.algorithm.name(),
            num_epochs,
            data.steps_per_epoch(),
            data.batch_size(),
            data.unlabeled_batch_size(),
            data.labeled_batch_size()
        );

        for epoch in 0..num_epochs {
            logger.start_epoch(epoch);
            self.metrics.reset();

            let progress = self.progress_bar(data.steps_per_epoch() as u64, epoch, num_epochs);
            for batch in data.train_batches(&mut self.data_rng) {
                self.train_step(&batch?)?;
                progress.inc(1);
            }
            progress.finish_and_clear();

            let evaluation = self.evaluate(data)?;
            let record = EpochRecord {
                c_loss: self.metrics.contrastive_loss.average(),
                c_acc: self.metrics.contrastive_accuracy.accuracy(),
                r_acc: self.metrics.correlation_accuracy.accuracy(),
                p_loss: self.metrics.probe_loss.average(),
                p_acc: self.metrics.probe_accuracy.accuracy(),
                val_p_loss: evaluation.loss,
                val_p_acc: evaluation.accuracy,
            };
            debug!("Epoch {} record: {:?}", epoch + 1, record);

            logger.end_epoch(record.c_loss, record.p_acc, record.val_p_acc);
            history.push(record);
        }

        logger.log_complete(history.last().map(|r| r.val_p_acc).unwrap_or(0.0));
        Ok(history)
    }

    fn progress_bar(&self, steps: u64, epoch: usize, num_epochs: usize) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }

        let progress = ProgressBar::new(steps);
        progress.set_style(
            ProgressStyle::default_bar()
                .template("  {prefix} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} steps")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        progress.set_prefix(format!("Epoch {}/{}", epoch + 1, num_epochs));
        progress
    }

    /// Save the encoder and probe records under `dir`
    ///
    /// File names carry the algorithm name and a timestamp; CompactRecorder
    /// appends its own `.mpk` extension.
    pub fn save_models(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(dir)?;
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let name = self.algorithm.name();
        let recorder = CompactRecorder::new();

        let encoder_path = dir.join(format!("{}_encoder_{}", name, timestamp));
        self.networks
            .encoder
            .clone()
            .save_file(encoder_path.clone(), &recorder)
            .map_err(|e| SslError::Training(format!("Failed to save encoder: {}", e)))?;

        let probe_path = dir.join(format!("{}_probe_{}", name, timestamp));
        self.probe
            .clone()
            .save_file(probe_path.clone(), &recorder)
            .map_err(|e| SslError::Training(format!("Failed to save probe: {}", e)))?;

        info!("Saved encoder to {:?} and probe to {:?}", encoder_path, probe_path);
        Ok(vec![encoder_path, probe_path])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{prepare_dataset, DataSource, SyntheticConfig};
    use crate::model::config::{AlgorithmKind, Hyperparameters};
    use crate::model::networks::NetworkConfig;
    use crate::training::algorithm::Algorithm;
    use burn::backend::{Autodiff, NdArray};

    type TestBackend = Autodiff<NdArray<f32>>;

    fn tiny_data() -> PreparedDatasets {
        let source = DataSource::Synthetic(SyntheticConfig {
            unlabeled_len: 8,
            labeled_len: 4,
            test_len: 5,
            seed: 3,
        });
        prepare_dataset(2, &source).unwrap()
    }

    fn trainer_for(
        kind: AlgorithmKind,
    ) -> Trainer<
        TestBackend,
        Algorithm<TestBackend>,
        impl Optimizer<ContrastiveNetworks<TestBackend>, TestBackend>,
        impl Optimizer<LinearProbe<TestBackend>, TestBackend>,
    > {
        let device = Default::default();
        let config = NetworkConfig::new().with_width(4);
        let networks = config.init_contrastive::<TestBackend>(&device);
        let probe = config.init_probe::<TestBackend>(&device);
        let hyperparameters = Hyperparameters {
            queue_size: 16,
            ..Default::default()
        };
        let algorithm =
            Algorithm::from_config(hyperparameters.for_algorithm(kind), &networks, 4, &device)
                .unwrap();
        compile(networks, probe, algorithm, &OptimizerConfig::default(), 1, device)
    }

    #[test]
    fn test_train_step_updates_metrics_and_weights() {
        let data = tiny_data();
        let mut trainer = trainer_for(AlgorithmKind::SimClr);
        let bias = |trainer: &Trainer<_, _, _, _>| trainer.probe().fc.bias.as_ref().unwrap().val();
        let before = bias(&trainer);

        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let batch = data.train_batches(&mut rng).next().unwrap().unwrap();
        trainer.train_step(&batch).unwrap();

        let metrics = trainer.metrics();
        assert_eq!(metrics.contrastive_loss.count(), 1);
        assert_eq!(metrics.probe_loss.count(), 1);
        // both directions over the 6 images of the batch
        assert_eq!(metrics.contrastive_accuracy.count(), 12);
        assert_eq!(metrics.probe_accuracy.count(), 2);

        let after = bias(&trainer);
        let moved: f32 = (after - before).abs().max().into_scalar().elem();
        assert!(moved > 0.0);
    }

    #[test]
    fn test_evaluate_covers_the_whole_test_split() {
        let data = tiny_data();
        let trainer = trainer_for(AlgorithmKind::BarlowTwins);

        let evaluation = trainer.evaluate(&data).unwrap();
        assert_eq!(evaluation.samples, 5);
        assert!(evaluation.loss.is_finite());
        assert!((0.0..=1.0).contains(&evaluation.accuracy));
    }

    #[test]
    fn test_fit_records_every_epoch() {
        let data = tiny_data();
        let mut trainer = trainer_for(AlgorithmKind::MoCo);

        let history = trainer.fit(&data, 2).unwrap();
        assert_eq!(history.len(), 2);
        for record in history.records() {
            assert!(record.c_loss.is_finite());
            assert!((0.0..=1.0).contains(&record.val_p_acc));
        }
    }

    #[test]
    fn test_save_models_writes_records() {
        let dir = tempfile::TempDir::new().unwrap();
        let trainer = trainer_for(AlgorithmKind::SimClr);

        let paths = trainer.save_models(dir.path()).unwrap();
        assert_eq!(paths.len(), 2);
        for path in paths {
            assert!(path.with_extension("mpk").exists(), "{:?}", path);
        }
    }
}
