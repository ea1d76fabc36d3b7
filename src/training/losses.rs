//! Contrastive losses and representation metrics.
//!
//! All functions are generic over `B: Backend` and take `[batch, dim]`
//! embeddings. Losses return a `(1,)` tensor; metric helpers return
//! `(correct, total)` counts so they can be streamed into an epoch tracker.

use burn::nn::loss::CrossEntropyLossConfig;
use burn::prelude::*;

use crate::utils::metrics::count_correct;

/// Added to the variance before dividing, so dead features stay finite
const STD_EPSILON: f64 = 1e-6;

/// Added to the norm before dividing
const NORM_EPSILON: f64 = 1e-12;

/// Scale every row to unit L2 norm
pub fn l2_normalize<B: Backend>(x: Tensor<B, 2>) -> Tensor<B, 2> {
    let norm = x.clone().powf_scalar(2.0).sum_dim(1).sqrt().clamp_min(NORM_EPSILON);
    x / norm
}

/// Standardise every column to zero mean and unit (population) variance over the batch
pub fn standardize<B: Backend>(x: Tensor<B, 2>) -> Tensor<B, 2> {
    let centered = x.clone() - x.mean_dim(0);
    let std = centered
        .clone()
        .powf_scalar(2.0)
        .mean_dim(0)
        .add_scalar(STD_EPSILON)
        .sqrt();
    centered / std
}

/// Cross-correlation of two standardised embeddings, `z1ᵀ z2 / n`
pub fn cross_correlation<B: Backend>(z1: Tensor<B, 2>, z2: Tensor<B, 2>) -> Tensor<B, 2> {
    let [batch_size, _] = z1.dims();
    let z1 = standardize(z1);
    let z2 = standardize(z2);
    z1.transpose().matmul(z2).div_scalar(batch_size as f64)
}

fn diagonal_targets<B: Backend>(size: usize, device: &B::Device) -> Tensor<B, 1, Int> {
    Tensor::<B, 1, Int>::arange(0..size as i64, device)
}

/// SimCLR (NT-Xent) loss
///
/// Each projection of view 1 must pick out its own partner among all view 2
/// projections, and vice versa; the two cross-entropies are averaged.
pub fn simclr_loss<B: Backend>(
    projections_1: Tensor<B, 2>,
    projections_2: Tensor<B, 2>,
    temperature: f64,
) -> Tensor<B, 1> {
    let device = projections_1.device();
    let [batch_size, _] = projections_1.dims();

    let similarities = l2_normalize(projections_1)
        .matmul(l2_normalize(projections_2).transpose())
        .div_scalar(temperature);
    let targets = diagonal_targets::<B>(batch_size, &device);

    let loss = CrossEntropyLossConfig::new().init(&device);
    let loss_1_2 = loss.forward(similarities.clone(), targets.clone());
    let loss_2_1 = loss.forward(similarities.transpose(), targets);

    (loss_1_2 + loss_2_1).div_scalar(2.0)
}

/// BarlowTwins loss
///
/// Pushes the cross-correlation of the standardised projections towards the
/// identity: mean squared diagonal error (invariance) plus
/// `redundancy_reduction_weight` times the mean squared off-diagonal error.
pub fn barlow_twins_loss<B: Backend>(
    projections_1: Tensor<B, 2>,
    projections_2: Tensor<B, 2>,
    redundancy_reduction_weight: f64,
) -> Tensor<B, 1> {
    let device = projections_1.device();
    let [_, feature_dim] = projections_1.dims();

    let correlation = cross_correlation(projections_1, projections_2);
    let eye = Tensor::<B, 2>::eye(feature_dim, &device);
    let squared_errors = (eye.clone() - correlation).powf_scalar(2.0);

    let invariance = (squared_errors.clone() * eye.clone())
        .sum()
        .div_scalar(feature_dim as f64);

    let off_diagonal_count = (feature_dim * feature_dim.saturating_sub(1)).max(1);
    let redundancy = (squared_errors * eye.neg().add_scalar(1.0))
        .sum()
        .div_scalar(off_diagonal_count as f64);

    invariance + redundancy.mul_scalar(redundancy_reduction_weight)
}

/// MoCo loss against momentum targets and a queue of past targets
///
/// `momentum_1`/`momentum_2` are the L2-normalised momentum projections of the
/// two views; the positive for a view 1 sample is its view 2 momentum
/// projection (and vice versa), every other key is a negative.
pub fn moco_loss<B: Backend>(
    projections_1: Tensor<B, 2>,
    projections_2: Tensor<B, 2>,
    momentum_1: Tensor<B, 2>,
    momentum_2: Tensor<B, 2>,
    queue: Tensor<B, 2>,
    temperature: f64,
) -> Tensor<B, 1> {
    let device = projections_1.device();
    let [batch_size, _] = projections_1.dims();

    let keys_1_2 = Tensor::cat(vec![momentum_2, queue.clone()], 0);
    let keys_2_1 = Tensor::cat(vec![momentum_1, queue], 0);

    let logits_1_2 = l2_normalize(projections_1)
        .matmul(keys_1_2.transpose())
        .div_scalar(temperature);
    let logits_2_1 = l2_normalize(projections_2)
        .matmul(keys_2_1.transpose())
        .div_scalar(temperature);

    let targets = diagonal_targets::<B>(batch_size, &device);
    let logits = Tensor::cat(vec![logits_1_2, logits_2_1], 0);
    let targets = Tensor::cat(vec![targets.clone(), targets], 0);

    CrossEntropyLossConfig::new()
        .init(&device)
        .forward(logits, targets)
}

/// How often a view's nearest neighbour (cosine) in the other view is its partner
///
/// Counted in both directions, so `total = 2 * batch`.
pub fn contrastive_accuracy_counts<B: Backend>(
    features_1: Tensor<B, 2>,
    features_2: Tensor<B, 2>,
) -> (usize, usize) {
    let device = features_1.device();
    let [batch_size, _] = features_1.dims();

    let similarities = l2_normalize(features_1).matmul(l2_normalize(features_2).transpose());
    let targets = diagonal_targets::<B>(batch_size, &device);

    let correct = count_correct(similarities.clone(), targets.clone())
        + count_correct(similarities.transpose(), targets);
    (correct, 2 * batch_size)
}

/// How often a feature's strongest cross-correlation is with itself
///
/// Counted in both directions, so `total = 2 * feature_dim`.
pub fn correlation_accuracy_counts<B: Backend>(
    features_1: Tensor<B, 2>,
    features_2: Tensor<B, 2>,
) -> (usize, usize) {
    let device = features_1.device();
    let [_, feature_dim] = features_1.dims();

    let correlation = cross_correlation(features_1, features_2);
    let targets = diagonal_targets::<B>(feature_dim, &device);

    let correct = count_correct(correlation.clone(), targets.clone())
        + count_correct(correlation.transpose(), targets);
    (correct, 2 * feature_dim)
}
