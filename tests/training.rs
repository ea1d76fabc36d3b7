//! End-to-end runs on a tiny synthetic corpus

use std::path::Path;

use burn::backend::{Autodiff, NdArray};
use tempfile::TempDir;

use contrastive_ssl::dataset::{DataSource, SyntheticConfig};
use contrastive_ssl::model::config::{AlgorithmKind, ExperimentConfig, Hyperparameters};
use contrastive_ssl::training::{run_experiment, History, HISTORY_KEYS};

type TestBackend = Autodiff<NdArray<f32>>;

fn tiny_config(algorithm: AlgorithmKind, output: &Path) -> ExperimentConfig {
    let mut config = ExperimentConfig {
        algorithm,
        num_epochs: 1,
        steps_per_epoch: 2,
        width: 4,
        seed: 11,
        hyperparameters: Hyperparameters {
            queue_size: 16,
            ..Default::default()
        },
        data: DataSource::Synthetic(SyntheticConfig {
            unlabeled_len: 8,
            labeled_len: 4,
            test_len: 6,
            seed: 5,
        }),
        ..Default::default()
    };
    config.output.dir = output.to_path_buf();
    config
}

#[test]
fn every_algorithm_trains_one_epoch_and_writes_its_history() {
    let dir = TempDir::new().unwrap();

    for kind in AlgorithmKind::ALL {
        let config = tiny_config(kind, dir.path());
        let outcome =
            run_experiment::<TestBackend>(&config, Default::default(), false).unwrap();

        assert_eq!(outcome.history.len(), 1, "{kind}");
        assert_eq!(
            outcome.history_path,
            dir.path().join(format!("{}.pkl", kind.name()))
        );

        let saved = History::load_pickle(&outcome.history_path).unwrap();
        assert_eq!(saved, outcome.history);

        let map = saved.to_map();
        for key in HISTORY_KEYS {
            assert_eq!(map[key].len(), 1, "{kind}: {key}");
            assert!(map[key][0].is_finite(), "{kind}: {key}");
        }
    }
}

#[test]
fn history_has_one_entry_per_epoch() {
    let dir = TempDir::new().unwrap();
    let mut config = tiny_config(AlgorithmKind::BarlowTwins, dir.path());
    config.num_epochs = 3;
    config.output.json = true;

    let outcome = run_experiment::<TestBackend>(&config, Default::default(), false).unwrap();

    assert_eq!(outcome.history.len(), 3);
    let json_path = outcome.json_path.unwrap();
    let value: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(json_path).unwrap()).unwrap();
    assert_eq!(value["c_loss"].as_array().unwrap().len(), 3);
}

#[test]
fn batch_geometry_follows_steps_per_epoch() {
    let dir = TempDir::new().unwrap();
    let config = tiny_config(AlgorithmKind::SimClr, dir.path());

    let outcome = run_experiment::<TestBackend>(&config, Default::default(), false).unwrap();

    assert_eq!(outcome.stats.unlabeled_batch_size, 4);
    assert_eq!(outcome.stats.labeled_batch_size, 2);
    assert_eq!(outcome.stats.batch_size, 6);
    assert_eq!(outcome.stats.test_batches, 1);
}

#[test]
fn failed_run_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let mut config = tiny_config(AlgorithmKind::MoCo, dir.path());
    // more steps than labeled images leaves no labeled batch
    config.steps_per_epoch = 5;

    assert!(run_experiment::<TestBackend>(&config, Default::default(), false).is_err());
    assert!(!dir.path().join("MoCo.pkl").exists());
}

#[test]
fn failed_model_save_writes_no_history() {
    let dir = TempDir::new().unwrap();
    let mut config = tiny_config(AlgorithmKind::SimClr, dir.path());
    config.output.json = true;
    config.output.save_model = true;
    // a plain file where the model directory should be
    let blocked = dir.path().join("models");
    std::fs::write(&blocked, b"").unwrap();
    config.output.model_dir = Some(blocked);

    assert!(run_experiment::<TestBackend>(&config, Default::default(), false).is_err());
    assert!(!dir.path().join("SimCLR.pkl").exists());
    assert!(!dir.path().join("SimCLR.json").exists());
}

#[test]
fn shipped_default_config_matches_built_in_defaults() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/default.toml");
    let loaded = ExperimentConfig::load(&path).unwrap();
    let defaults = ExperimentConfig::default();

    assert_eq!(loaded.algorithm, defaults.algorithm);
    assert_eq!(loaded.num_epochs, defaults.num_epochs);
    assert_eq!(loaded.steps_per_epoch, defaults.steps_per_epoch);
    assert_eq!(loaded.width, defaults.width);
    assert_eq!(loaded.hyperparameters, defaults.hyperparameters);
    assert_eq!(loaded.data, defaults.data);
    assert_eq!(loaded.output, defaults.output);
}

#[test]
fn smoke_config_parses() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/smoke.toml");
    let config = ExperimentConfig::load(&path).unwrap();

    assert_eq!(config.algorithm, AlgorithmKind::MoCo);
    assert!(matches!(config.data, DataSource::Synthetic(_)));
    config.validate().unwrap();
}
