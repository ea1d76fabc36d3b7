//! Training history
//!
//! One `EpochRecord` per epoch, persisted as a Python pickle of
//! `dict[str, list[float]]` so the result can be read with `pickle.load`:
//!
//! ```text
//! {"c_loss": [...], "c_acc": [...], "r_acc": [...], "p_loss": [...],
//!  "p_acc": [...], "val_p_loss": [...], "val_p_acc": [...]}
//! ```

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::utils::error::{Result, SslError};

/// Metric names, in reporting order
pub const HISTORY_KEYS: [&str; 7] = [
    "c_loss",
    "c_acc",
    "r_acc",
    "p_loss",
    "p_acc",
    "val_p_loss",
    "val_p_acc",
];

/// Metrics of one epoch
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    /// Mean contrastive loss
    pub c_loss: f64,
    /// Contrastive (view matching) accuracy
    pub c_acc: f64,
    /// Correlation (feature matching) accuracy
    pub r_acc: f64,
    /// Mean linear probe loss on augmented labeled batches
    pub p_loss: f64,
    /// Linear probe accuracy on augmented labeled batches
    pub p_acc: f64,
    /// Mean linear probe loss on the test split
    pub val_p_loss: f64,
    /// Linear probe accuracy on the test split
    pub val_p_acc: f64,
}

impl EpochRecord {
    fn values(&self) -> [f64; 7] {
        [
            self.c_loss,
            self.c_acc,
            self.r_acc,
            self.p_loss,
            self.p_acc,
            self.val_p_loss,
            self.val_p_acc,
        ]
    }
}

/// File format of a saved history
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryFormat {
    Pickle,
    Json,
}

impl HistoryFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            HistoryFormat::Pickle => "pkl",
            HistoryFormat::Json => "json",
        }
    }
}

/// Ordered per-epoch records
#[derive(Debug, Clone, Default, PartialEq)]
pub struct History {
    records: Vec<EpochRecord>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: EpochRecord) {
        self.records.push(record);
    }

    /// Number of epochs recorded
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[EpochRecord] {
        &self.records
    }

    pub fn last(&self) -> Option<&EpochRecord> {
        self.records.last()
    }

    /// Column view: metric name to per-epoch values
    pub fn to_map(&self) -> BTreeMap<String, Vec<f64>> {
        let mut map: BTreeMap<String, Vec<f64>> = HISTORY_KEYS
            .iter()
            .map(|key| (key.to_string(), Vec::with_capacity(self.len())))
            .collect();

        for record in &self.records {
            for (key, value) in HISTORY_KEYS.iter().zip(record.values()) {
                if let Some(column) = map.get_mut(*key) {
                    column.push(value);
                }
            }
        }

        map
    }

    /// Rebuild from a column view; every key must be present with equal lengths
    pub fn from_map(map: &BTreeMap<String, Vec<f64>>) -> Result<Self> {
        let columns = HISTORY_KEYS
            .iter()
            .map(|key| {
                map.get(*key)
                    .ok_or_else(|| SslError::Serialization(format!("history is missing '{key}'")))
            })
            .collect::<Result<Vec<_>>>()?;

        let len = columns[0].len();
        if columns.iter().any(|column| column.len() != len) {
            return Err(SslError::Serialization(
                "history columns have different lengths".to_string(),
            ));
        }

        let records = (0..len)
            .map(|i| EpochRecord {
                c_loss: columns[0][i],
                c_acc: columns[1][i],
                r_acc: columns[2][i],
                p_loss: columns[3][i],
                p_acc: columns[4][i],
                val_p_loss: columns[5][i],
                val_p_acc: columns[6][i],
            })
            .collect();

        Ok(Self { records })
    }

    /// Write `<dir>/<name>.<ext>` and return its path
    pub fn save(&self, dir: &Path, name: &str, format: HistoryFormat) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.{}", name, format.extension()));
        let mut writer = BufWriter::new(File::create(&path)?);

        match format {
            HistoryFormat::Pickle => {
                serde_pickle::to_writer(&mut writer, &self.to_map(), serde_pickle::SerOptions::new())?
            }
            HistoryFormat::Json => serde_json::to_writer_pretty(&mut writer, &self.to_map())?,
        }
        writer.flush()?;

        info!("History saved to {:?}", path);
        Ok(path)
    }

    /// Read a pickled history
    pub fn load_pickle(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(SslError::PathNotFound(path.to_path_buf()));
        }
        let reader = BufReader::new(File::open(path)?);
        let map: BTreeMap<String, Vec<f64>> =
            serde_pickle::from_reader(reader, serde_pickle::DeOptions::new())?;
        Self::from_map(&map)
    }
}
