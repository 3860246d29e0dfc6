//! Churn prediction from tabular customer records
//!
//! The trained model is read from a directory of JSON artifacts:
//!
//! * `model.json`: either `{"type": "logistic", "coefficients": [..], "intercept": x}` or
//!   `{"type": "forest", "trees": [{"nodes": [..]}]}` where nodes are
//!   `{"kind": "split", "feature": i, "threshold": t, "left": l, "right": r}` or
//!   `{"kind": "leaf", "value": [stay, churn]}`
//! * `scaler.json`: `{"mean": [..], "scale": [..]}`
//! * `feature_columns.json`: the ordered feature names the model was trained on
//! * `training_stats.json` (optional): `{"fill": {"Age": 38.0}, "geography_mode": "France"}`
//!
//! Artifacts are read on every call, so a retrained model is picked up without a restart.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use super::{DataOutput, FilePrediction, TabularAnalyzer};

pub const NO_DATA_FILES: &str = "No data files to process";

pub const MODEL_FILE: &str = "model.json";
pub const SCALER_FILE: &str = "scaler.json";
pub const FEATURES_FILE: &str = "feature_columns.json";
pub const STATS_FILE: &str = "training_stats.json";

/// Columns that may hold the customer identifier, in order of preference.
const CUSTOMER_ID_COLUMNS: [&str; 7] = [
    "CustomerID",
    "Customer_ID",
    "customer_id",
    "CustomerId",
    "ID",
    "Id",
    "id",
];

const GEOGRAPHY_PREFIX: &str = "Geography_";

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("Model files not found: {0}")]
    Missing(PathBuf),

    #[error("Model file {path} is unreadable: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Model file {path} is malformed: {source}")]
    Malformed {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Model artifacts disagree: {0}")]
    Inconsistent(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub stay_probability: f64,
    pub churn_probability: f64,
    /// 1 when the customer is predicted to churn.
    pub prediction: u8,
}

impl Prediction {
    pub fn from_churn_probability(churn: f64) -> Self {
        let churn = churn.clamp(0.0, 1.0);
        Self {
            stay_probability: 1.0 - churn,
            churn_probability: churn,
            prediction: u8::from(churn > 0.5),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: [f64; 2],
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Tree {
    pub nodes: Vec<Node>,
}

impl Tree {
    /// Child indices must point forward, which rules out cycles.
    fn check(&self, features: usize) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("tree has no nodes".into());
        }
        for (i, node) in self.nodes.iter().enumerate() {
            if let Node::Split {
                feature,
                left,
                right,
                ..
            } = node
            {
                if *feature >= features {
                    return Err(format!("node {} splits on unknown feature {}", i, feature));
                }
                for child in [left, right] {
                    if *child <= i || *child >= self.nodes.len() {
                        return Err(format!("node {} has invalid child {}", i, child));
                    }
                }
            }
        }
        Ok(())
    }

    /// Class distribution `[stay, churn]` of the leaf `x` lands in, normalized.
    fn distribution(&self, x: &[f64]) -> [f64; 2] {
        let mut index = 0;
        loop {
            match &self.nodes[index] {
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    index = if x[*feature] <= *threshold { *left } else { *right };
                }
                Node::Leaf { value } => {
                    let total = value[0] + value[1];
                    return if total > 0.0 {
                        [value[0] / total, value[1] / total]
                    } else {
                        [0.5, 0.5]
                    };
                }
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChurnModel {
    Logistic { coefficients: Vec<f64>, intercept: f64 },
    Forest { trees: Vec<Tree> },
}

impl ChurnModel {
    fn check(&self, features: usize) -> Result<(), String> {
        match self {
            ChurnModel::Logistic { coefficients, .. } if coefficients.len() != features => Err(
                format!("{} coefficients for {} features", coefficients.len(), features),
            ),
            ChurnModel::Logistic { .. } => Ok(()),
            ChurnModel::Forest { trees } if trees.is_empty() => Err("forest has no trees".into()),
            ChurnModel::Forest { trees } => trees.iter().try_for_each(|t| t.check(features)),
        }
    }

    /// Probability of the churn class for a scaled feature vector.
    pub fn churn_probability(&self, x: &[f64]) -> f64 {
        match self {
            ChurnModel::Logistic {
                coefficients,
                intercept,
            } => {
                let z: f64 = coefficients.iter().zip(x).map(|(w, v)| w * v).sum::<f64>() + intercept;
                1.0 / (1.0 + (-z).exp())
            }
            ChurnModel::Forest { trees } => {
                trees.iter().map(|t| t.distribution(x)[1]).sum::<f64>() / trees.len() as f64
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Scaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl Scaler {
    fn transform(&self, x: &mut [f64]) {
        for ((v, mean), scale) in x.iter_mut().zip(&self.mean).zip(&self.scale) {
            let scale = if *scale == 0.0 { 1.0 } else { *scale };
            *v = (*v - mean) / scale;
        }
    }
}

/// Statistics captured at training time, used to fill gaps in incoming records.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrainingStats {
    #[serde(default)]
    pub fill: HashMap<String, f64>,
    #[serde(default)]
    pub geography_mode: Option<String>,
}

impl TrainingStats {
    fn fill_value(&self, column: &str) -> f64 {
        if let Some(value) = self.fill.get(column) {
            return *value;
        }
        match column {
            "HasCrCard" | "IsActiveMember" => 1.0,
            "Age" => 35.0,
            _ => 0.0,
        }
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: PathBuf) -> Result<T, ArtifactError> {
    if !path.is_file() {
        return Err(ArtifactError::Missing(path));
    }
    let raw = fs::read(&path).map_err(|source| ArtifactError::Io {
        path: path.clone(),
        source,
    })?;
    serde_json::from_slice(&raw).map_err(|source| ArtifactError::Malformed { path, source })
}

/// A loaded and cross-checked set of model artifacts.
#[derive(Debug, Clone)]
pub struct ModelBundle {
    model: ChurnModel,
    scaler: Scaler,
    features: Vec<String>,
    stats: TrainingStats,
}

impl ModelBundle {
    pub fn load(dir: &Path) -> Result<Self, ArtifactError> {
        let model: ChurnModel = read_json(dir.join(MODEL_FILE))?;
        let scaler: Scaler = read_json(dir.join(SCALER_FILE))?;
        let features: Vec<String> = read_json(dir.join(FEATURES_FILE))?;
        let stats = match read_json(dir.join(STATS_FILE)) {
            Ok(stats) => stats,
            Err(ArtifactError::Missing(_)) => TrainingStats::default(),
            Err(e) => return Err(e),
        };
        Self::new(model, scaler, features, stats)
    }

    pub fn new(
        model: ChurnModel,
        scaler: Scaler,
        features: Vec<String>,
        stats: TrainingStats,
    ) -> Result<Self, ArtifactError> {
        if scaler.mean.len() != features.len() || scaler.scale.len() != features.len() {
            return Err(ArtifactError::Inconsistent(format!(
                "scaler covers {} columns, schema has {}",
                scaler.mean.len().min(scaler.scale.len()),
                features.len()
            )));
        }
        model
            .check(features.len())
            .map_err(ArtifactError::Inconsistent)?;
        Ok(Self {
            model,
            scaler,
            features,
            stats,
        })
    }

    /// Encode one raw record into the model's feature space, before scaling.
    ///
    /// Columns the schema does not know are ignored; schema columns the record lacks are filled.
    pub fn encode(&self, row: &HashMap<String, String>) -> Vec<f64> {
        let value = |column: &str| {
            row.get(column)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
        };
        let geography = value("Geography")
            .map(str::to_string)
            .or_else(|| self.stats.geography_mode.clone());

        self.features
            .iter()
            .map(|column| {
                if let Some(country) = column.strip_prefix(GEOGRAPHY_PREFIX) {
                    return match &geography {
                        Some(g) if g == country => 1.0,
                        _ => 0.0,
                    };
                }
                match (column.as_str(), value(column.as_str())) {
                    ("Gender", Some(g)) if g.eq_ignore_ascii_case("male") => 0.0,
                    ("Gender", Some(g)) if g.eq_ignore_ascii_case("female") => 1.0,
                    (_, Some(raw)) => raw
                        .parse::<f64>()
                        .ok()
                        .filter(|v| v.is_finite())
                        .unwrap_or_else(|| self.stats.fill_value(column)),
                    (_, None) => self.stats.fill_value(column),
                }
            })
            .collect()
    }

    pub fn predict(&self, row: &HashMap<String, String>) -> Prediction {
        let mut x = self.encode(row);
        self.scaler.transform(&mut x);
        Prediction::from_churn_probability(self.model.churn_probability(&x))
    }
}

/// The first record of a CSV file as a column to value map, or `None` for an empty table.
fn first_record(path: &Path) -> Result<Option<HashMap<String, String>>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;
    let headers = reader.headers()?.clone();
    let mut record = csv::StringRecord::new();
    if !reader.read_record(&mut record)? {
        return Ok(None);
    }
    Ok(Some(
        headers
            .iter()
            .zip(record.iter())
            .map(|(h, v)| (h.trim_start_matches('\u{feff}').to_string(), v.to_string()))
            .collect(),
    ))
}

fn customer_id(row: &HashMap<String, String>) -> Option<String> {
    CUSTOMER_ID_COLUMNS
        .iter()
        .find_map(|column| row.get(*column))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Runs the trained churn model over uploaded tables.
#[derive(Debug, Clone)]
pub struct ChurnPredictor {
    model_dir: PathBuf,
}

impl ChurnPredictor {
    pub fn new(model_dir: impl Into<PathBuf>) -> Self {
        Self {
            model_dir: model_dir.into(),
        }
    }
}

impl TabularAnalyzer for ChurnPredictor {
    fn analyze(&self, paths: &[PathBuf]) -> Result<DataOutput> {
        if paths.is_empty() {
            return Ok(DataOutput::Message(NO_DATA_FILES.to_string()));
        }
        let bundle = ModelBundle::load(&self.model_dir)?;
        info!(model_dir = %self.model_dir.display(), "Churn model loaded");

        let mut predictions = Vec::new();
        for path in paths {
            let is_csv = path
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case("csv"))
                .unwrap_or(false);
            if !is_csv {
                warn!("Unsupported table format, skipping {}", path.display());
                continue;
            }
            let Some(row) = first_record(path)? else {
                warn!("Empty table, skipping {}", path.display());
                continue;
            };
            predictions.push(FilePrediction {
                file: file_label(path),
                prediction: bundle.predict(&row),
                customer_id: customer_id(&row),
            });
        }

        if predictions.is_empty() {
            return Ok(DataOutput::Message(
                "No predictions could be made from the provided files".to_string(),
            ));
        }
        Ok(DataOutput::Predictions(predictions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn identity_bundle(features: &[&str], model: ChurnModel) -> ModelBundle {
        let n = features.len();
        ModelBundle::new(
            model,
            Scaler {
                mean: vec![0.0; n],
                scale: vec![1.0; n],
            },
            features.iter().map(|f| f.to_string()).collect(),
            TrainingStats::default(),
        )
        .unwrap()
    }

    #[test]
    fn encodes_categoricals_and_fills_gaps() {
        let bundle = identity_bundle(
            &[
                "CreditScore",
                "Gender",
                "Age",
                "HasCrCard",
                "Geography_France",
                "Geography_Spain",
            ],
            ChurnModel::Logistic {
                coefficients: vec![0.0; 6],
                intercept: 0.0,
            },
        );

        let encoded = bundle.encode(&row(&[
            ("RowNumber", "1"),
            ("Surname", "Hargrave"),
            ("CreditScore", "619"),
            ("Gender", "Female"),
            ("Geography", "Spain"),
            ("Age", ""),
        ]));
        assert_eq!(encoded, vec![619.0, 1.0, 35.0, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn zero_scale_is_treated_as_one() {
        let scaler = Scaler {
            mean: vec![1.0, 2.0],
            scale: vec![0.0, 2.0],
        };
        let mut x = vec![3.0, 6.0];
        scaler.transform(&mut x);
        assert_eq!(x, vec![2.0, 2.0]);
    }

    #[test]
    fn forest_averages_leaf_distributions() {
        let tree = |threshold: f64| Tree {
            nodes: vec![
                Node::Split {
                    feature: 0,
                    threshold,
                    left: 1,
                    right: 2,
                },
                Node::Leaf { value: [9.0, 1.0] },
                Node::Leaf { value: [1.0, 3.0] },
            ],
        };
        let bundle = identity_bundle(
            &["Balance"],
            ChurnModel::Forest {
                trees: vec![tree(10.0), tree(100.0)],
            },
        );

        let p = bundle.predict(&row(&[("Balance", "50")]));
        assert!((p.churn_probability - (0.75 + 0.1) / 2.0).abs() < 1e-9);
        assert!((p.stay_probability + p.churn_probability - 1.0).abs() < 1e-9);
        assert_eq!(p.prediction, 0);
    }

    #[test]
    fn cyclic_trees_are_rejected() {
        let model = ChurnModel::Forest {
            trees: vec![Tree {
                nodes: vec![Node::Split {
                    feature: 0,
                    threshold: 0.0,
                    left: 0,
                    right: 0,
                }],
            }],
        };
        let result = ModelBundle::new(
            model,
            Scaler {
                mean: vec![0.0],
                scale: vec![1.0],
            },
            vec!["Age".into()],
            TrainingStats::default(),
        );
        assert!(matches!(result, Err(ArtifactError::Inconsistent(_))));
    }

    #[test]
    fn threshold_is_strictly_above_half() {
        assert_eq!(Prediction::from_churn_probability(0.5).prediction, 0);
        assert_eq!(Prediction::from_churn_probability(0.5000001).prediction, 1);
    }

    #[test]
    fn customer_id_prefers_earlier_candidates() {
        assert_eq!(
            customer_id(&row(&[("id", "7"), ("CustomerId", "15634602")])),
            Some("15634602".into())
        );
        assert_eq!(customer_id(&row(&[("Name", "x")])), None);
    }
}
