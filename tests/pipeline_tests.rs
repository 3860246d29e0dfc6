use anyhow::Result;
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use churnwatch::{
    clock::ManualClock,
    inference::{
        audio::PlaceholderAudio, chat::TranscriptSentiment, decision, tabular::ChurnPredictor,
        AudioAnalyzer, DataOutput, FixedDecision, Pipeline, SignalsDecision, UploadBatch,
    },
};

const FEATURES: [&str; 5] = [
    "CreditScore",
    "Gender",
    "Age",
    "Geography_France",
    "Geography_Spain",
];

/// A logistic model that ignores its inputs and predicts `churn` for everyone.
fn write_constant_model(dir: &Path, churn: f64) {
    fs::create_dir_all(dir).unwrap();
    let intercept = (churn / (1.0 - churn)).ln();
    let coefficients = vec![0.0; FEATURES.len()];
    fs::write(
        dir.join("model.json"),
        json!({ "type": "logistic", "coefficients": coefficients, "intercept": intercept })
            .to_string(),
    )
    .unwrap();
    fs::write(
        dir.join("scaler.json"),
        json!({ "mean": [650.0, 0.5, 38.0, 0.5, 0.25], "scale": [96.0, 0.5, 10.0, 0.5, 0.0] })
            .to_string(),
    )
    .unwrap();
    fs::write(dir.join("feature_columns.json"), json!(FEATURES).to_string()).unwrap();
}

fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).unwrap();
    path
}

fn pipeline(model_dir: &Path, audio: Arc<dyn AudioAnalyzer>) -> Pipeline {
    Pipeline::new(
        audio,
        Arc::new(ChurnPredictor::new(model_dir)),
        Arc::new(TranscriptSentiment::new("user1").unwrap()),
        Arc::new(SignalsDecision),
        Arc::new(ManualClock::default()),
    )
}

struct ExplodingAudio;

impl AudioAnalyzer for ExplodingAudio {
    fn analyze(&self, _paths: &[PathBuf]) -> Result<String> {
        panic!("decoder crashed")
    }
}

#[tokio::test]
async fn single_row_prediction_follows_the_threshold() {
    let dir = tempfile::tempdir().unwrap();
    let model_dir = dir.path().join("model");
    write_constant_model(&model_dir, 0.72);
    let table = write_file(
        dir.path(),
        "customer.csv",
        "RowNumber,CustomerID,Surname,CreditScore,Geography,Gender,Age\n1,C1,Hargrave,619,France,Female,42\n2,C2,Hill,608,Spain,Female,41\n",
    );

    let batch = UploadBatch {
        data: vec![table],
        ..Default::default()
    };
    let result = pipeline(&model_dir, Arc::new(PlaceholderAudio))
        .run(batch, "ada@example.com")
        .await;

    let DataOutput::Predictions(predictions) = &result.data_output else {
        panic!("expected predictions, got {:?}", result.data_output);
    };
    assert_eq!(predictions.len(), 1);
    let p = &predictions[0];
    assert_eq!(p.file, "customer.csv");
    assert_eq!(p.customer_id.as_deref(), Some("C1"));
    assert!((p.prediction.churn_probability - 0.72).abs() < 1e-9);
    assert!((p.prediction.stay_probability + p.prediction.churn_probability - 1.0).abs() < 1e-9);
    assert_eq!(p.prediction.prediction, 1);

    assert_eq!(result.customer_id.as_deref(), Some("C1"));
    assert_eq!(result.final_decision, decision::CHURN);
    assert_eq!(result.triggered_by, "ada@example.com");
    assert!(result.error.is_none());
}

#[tokio::test]
async fn a_crashing_stage_spares_the_others() {
    let dir = tempfile::tempdir().unwrap();
    let model_dir = dir.path().join("model");
    write_constant_model(&model_dir, 0.2);
    let table = write_file(dir.path(), "c.csv", "CustomerId,Age\n15634602,30\n");
    let chat = write_file(
        dir.path(),
        "chat.txt",
        "01/02/2024, 09:15 - user1: I am really frustrated, I want to cancel\n",
    );
    let audio = write_file(dir.path(), "call.wav", "RIFF");

    let batch = UploadBatch {
        audio: vec![audio],
        data: vec![table],
        chat: vec![chat],
    };
    let result = pipeline(&model_dir, Arc::new(ExplodingAudio))
        .run(batch, "ada@example.com")
        .await;

    assert!(result.audio_output.starts_with("Error processing audio"));
    assert_eq!(result.chat_output, "NEGATIVE");
    assert_eq!(result.data_output.predictions().len(), 1);
    assert_eq!(result.customer_id.as_deref(), Some("15634602"));
    assert_eq!(result.final_decision, decision::AT_RISK);
}

#[tokio::test]
async fn missing_artifacts_are_reported_in_the_data_output() {
    let dir = tempfile::tempdir().unwrap();
    let table = write_file(dir.path(), "c.csv", "CustomerID,Age\nC9,30\n");

    let batch = UploadBatch {
        data: vec![table],
        ..Default::default()
    };
    let result = pipeline(&dir.path().join("nowhere"), Arc::new(PlaceholderAudio))
        .run(batch, "ada@example.com")
        .await;

    match &result.data_output {
        DataOutput::Message(message) => {
            assert!(message.starts_with("Error processing data"), "{}", message);
            assert!(message.contains("Model files not found"), "{}", message);
        }
        other => panic!("expected an error message, got {:?}", other),
    }
    assert_eq!(result.customer_id, None);
}

#[tokio::test]
async fn empty_categories_say_so() {
    let dir = tempfile::tempdir().unwrap();
    let result = Pipeline::new(
        Arc::new(PlaceholderAudio),
        Arc::new(ChurnPredictor::new(dir.path())),
        Arc::new(TranscriptSentiment::new("user1").unwrap()),
        Arc::new(FixedDecision),
        Arc::new(ManualClock::default()),
    )
    .run(UploadBatch::default(), "ada@example.com")
    .await;

    assert_eq!(result.audio_output, "No audio files to process");
    assert_eq!(
        result.data_output,
        DataOutput::Message("No data files to process".into())
    );
    assert_eq!(result.chat_output, "No chat files to process");
    assert_eq!(result.final_decision, decision::STAY);
}

#[tokio::test]
async fn unsupported_tables_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let model_dir = dir.path().join("model");
    write_constant_model(&model_dir, 0.3);
    let sheet = write_file(dir.path(), "c.xlsx", "not really a spreadsheet");

    let batch = UploadBatch {
        data: vec![sheet],
        ..Default::default()
    };
    let result = pipeline(&model_dir, Arc::new(PlaceholderAudio))
        .run(batch, "ada@example.com")
        .await;

    assert!(matches!(result.data_output, DataOutput::Message(_)));
    assert!(result.data_output.predictions().is_empty());
}
