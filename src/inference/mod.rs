//! The analysis pipeline run over every upload batch
//!
//! Audio, tabular and chat analyzers run concurrently on the blocking pool. A stage that fails or
//! panics only spoils its own output; the merge step always produces a result.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use crate::clock::Clock;
use crate::config::{Config, DecisionPolicyKind};

pub mod audio;
pub mod chat;
pub mod decision;
pub mod tabular;

pub use decision::{DecisionPolicy, FixedDecision, SignalsDecision};
pub use tabular::Prediction;

pub trait AudioAnalyzer: Send + Sync + 'static {
    fn analyze(&self, paths: &[PathBuf]) -> Result<String>;
}

pub trait TabularAnalyzer: Send + Sync + 'static {
    fn analyze(&self, paths: &[PathBuf]) -> Result<DataOutput>;
}

pub trait ChatAnalyzer: Send + Sync + 'static {
    fn analyze(&self, paths: &[PathBuf]) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilePrediction {
    pub file: String,
    pub prediction: Prediction,
    pub customer_id: Option<String>,
}

/// Tabular stage output: per-file predictions, or a message when there is nothing to predict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DataOutput {
    Predictions(Vec<FilePrediction>),
    Message(String),
}

impl DataOutput {
    pub fn predictions(&self) -> &[FilePrediction] {
        match self {
            DataOutput::Predictions(p) => p,
            DataOutput::Message(_) => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub audio_output: String,
    pub data_output: DataOutput,
    pub chat_output: String,
    pub final_decision: String,
    pub timestamp: DateTime<Utc>,
    pub triggered_by: String,
    pub customer_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Files of one upload, by category.
#[derive(Debug, Clone, Default)]
pub struct UploadBatch {
    pub audio: Vec<PathBuf>,
    pub data: Vec<PathBuf>,
    pub chat: Vec<PathBuf>,
}

impl UploadBatch {
    pub fn is_empty(&self) -> bool {
        self.audio.is_empty() && self.data.is_empty() && self.chat.is_empty()
    }
}

/// Merge the three stage outputs into one result.
///
/// Never panics: a failing policy yields a result tagged with an error instead of a decision.
pub fn combine(
    audio: String,
    data: DataOutput,
    chat: String,
    triggered_by: &str,
    now: DateTime<Utc>,
    policy: &dyn DecisionPolicy,
) -> AnalysisResult {
    let customer_id = data
        .predictions()
        .iter()
        .find_map(|p| p.customer_id.clone());

    let decided = catch_unwind(AssertUnwindSafe(|| policy.decide(&audio, &data, &chat)));
    let (final_decision, error) = match decided {
        Ok(decision) => (decision, None),
        Err(_) => {
            error!("Decision policy panicked");
            (
                "No final decision available".to_string(),
                Some("Error in processing".to_string()),
            )
        }
    };

    AnalysisResult {
        audio_output: audio,
        data_output: data,
        chat_output: chat,
        final_decision,
        timestamp: now,
        triggered_by: triggered_by.to_string(),
        customer_id,
        error,
    }
}

/// Run `work` on the blocking pool, turning an error or a panic into a message.
async fn run_stage<T, F>(stage: &'static str, work: F) -> Result<T, String>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => {
            error!(stage, "Analysis stage failed: {:#}", e);
            Err(format!("{:#}", e))
        }
        Err(e) => {
            error!(stage, "Analysis stage panicked: {}", e);
            Err(format!("{} analysis crashed", stage))
        }
    }
}

pub struct Pipeline {
    audio: Arc<dyn AudioAnalyzer>,
    tabular: Arc<dyn TabularAnalyzer>,
    chat: Arc<dyn ChatAnalyzer>,
    policy: Arc<dyn DecisionPolicy>,
    clock: Arc<dyn Clock>,
}

impl Pipeline {
    pub fn new(
        audio: Arc<dyn AudioAnalyzer>,
        tabular: Arc<dyn TabularAnalyzer>,
        chat: Arc<dyn ChatAnalyzer>,
        policy: Arc<dyn DecisionPolicy>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            audio,
            tabular,
            chat,
            policy,
            clock,
        }
    }

    /// The production pipeline described by `config`.
    pub fn from_config(config: &Config, clock: Arc<dyn Clock>) -> Result<Self> {
        let policy: Arc<dyn DecisionPolicy> = match config.decision_policy {
            DecisionPolicyKind::Signals => Arc::new(SignalsDecision),
            DecisionPolicyKind::Fixed => Arc::new(FixedDecision),
        };
        Ok(Self::new(
            Arc::new(audio::PlaceholderAudio),
            Arc::new(tabular::ChurnPredictor::new(config.model_dir.clone())),
            Arc::new(chat::TranscriptSentiment::new(&config.chat_participant)?),
            policy,
            clock,
        ))
    }

    pub async fn run(&self, batch: UploadBatch, triggered_by: &str) -> AnalysisResult {
        let UploadBatch { audio, data, chat } = batch;
        let (audio_analyzer, tabular, chat_analyzer) =
            (self.audio.clone(), self.tabular.clone(), self.chat.clone());

        let (audio, data, chat) = tokio::join!(
            run_stage("audio", move || audio_analyzer.analyze(&audio)),
            run_stage("data", move || tabular.analyze(&data)),
            run_stage("chat", move || chat_analyzer.analyze(&chat)),
        );

        let audio = audio.unwrap_or_else(|e| format!("Error processing audio: {}", e));
        let data =
            data.unwrap_or_else(|e| DataOutput::Message(format!("Error processing data: {}", e)));
        let chat = chat.unwrap_or_else(|e| format!("Error processing chat: {}", e));

        let result = combine(
            audio,
            data,
            chat,
            triggered_by,
            self.clock.now(),
            self.policy.as_ref(),
        );
        info!(
            triggered_by,
            decision = %result.final_decision,
            customer = ?result.customer_id,
            "Analysis complete"
        );
        result
    }
}
