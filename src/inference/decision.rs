//! How the stage outputs turn into a final decision.

use super::chat::Sentiment;
use super::DataOutput;

pub const STAY: &str = "Customer is likely to stay with the service";
pub const CHURN: &str = "Customer is likely to churn";
pub const AT_RISK: &str = "Customer is at risk of churning";

pub trait DecisionPolicy: Send + Sync {
    fn decide(&self, audio: &str, data: &DataOutput, chat: &str) -> String;
}

/// Ignores the inputs and always reports the customer as staying.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedDecision;

impl DecisionPolicy for FixedDecision {
    fn decide(&self, _audio: &str, _data: &DataOutput, _chat: &str) -> String {
        STAY.to_string()
    }
}

/// Any churn prediction wins, then negative chat sentiment flags the customer as at risk.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalsDecision;

impl DecisionPolicy for SignalsDecision {
    fn decide(&self, _audio: &str, data: &DataOutput, chat: &str) -> String {
        if data.predictions().iter().any(|p| p.prediction.prediction == 1) {
            CHURN.to_string()
        } else if chat == Sentiment::Negative.label() {
            AT_RISK.to_string()
        } else {
            STAY.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::{FilePrediction, Prediction};

    fn predictions(churn: &[f64]) -> DataOutput {
        DataOutput::Predictions(
            churn
                .iter()
                .enumerate()
                .map(|(i, p)| FilePrediction {
                    file: format!("{}.csv", i),
                    prediction: Prediction::from_churn_probability(*p),
                    customer_id: None,
                })
                .collect(),
        )
    }

    #[test]
    fn signals_ranks_churn_over_sentiment() {
        let policy = SignalsDecision;
        assert_eq!(policy.decide("", &predictions(&[0.1, 0.9]), "POSITIVE"), CHURN);
        assert_eq!(policy.decide("", &predictions(&[0.1]), "NEGATIVE"), AT_RISK);
        assert_eq!(policy.decide("", &predictions(&[0.1]), "POSITIVE"), STAY);
        assert_eq!(
            policy.decide("", &DataOutput::Message("No data files to process".into()), "NEGATIVE"),
            AT_RISK
        );
    }
}
