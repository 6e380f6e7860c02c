//! NATS message producer for churn assessments

use crate::insights::InsightResult;
use crate::types::assessment::ChurnAssessment;
use anyhow::Result;
use async_nats::Client;
use serde_json::{json, Value};
use tracing::debug;

/// Combined assessment message: prediction wire keys per model plus the
/// insight sections when they were generated.
pub fn assessment_message(assessment: &ChurnAssessment, insights: Option<&InsightResult>) -> Value {
    let mut body = assessment.to_wire();
    body.insert("assessment_id".into(), json!(assessment.assessment_id));
    body.insert("timestamp".into(), json!(assessment.timestamp.to_rfc3339()));
    if let Some(identity) = &assessment.identity {
        body.insert("customer".into(), json!(identity.to_string()));
    }
    if let Some(insights) = insights {
        body.insert("insights".into(), insights.to_wire());
    }
    Value::Object(body)
}

/// Producer for publishing assessments to NATS
#[derive(Clone)]
pub struct AssessmentProducer {
    client: Client,
    subject: String,
}

impl AssessmentProducer {
    pub fn new(client: Client, subject: &str) -> Self {
        Self {
            client,
            subject: subject.to_string(),
        }
    }

    /// Publish an assessment with optional insights
    pub async fn publish(
        &self,
        assessment: &ChurnAssessment,
        insights: Option<&InsightResult>,
    ) -> Result<()> {
        let payload = serde_json::to_vec(&assessment_message(assessment, insights))?;

        self.client
            .publish(self.subject.clone(), payload.into())
            .await?;

        debug!(
            assessment_id = %assessment.assessment_id,
            models = assessment.predictions.len(),
            with_insights = insights.is_some(),
            "Published churn assessment"
        );

        Ok(())
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }
}
