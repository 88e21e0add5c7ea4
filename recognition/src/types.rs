use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Domain types
// ---------------------------------------------------------------------------

/// Classification outcome of a verification attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Match,
    NoMatch,
    Error,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Match => f.write_str("match"),
            Decision::NoMatch => f.write_str("no_match"),
            Decision::Error => f.write_str("error"),
        }
    }
}

impl FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "match" => Ok(Decision::Match),
            "no_match" => Ok(Decision::NoMatch),
            "error" => Ok(Decision::Error),
            other => Err(format!("unknown decision {other:?}")),
        }
    }
}

/// Result of a backend training request.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingOutcome {
    pub success: bool,
    pub message: String,
    /// Number of samples the backend trained on. Zero when `success` is false.
    pub sample_count: usize,
    pub centroid: Option<Vec<f32>>,
    /// Per-identity threshold suggested by the backend, within `[0, 1]`.
    pub threshold: Option<f32>,
    /// Failure description; set only when `success` is false.
    pub error: Option<String>,
}

/// Backend classification of a probe.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendVerification {
    pub matched: bool,
    pub identity_id: Option<String>,
    /// Raw backend score. Not clamped here.
    pub score: f32,
    pub decision: Decision,
    pub message: String,
}

/// Backend liveness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Health {
    pub healthy: bool,
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// `POST /train/{identity_id}` response body.
#[derive(Debug, Deserialize)]
pub(crate) struct TrainResponse {
    success: Option<bool>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    profile: Option<ProfilePayload>,
}

#[derive(Debug, Deserialize)]
struct ProfilePayload {
    #[serde(default)]
    embedding_centroid: Option<Vec<f32>>,
    #[serde(default)]
    num_samples: Option<u64>,
    #[serde(default)]
    threshold: Option<f32>,
    #[serde(default)]
    error_message: Option<String>,
}

/// `POST /verify` response body.
#[derive(Debug, Deserialize)]
pub(crate) struct VerifyResponse {
    success: Option<bool>,
    #[serde(rename = "match", default)]
    matched: Option<bool>,
    #[serde(default)]
    predicted_student_id: Value,
    #[serde(default)]
    score: Option<f64>,
    #[serde(default)]
    decision: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// `GET /health` response body.
#[derive(Debug, Deserialize)]
pub(crate) struct HealthResponse {
    #[serde(default)]
    pub(crate) status: String,
}

impl TrainResponse {
    /// Validate the payload into a [`TrainingOutcome`].
    pub(crate) fn into_outcome(self) -> Result<TrainingOutcome, String> {
        let success = self.success.ok_or("missing field `success`")?;
        let message = self.message.unwrap_or_default();

        if !success {
            let error = self
                .profile
                .and_then(|p| p.error_message)
                .filter(|m| !m.is_empty())
                .or_else(|| Some(message.clone()).filter(|m| !m.is_empty()))
                .unwrap_or_else(|| "training failed".to_string());
            return Ok(TrainingOutcome {
                success: false,
                message,
                sample_count: 0,
                centroid: None,
                threshold: None,
                error: Some(error),
            });
        }

        let profile = self.profile.ok_or("missing field `profile`")?;
        let sample_count = profile
            .num_samples
            .ok_or("missing field `profile.num_samples`")?;
        if let Some(t) = profile.threshold {
            if !t.is_finite() || !(0.0..=1.0).contains(&t) {
                return Err(format!("threshold {t} outside [0, 1]"));
            }
        }

        Ok(TrainingOutcome {
            success: true,
            message,
            sample_count: sample_count as usize,
            centroid: profile.embedding_centroid,
            threshold: profile.threshold,
            error: None,
        })
    }
}

impl VerifyResponse {
    /// Validate the payload into a [`BackendVerification`].
    pub(crate) fn into_verification(self) -> Result<BackendVerification, String> {
        let message = self.message.unwrap_or_default();

        if self.success == Some(false) {
            return Ok(BackendVerification {
                matched: false,
                identity_id: None,
                score: 0.0,
                decision: Decision::Error,
                message,
            });
        }
        if self.success.is_none() {
            return Err("missing field `success`".into());
        }

        let decision: Decision = self
            .decision
            .ok_or("missing field `decision`")?
            .parse()?;
        let score = self.score.ok_or("missing field `score`")?;
        if !score.is_finite() {
            return Err(format!("non-finite score {score}"));
        }

        let matched = self.matched.unwrap_or(decision == Decision::Match);
        if matched != (decision == Decision::Match) {
            return Err(format!(
                "inconsistent payload: match={matched} with decision {decision}"
            ));
        }

        let identity_id = match self.predicted_student_id {
            Value::Null => None,
            Value::String(s) if s.is_empty() => None,
            Value::String(s) => Some(s),
            Value::Number(n) => Some(n.to_string()),
            other => return Err(format!("invalid predicted_student_id {other}")),
        };

        Ok(BackendVerification {
            matched,
            identity_id,
            score: score as f32,
            decision,
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verify(json: &str) -> Result<BackendVerification, String> {
        serde_json::from_str::<VerifyResponse>(json)
            .unwrap()
            .into_verification()
    }

    fn train(json: &str) -> Result<TrainingOutcome, String> {
        serde_json::from_str::<TrainResponse>(json)
            .unwrap()
            .into_outcome()
    }

    #[test]
    fn decision_text_form() {
        assert_eq!(Decision::NoMatch.to_string(), "no_match");
        assert_eq!("match".parse::<Decision>().unwrap(), Decision::Match);
        assert!("maybe".parse::<Decision>().is_err());
        assert_eq!(
            serde_json::to_string(&Decision::NoMatch).unwrap(),
            "\"no_match\""
        );
    }

    #[test]
    fn verify_numeric_identity_is_stringified() {
        let v = verify(
            r#"{"success":true,"match":true,"predicted_student_id":42,"score":0.91,"decision":"match","message":"ok"}"#,
        )
        .unwrap();
        assert!(v.matched);
        assert_eq!(v.identity_id.as_deref(), Some("42"));
        assert_eq!(v.decision, Decision::Match);
    }

    #[test]
    fn verify_match_defaults_from_decision() {
        let v = verify(r#"{"success":true,"score":0.2,"decision":"no_match"}"#).unwrap();
        assert!(!v.matched);
        assert_eq!(v.identity_id, None);
    }

    #[test]
    fn verify_rejects_malformed() {
        assert!(verify(r#"{"success":true,"score":0.2}"#).is_err());
        assert!(verify(r#"{"success":true,"decision":"match"}"#).is_err());
        assert!(verify(r#"{"success":true,"score":0.2,"decision":"perhaps"}"#).is_err());
        assert!(verify(r#"{"score":0.2,"decision":"match"}"#).is_err());
        assert!(
            verify(r#"{"success":true,"match":true,"score":0.2,"decision":"no_match"}"#).is_err()
        );
        assert!(
            verify(r#"{"success":true,"score":0.9,"decision":"match","predicted_student_id":[1]}"#)
                .is_err()
        );
    }

    #[test]
    fn verify_backend_failure_is_error_decision() {
        let v = verify(r#"{"success":false,"message":"no profiles"}"#).unwrap();
        assert_eq!(v.decision, Decision::Error);
        assert_eq!(v.message, "no profiles");
    }

    #[test]
    fn train_success() {
        let t = train(
            r#"{"success":true,"message":"trained","profile":{"student_id":"42","status":"ready","embedding_centroid":[0.1,0.2],"num_samples":5,"threshold":0.75,"last_trained_at":"2026-01-01T00:00:00Z","error_message":null}}"#,
        )
        .unwrap();
        assert!(t.success);
        assert_eq!(t.sample_count, 5);
        assert_eq!(t.threshold, Some(0.75));
        assert_eq!(t.centroid, Some(vec![0.1, 0.2]));
    }

    #[test]
    fn train_failure_prefers_profile_error() {
        let t = train(
            r#"{"success":false,"message":"failed","profile":{"error_message":"need 3 samples"}}"#,
        )
        .unwrap();
        assert!(!t.success);
        assert_eq!(t.error.as_deref(), Some("need 3 samples"));

        let t = train(r#"{"success":false}"#).unwrap();
        assert_eq!(t.error.as_deref(), Some("training failed"));
    }

    #[test]
    fn train_rejects_malformed() {
        assert!(train(r#"{"message":"?"}"#).is_err());
        assert!(train(r#"{"success":true}"#).is_err());
        assert!(train(r#"{"success":true,"profile":{}}"#).is_err());
        assert!(train(r#"{"success":true,"profile":{"num_samples":3,"threshold":1.5}}"#).is_err());
    }
}
