use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};

use crate::error::UnknownModel;

/// Values a buggy writer may have stored in place of a missing token.
const TOKEN_SENTINELS: [&str; 2] = ["null", "undefined"];

/// An opaque bearer credential. Absence is `None`, never a sentinel string.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken(String);

impl BearerToken {
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || TOKEN_SENTINELS.contains(&trimmed) {
            return None;
        }
        Some(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BearerToken(..)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserId {
    Number(i64),
    Text(String),
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(id) => write!(f, "{id}"),
            Self::Text(id) => f.write_str(id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

/// Most endpoints wrap their payload as `{"msg": ..., "data": ...}`.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope<T> {
    #[serde(default)]
    pub msg: Option<String>,
    pub data: T,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageResponse {
    #[serde(default)]
    pub msg: Option<String>,
}

/// Payload of a successful `/login`.
///
/// The backend has shipped both a nested `user` object and flat
/// `user_id`/`email` fields; either is accepted.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginData {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub user: Option<User>,
    #[serde(default)]
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub email: Option<String>,
}

impl LoginData {
    pub fn user(&self) -> Option<User> {
        if let Some(user) = &self.user {
            return Some(user.clone());
        }
        match (&self.user_id, &self.email) {
            (Some(id), Some(email)) => Some(User {
                id: id.clone(),
                email: email.clone(),
            }),
            _ => None,
        }
    }
}

fn as_flag<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u8(u8::from(*value))
}

/// Flattened, fully numeric record sent to `/predict`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionRequest {
    #[serde(rename = "Sex")]
    pub sex: u8,
    #[serde(rename = "Age")]
    pub age: u8,
    #[serde(rename = "Height")]
    pub height: f64,
    #[serde(rename = "Weight")]
    pub weight: f64,
    #[serde(rename = "BMI")]
    pub bmi: f64,
    #[serde(rename = "HighBP", serialize_with = "as_flag")]
    pub high_bp: bool,
    #[serde(rename = "HighChol", serialize_with = "as_flag")]
    pub high_chol: bool,
    #[serde(rename = "Stroke", serialize_with = "as_flag")]
    pub stroke: bool,
    #[serde(rename = "DiffWalk", serialize_with = "as_flag")]
    pub diff_walk: bool,
    #[serde(rename = "GenHlth")]
    pub gen_hlth: u8,
    #[serde(rename = "PhysHlth")]
    pub phys_hlth: u32,
    #[serde(rename = "PhysActivity", serialize_with = "as_flag")]
    pub phys_activity: bool,
    #[serde(rename = "Smoker", serialize_with = "as_flag")]
    pub smoker: bool,
    #[serde(rename = "Fruits", serialize_with = "as_flag")]
    pub fruits: bool,
    #[serde(rename = "Veggies", serialize_with = "as_flag")]
    pub veggies: bool,
    #[serde(rename = "HvyAlcoholConsump", serialize_with = "as_flag")]
    pub hvy_alcohol_consump: bool,
    #[serde(rename = "MentHlth")]
    pub ment_hlth: u32,
}

/// The classifiers the prediction service runs side by side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ModelKind {
    Logistic,
    RandomForest,
    GradientBoost,
}

impl ModelKind {
    pub const ALL: [ModelKind; 3] = [Self::Logistic, Self::RandomForest, Self::GradientBoost];

    /// Order in which a headline prediction is picked.
    pub const PRECEDENCE: [ModelKind; 3] =
        [Self::RandomForest, Self::Logistic, Self::GradientBoost];

    pub fn key(self) -> &'static str {
        match self {
            Self::Logistic => "logistic",
            Self::RandomForest => "random_forest",
            Self::GradientBoost => "gradient_boost",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.key() == key)
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::Logistic => "Logistic Regression",
            Self::RandomForest => "Random Forest",
            Self::GradientBoost => "Gradient Boosting",
        }
    }

}

impl FromStr for ModelKind {
    type Err = UnknownModel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_key(s.trim()).ok_or_else(|| UnknownModel(s.trim().to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
pub struct ClassProbabilities {
    #[serde(default)]
    pub class_0: f64,
    #[serde(default)]
    pub class_1: f64,
    #[serde(default)]
    pub class_2: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ModelPrediction {
    pub prediction: u8,
    pub confidence: f64,
    #[serde(default)]
    pub probabilities: ClassProbabilities,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct ModelPredictions {
    #[serde(default)]
    pub logistic: Option<ModelPrediction>,
    #[serde(default)]
    pub random_forest: Option<ModelPrediction>,
    #[serde(default)]
    pub gradient_boost: Option<ModelPrediction>,
    #[serde(default)]
    pub llm_analysis: Option<String>,
    #[serde(default)]
    pub shap_factors: Vec<String>,
}

impl ModelPredictions {
    pub fn get(&self, kind: ModelKind) -> Option<&ModelPrediction> {
        match kind {
            ModelKind::Logistic => self.logistic.as_ref(),
            ModelKind::RandomForest => self.random_forest.as_ref(),
            ModelKind::GradientBoost => self.gradient_boost.as_ref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EnsembleResponse {
    pub predictions: ModelPredictions,
    #[serde(default)]
    pub is_saved: bool,
    #[serde(default)]
    pub msg: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SingleResponse {
    #[serde(default)]
    pub msg: Option<String>,
    pub result: u8,
    pub probability: f64,
}

/// What `/predict` returns. Handed to rendering exactly as received.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum PredictionResponse {
    Ensemble(EnsembleResponse),
    Single(SingleResponse),
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ModelScore {
    #[serde(default)]
    pub diabetes_risk: Option<f64>,
    #[serde(default)]
    pub probabilities: ClassProbabilities,
}

/// The part of a stored request the history view shows.
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
pub struct HistoryInput {
    #[serde(rename = "BMI", default)]
    pub bmi: Option<f64>,
    #[serde(rename = "Age", default)]
    pub age: Option<f64>,
    #[serde(rename = "HighBP", default)]
    pub high_bp: Option<f64>,
    #[serde(rename = "HighChol", default)]
    pub high_chol: Option<f64>,
    #[serde(rename = "Smoker", default)]
    pub smoker: Option<f64>,
    #[serde(rename = "PhysActivity", default)]
    pub phys_activity: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HistoryRecord {
    pub id: i64,
    pub created_at: String,
    pub result: u8,
    #[serde(default)]
    pub result_label: Option<String>,
    pub probability: f64,
    #[serde(default)]
    pub llm_feedback: Option<String>,
    #[serde(default)]
    pub input_data: HistoryInput,
    #[serde(default)]
    pub model_scores: Option<BTreeMap<String, Option<ModelScore>>>,
}

impl HistoryRecord {
    /// Parses `created_at`, accepting RFC 3339 or a naive timestamp taken as UTC.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(&self.created_at) {
            return Some(parsed.with_timezone(&Utc));
        }
        ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%a, %d %b %Y %H:%M:%S GMT"]
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(&self.created_at, format).ok())
            .map(|naive| naive.and_utc())
    }
}

/// Health fields the account page lets a user keep between surveys.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HealthProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sex: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_test_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_risk_score: Option<f64>,
}

impl HealthProfile {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
