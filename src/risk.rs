use chrono::NaiveDate;

use crate::models::{
    ClassProbabilities, HealthProfile, ModelKind, ModelPrediction, ModelPredictions,
    PredictionResponse,
};

pub const OVERWEIGHT_BMI: f64 = 25.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskBand {
    Low,
    Medium,
    High,
}

impl RiskBand {
    pub fn label(self) -> &'static str {
        match self {
            Self::Low => "Low risk",
            Self::Medium => "Medium risk",
            Self::High => "High risk",
        }
    }
}

/// Body mass index from height in centimetres and weight in kilograms.
///
/// Zero when the height is missing or not positive.
pub fn bmi(height_cm: f64, weight_kg: f64) -> f64 {
    if height_cm.is_nan() || height_cm <= 0.0 || !weight_kg.is_finite() {
        return 0.0;
    }
    let height_m = height_cm / 100.0;
    weight_kg / (height_m * height_m)
}

pub fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

pub fn risk_band(percentage: f64) -> RiskBand {
    if percentage < 15.0 {
        RiskBand::Low
    } else if percentage < 35.0 {
        RiskBand::Medium
    } else {
        RiskBand::High
    }
}

pub fn class_label(class: u8) -> &'static str {
    match class {
        0 => "No diabetes",
        1 => "Prediabetes",
        2 => "Diabetes",
        _ => "Unknown",
    }
}

/// Chance of prediabetes or diabetes. The service reports class
/// probabilities in percent.
pub fn diabetes_risk(probabilities: &ClassProbabilities) -> f64 {
    probabilities.class_1 + probabilities.class_2
}

/// The prediction shown first: random forest, then logistic, then boosting.
pub fn headline(predictions: &ModelPredictions) -> Option<(ModelKind, &ModelPrediction)> {
    ModelKind::PRECEDENCE
        .into_iter()
        .find_map(|kind| predictions.get(kind).map(|prediction| (kind, prediction)))
}

/// Class the response leads with.
pub fn overall_class(response: &PredictionResponse) -> Option<u8> {
    match response {
        PredictionResponse::Ensemble(ensemble) => {
            headline(&ensemble.predictions).map(|(_, prediction)| prediction.prediction)
        }
        PredictionResponse::Single(single) => Some(single.result),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProfileSummary {
    pub bmi: Option<f64>,
    pub overweight: bool,
    pub days_since_test: Option<i64>,
    pub band: Option<RiskBand>,
}

pub fn summarize_profile(profile: &HealthProfile, today: NaiveDate) -> ProfileSummary {
    let bmi = match (profile.height, profile.weight) {
        (Some(height), Some(weight)) if height > 0.0 => {
            Some(round_one_decimal(bmi(height, weight)))
        }
        _ => None,
    };

    ProfileSummary {
        bmi,
        overweight: bmi.is_some_and(|value| value >= OVERWEIGHT_BMI),
        days_since_test: profile
            .last_test_date
            .map(|date| (today - date).num_days().abs()),
        band: profile.last_risk_score.map(risk_band),
    }
}
