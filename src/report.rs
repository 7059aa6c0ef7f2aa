use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::models::{HealthProfile, HistoryRecord, ModelKind, ModelPrediction, PredictionResponse};
use crate::persona::{self, Persona};
use crate::risk::{self, ProfileSummary, RiskBand};

const DISCLAIMER: &str = "This test is informational and is not a medical diagnosis. \
Please see a doctor for professional blood tests.";

#[derive(Debug, Clone, PartialEq)]
pub struct BandSummary {
    pub band: RiskBand,
    pub count: usize,
    pub avg_probability: f64,
}

pub fn summarize_by_band(records: &[HistoryRecord]) -> Vec<BandSummary> {
    let mut totals: Vec<(RiskBand, usize, f64)> = Vec::new();

    for record in records {
        let band = risk::risk_band(record.probability);
        match totals.iter_mut().find(|(existing, _, _)| *existing == band) {
            Some(entry) => {
                entry.1 += 1;
                entry.2 += record.probability;
            }
            None => totals.push((band, 1, record.probability)),
        }
    }

    let mut summaries: Vec<BandSummary> = totals
        .into_iter()
        .map(|(band, count, total)| BandSummary {
            band,
            count,
            avg_probability: if count == 0 {
                0.0
            } else {
                total / count as f64
            },
        })
        .collect();

    summaries.sort_by(|a, b| b.count.cmp(&a.count));
    summaries
}

fn write_model_card(output: &mut String, kind: ModelKind, prediction: &ModelPrediction) {
    let probabilities = &prediction.probabilities;
    let _ = writeln!(
        output,
        "- {}: {} (confidence {:.1}%)",
        kind.display_name(),
        risk::class_label(prediction.prediction),
        prediction.confidence
    );
    let _ = writeln!(
        output,
        "  {} {:.1}% | {} {:.1}% | {} {:.1}%",
        risk::class_label(0),
        probabilities.class_0,
        risk::class_label(1),
        probabilities.class_1,
        risk::class_label(2),
        probabilities.class_2
    );
}

/// Text shown after a survey submission.
pub fn render_prediction(response: &PredictionResponse) -> String {
    let mut output = String::new();

    match response {
        PredictionResponse::Ensemble(ensemble) => {
            let predictions = &ensemble.predictions;
            let _ = writeln!(output, "# Your result");
            if ensemble.is_saved {
                let _ = writeln!(output, "Saved to your history.");
            }

            if let Some((kind, main)) = risk::headline(predictions) {
                let _ = writeln!(output);
                let _ = writeln!(
                    output,
                    "{} ({:.1}% confidence, {})",
                    risk::class_label(main.prediction),
                    main.confidence,
                    kind.display_name()
                );
            }

            let _ = writeln!(output);
            let _ = writeln!(output, "## Models");
            for kind in ModelKind::ALL {
                if let Some(prediction) = predictions.get(kind) {
                    write_model_card(&mut output, kind, prediction);
                }
            }

            if !predictions.shap_factors.is_empty() {
                let _ = writeln!(output);
                let _ = writeln!(output, "## What drove the result");
                for (index, factor) in predictions.shap_factors.iter().enumerate() {
                    let _ = writeln!(output, "{}. {}", index + 1, factor);
                }
            }

            if let Some(analysis) = &predictions.llm_analysis {
                let _ = writeln!(output);
                let _ = writeln!(output, "## Analysis");
                for line in analysis.lines().filter(|line| !line.trim().is_empty()) {
                    let _ = writeln!(output, "{}", line.trim());
                }
            }

            if !ensemble.is_saved {
                let _ = writeln!(output);
                let _ = writeln!(output, "Register and log in to keep your results.");
            }
        }
        PredictionResponse::Single(single) => {
            let _ = writeln!(output, "# Your result");
            let _ = writeln!(output);
            let _ = writeln!(
                output,
                "{} ({:.1}% confidence)",
                risk::class_label(single.result),
                single.probability
            );
        }
    }

    if risk::overall_class(response).is_some_and(|class| class > 0) {
        let _ = writeln!(output);
        let _ = writeln!(output, "{DISCLAIMER}");
    }

    output
}

fn format_timestamp(record: &HistoryRecord) -> String {
    record
        .timestamp()
        .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| record.created_at.clone())
}

/// One line per record, newest first as received.
pub fn render_history(records: &[HistoryRecord]) -> String {
    let mut output = String::new();

    if records.is_empty() {
        let _ = writeln!(output, "No saved results yet. Run `survey` to take the test.");
        return output;
    }

    let noun = if records.len() == 1 { "test" } else { "tests" };
    let _ = writeln!(output, "{} {noun} in total", records.len());
    for record in records {
        let label = record
            .result_label
            .as_deref()
            .unwrap_or_else(|| risk::class_label(record.result));
        let _ = writeln!(
            output,
            "#{} {} {} {:.1}% ({})",
            record.id,
            format_timestamp(record),
            label,
            record.probability,
            risk::risk_band(record.probability).label()
        );
    }
    output
}

pub fn build_history_report(
    email: &str,
    generated_at: DateTime<Utc>,
    records: &[HistoryRecord],
) -> String {
    let summaries = summarize_by_band(records);
    let mut output = String::new();

    let _ = writeln!(output, "# Diabetes Risk History");
    let _ = writeln!(
        output,
        "Generated for {} on {}",
        email,
        generated_at.format("%Y-%m-%d %H:%M UTC")
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Risk Mix");

    if summaries.is_empty() {
        let _ = writeln!(output, "No assessments recorded.");
    } else {
        for summary in summaries.iter() {
            let _ = writeln!(
                output,
                "- {}: {} assessments (avg probability {:.1}%)",
                summary.band.label(),
                summary.count,
                summary.avg_probability
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Assessments");

    if records.is_empty() {
        let _ = writeln!(output, "No assessments recorded.");
    } else {
        for record in records {
            let _ = writeln!(
                output,
                "- {}: {} at {:.1}%",
                format_timestamp(record),
                risk::class_label(record.result),
                record.probability
            );
            let input = &record.input_data;
            if let Some(bmi) = input.bmi {
                let _ = writeln!(output, "  - BMI {bmi:.1}");
            }
            if let Some(scores) = &record.model_scores {
                for (name, score) in scores {
                    let Some(score) = score else { continue };
                    let display = ModelKind::from_key(name)
                        .map(ModelKind::display_name)
                        .unwrap_or(name.as_str());
                    let value = score
                        .diabetes_risk
                        .unwrap_or_else(|| risk::diabetes_risk(&score.probabilities));
                    let _ = writeln!(output, "  - {display}: {value:.1}%");
                }
            }
        }
    }

    let latest_feedback = records.iter().find_map(|record| record.llm_feedback.as_deref());
    if let Some(feedback) = latest_feedback {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Latest Feedback");
        for line in feedback.lines().filter(|line| !line.trim().is_empty()) {
            let _ = writeln!(output, "{}", line.trim());
        }
    }

    output
}

pub fn render_profile(profile: &HealthProfile, summary: &ProfileSummary) -> String {
    let mut output = String::new();

    if profile.is_empty() {
        let _ = writeln!(output, "No health data saved yet. Use `profile set` to add it.");
        return output;
    }

    let _ = writeln!(output, "## Your data");
    if let Some(age) = profile.age {
        let _ = writeln!(output, "- Age: {age}");
    }
    if let Some(sex) = profile.sex {
        let _ = writeln!(output, "- Sex: {}", if sex == 1 { "male" } else { "female" });
    }
    if let Some(height) = profile.height {
        let _ = writeln!(output, "- Height: {height} cm");
    }
    if let Some(weight) = profile.weight {
        let _ = writeln!(output, "- Weight: {weight} kg");
    }

    if let Some(bmi) = summary.bmi {
        let _ = writeln!(output);
        let _ = writeln!(output, "## BMI {bmi:.1}");
        if summary.overweight {
            let _ = writeln!(output, "Your BMI is in the overweight or obese range.");
        } else {
            let _ = writeln!(output, "Your weight is in the normal range. Keep it up!");
        }
    }

    if let (Some(score), Some(band)) = (profile.last_risk_score, summary.band) {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Diabetes risk");
        let _ = writeln!(output, "{} ({score:.0}%)", band.label());
    }

    if let Some(days) = summary.days_since_test {
        let _ = writeln!(output);
        let _ = writeln!(output, "Last test {days} days ago.");
    }

    output
}

pub fn render_models() -> String {
    let mut output = String::new();
    for kind in ModelKind::ALL {
        let persona = persona::persona(kind);
        let _ = writeln!(
            output,
            "{}, {} ({})",
            persona.name,
            persona.model(),
            kind.key()
        );
        let _ = writeln!(output, "  {}", persona.title);
    }
    let _ = writeln!(output);
    let _ = writeln!(output, "Run `risk-client models <KEY>` to meet one of them.");
    output
}

pub fn render_persona(persona: &Persona) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# {}", persona.name);
    let _ = writeln!(output, "{} - {}", persona.model(), persona.title);
    let _ = writeln!(output);
    let _ = writeln!(output, "{}", persona.description);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Strengths");
    for strength in persona.strengths {
        let _ = writeln!(output, "- {strength}");
    }
    let _ = writeln!(output);
    let _ = writeln!(output, "## When to listen");
    let _ = writeln!(output, "{}", persona.when_to_listen);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Limitations");
    let _ = writeln!(output, "{}", persona.limitations);

    output
}
