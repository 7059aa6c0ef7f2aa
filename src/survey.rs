//! The risk questionnaire: question catalog and the step-by-step wizard.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use anyhow::Context;
use tracing::debug;

use crate::error::WizardError;
use crate::models::PredictionRequest;
use crate::risk;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum QuestionId {
    Sex,
    Age,
    Height,
    Weight,
    HighBp,
    HighChol,
    Stroke,
    DiffWalk,
    GenHlth,
    PhysHlth,
    PhysActivity,
    Smoker,
    Fruits,
    Veggies,
    HvyAlcoholConsump,
    MentHlth,
}

impl QuestionId {
    /// Name used by the prediction service and in answer files.
    pub fn key(self) -> &'static str {
        match self {
            Self::Sex => "Sex",
            Self::Age => "Age",
            Self::Height => "Height",
            Self::Weight => "Weight",
            Self::HighBp => "HighBP",
            Self::HighChol => "HighChol",
            Self::Stroke => "Stroke",
            Self::DiffWalk => "DiffWalk",
            Self::GenHlth => "GenHlth",
            Self::PhysHlth => "PhysHlth",
            Self::PhysActivity => "PhysActivity",
            Self::Smoker => "Smoker",
            Self::Fruits => "Fruits",
            Self::Veggies => "Veggies",
            Self::HvyAlcoholConsump => "HvyAlcoholConsump",
            Self::MentHlth => "MentHlth",
        }
    }
}

impl fmt::Display for QuestionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for QuestionId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        STEPS
            .iter()
            .flat_map(|step| step.questions)
            .map(|question| question.id)
            .find(|id| id.key().eq_ignore_ascii_case(wanted))
            .with_context(|| format!("unknown question {wanted:?}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Choice {
    pub label: &'static str,
    pub value: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum QuestionKind {
    Choice(&'static [Choice]),
    /// Bounds are shown to the user, not enforced.
    Numeric {
        min: Option<f64>,
        max: Option<f64>,
        unit: Option<&'static str>,
        integer: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Question {
    pub id: QuestionId,
    pub text: &'static str,
    pub kind: QuestionKind,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Step {
    pub label: &'static str,
    pub title: &'static str,
    pub description: Option<&'static str>,
    pub questions: &'static [Question],
}

const fn choice(label: &'static str, value: &'static str) -> Choice {
    Choice { label, value }
}

const YES_NO: &[Choice] = &[choice("Yes", "1"), choice("No", "0")];

const SEX: &[Choice] = &[choice("Female", "0"), choice("Male", "1")];

const AGE_BANDS: &[Choice] = &[
    choice("18-24", "1"),
    choice("25-29", "2"),
    choice("30-34", "3"),
    choice("35-39", "4"),
    choice("40-44", "5"),
    choice("45-49", "6"),
    choice("50-54", "7"),
    choice("55-59", "8"),
    choice("60-64", "9"),
    choice("65-69", "10"),
    choice("70-74", "11"),
    choice("75-79", "12"),
    choice("80 or older", "13"),
];

const GENERAL_HEALTH: &[Choice] = &[
    choice("Very poor", "1"),
    choice("Poor", "2"),
    choice("Fair", "3"),
    choice("Good", "4"),
    choice("Excellent", "5"),
];

const DAYS_IN_MONTH: QuestionKind = QuestionKind::Numeric {
    min: Some(0.0),
    max: Some(30.0),
    unit: Some("days"),
    integer: true,
};

pub const STEPS: &[Step] = &[
    Step {
        label: "About you",
        title: "Basic information",
        description: Some("Fill in the basics."),
        questions: &[
            Question {
                id: QuestionId::Sex,
                text: "What is your sex?",
                kind: QuestionKind::Choice(SEX),
            },
            Question {
                id: QuestionId::Age,
                text: "Pick your age range",
                kind: QuestionKind::Choice(AGE_BANDS),
            },
            Question {
                id: QuestionId::Height,
                text: "How tall are you?",
                kind: QuestionKind::Numeric {
                    min: Some(100.0),
                    max: Some(250.0),
                    unit: Some("cm"),
                    integer: false,
                },
            },
            Question {
                id: QuestionId::Weight,
                text: "How much do you weigh?",
                kind: QuestionKind::Numeric {
                    min: Some(30.0),
                    max: Some(300.0),
                    unit: Some("kg"),
                    integer: false,
                },
            },
        ],
    },
    Step {
        label: "Current health",
        title: "Your current health",
        description: None,
        questions: &[
            Question {
                id: QuestionId::HighBp,
                text: "Have you recently been told your blood pressure is high?",
                kind: QuestionKind::Choice(YES_NO),
            },
            Question {
                id: QuestionId::HighChol,
                text: "Have you recently been told your cholesterol is high?",
                kind: QuestionKind::Choice(YES_NO),
            },
            Question {
                id: QuestionId::Stroke,
                text: "Have you ever had a stroke?",
                kind: QuestionKind::Choice(YES_NO),
            },
            Question {
                id: QuestionId::DiffWalk,
                text: "Do you have serious difficulty walking or climbing stairs?",
                kind: QuestionKind::Choice(YES_NO),
            },
            Question {
                id: QuestionId::GenHlth,
                text: "How would you rate your general health?",
                kind: QuestionKind::Choice(GENERAL_HEALTH),
            },
            Question {
                id: QuestionId::PhysHlth,
                text: "In the past 30 days, on how many days was your physical health not good?",
                kind: DAYS_IN_MONTH,
            },
        ],
    },
    Step {
        label: "Habits",
        title: "Your daily habits",
        description: None,
        questions: &[
            Question {
                id: QuestionId::PhysActivity,
                text: "Have you been physically active in the past 30 days?",
                kind: QuestionKind::Choice(YES_NO),
            },
            Question {
                id: QuestionId::Smoker,
                text: "Do you smoke cigarettes?",
                kind: QuestionKind::Choice(YES_NO),
            },
            Question {
                id: QuestionId::Fruits,
                text: "Do you eat at least one piece of fruit a day?",
                kind: QuestionKind::Choice(YES_NO),
            },
            Question {
                id: QuestionId::Veggies,
                text: "Do you eat vegetables at least once a day?",
                kind: QuestionKind::Choice(YES_NO),
            },
            Question {
                id: QuestionId::HvyAlcoholConsump,
                text: "Do you drink heavily (more than 14 drinks a week for men, 7 for women)?",
                kind: QuestionKind::Choice(YES_NO),
            },
            Question {
                id: QuestionId::MentHlth,
                text: "In the past 30 days, on how many days was your mental health not good?",
                kind: DAYS_IN_MONTH,
            },
        ],
    },
];

pub fn question(id: QuestionId) -> &'static Question {
    STEPS
        .iter()
        .flat_map(|step| step.questions)
        .find(|question| question.id == id)
        .unwrap_or_else(|| unreachable!("{id} is missing from the catalog"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmissionTicket(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WizardPhase {
    Editing,
    Submitting(SubmissionTicket),
    Submitted,
}

#[derive(Debug, Clone)]
pub struct Wizard {
    step: usize,
    answers: BTreeMap<QuestionId, String>,
    phase: WizardPhase,
    generation: u64,
    last_error: Option<String>,
}

impl Default for Wizard {
    fn default() -> Self {
        Self::new()
    }
}

impl Wizard {
    pub fn new() -> Self {
        Self {
            step: 0,
            answers: BTreeMap::new(),
            phase: WizardPhase::Editing,
            generation: 0,
            last_error: None,
        }
    }

    pub fn step_index(&self) -> usize {
        self.step
    }

    pub fn step_count(&self) -> usize {
        STEPS.len()
    }

    pub fn current_step(&self) -> &'static Step {
        &STEPS[self.step]
    }

    pub fn is_first_step(&self) -> bool {
        self.step == 0
    }

    pub fn is_last_step(&self) -> bool {
        self.step + 1 == STEPS.len()
    }

    pub fn phase(&self) -> WizardPhase {
        self.phase
    }

    pub fn answer(&self, id: QuestionId) -> Option<&str> {
        self.answers.get(&id).map(String::as_str)
    }

    /// Error of the last failed submission, kept until the next attempt.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    fn ensure_idle(&self) -> Result<(), WizardError> {
        match self.phase {
            WizardPhase::Submitting(_) => Err(WizardError::SubmissionInFlight),
            WizardPhase::Editing | WizardPhase::Submitted => Ok(()),
        }
    }

    /// Records one answer. Blank input clears the answer.
    pub fn set_answer(&mut self, id: QuestionId, value: &str) -> Result<(), WizardError> {
        self.ensure_idle()?;
        let value = value.trim();
        if value.is_empty() {
            self.answers.remove(&id);
            return Ok(());
        }

        match question(id).kind {
            QuestionKind::Choice(choices) => {
                if !choices.iter().any(|choice| choice.value == value) {
                    return Err(WizardError::UnknownOption {
                        question: id,
                        value: value.to_string(),
                    });
                }
            }
            QuestionKind::Numeric { integer, .. } => {
                parse_number(id, value, integer)?;
            }
        }

        self.answers.insert(id, value.to_string());
        self.phase = WizardPhase::Editing;
        Ok(())
    }

    /// Every question of the current step has an answer.
    pub fn is_step_complete(&self) -> bool {
        self.current_step()
            .questions
            .iter()
            .all(|question| self.answers.contains_key(&question.id))
    }

    /// Whether the forward control (`next` or `submit`) is enabled.
    pub fn can_advance(&self) -> bool {
        self.ensure_idle().is_ok() && self.is_step_complete()
    }

    pub fn next(&mut self) -> Result<(), WizardError> {
        self.ensure_idle()?;
        if self.is_last_step() {
            return Err(WizardError::AtLastStep);
        }
        if !self.is_step_complete() {
            return Err(WizardError::StepIncomplete);
        }
        self.step += 1;
        Ok(())
    }

    pub fn back(&mut self) -> Result<(), WizardError> {
        self.ensure_idle()?;
        if self.is_first_step() {
            return Err(WizardError::AtFirstStep);
        }
        self.step -= 1;
        Ok(())
    }

    /// Freezes the answers into a request and enters the submitting state.
    ///
    /// Until [`Wizard::finish_submit`] is called with the returned ticket,
    /// edits, navigation and further submissions are refused.
    pub fn begin_submit(&mut self) -> Result<(SubmissionTicket, PredictionRequest), WizardError> {
        self.ensure_idle()?;
        if !self.is_last_step() {
            return Err(WizardError::NotLastStep);
        }
        if !self.is_step_complete() {
            return Err(WizardError::StepIncomplete);
        }
        let request = self.build_request()?;

        self.generation += 1;
        let ticket = SubmissionTicket(self.generation);
        self.phase = WizardPhase::Submitting(ticket);
        self.last_error = None;
        Ok((ticket, request))
    }

    /// Applies the outcome of a submission.
    ///
    /// Returns `false` when the ticket is stale (the wizard was reset while
    /// the request was in flight) and the outcome was dropped. On failure the
    /// wizard stays on the last step with every answer intact.
    pub fn finish_submit(
        &mut self,
        ticket: SubmissionTicket,
        outcome: Result<(), String>,
    ) -> bool {
        if self.phase != WizardPhase::Submitting(ticket) {
            debug!(?ticket, "dropping outcome of a stale submission");
            return false;
        }
        match outcome {
            Ok(()) => self.phase = WizardPhase::Submitted,
            Err(message) => {
                self.phase = WizardPhase::Editing;
                self.last_error = Some(message);
            }
        }
        true
    }

    /// Starts over. Outstanding tickets become stale.
    pub fn reset(&mut self) {
        let generation = self.generation + 1;
        *self = Self::new();
        self.generation = generation;
    }

    fn choice(&self, id: QuestionId) -> Result<u8, WizardError> {
        let raw = self.answer(id).unwrap_or_default();
        raw.parse().map_err(|_| WizardError::UnknownOption {
            question: id,
            value: raw.to_string(),
        })
    }

    fn flag(&self, id: QuestionId) -> Result<bool, WizardError> {
        Ok(self.choice(id)? == 1)
    }

    fn number(&self, id: QuestionId) -> Result<f64, WizardError> {
        parse_number(id, self.answer(id).unwrap_or_default(), false)
    }

    fn days(&self, id: QuestionId) -> Result<u32, WizardError> {
        let days = parse_number(id, self.answer(id).unwrap_or_default(), true)?;
        Ok(days as u32)
    }

    fn build_request(&self) -> Result<PredictionRequest, WizardError> {
        let height = self.number(QuestionId::Height)?;
        let weight = self.number(QuestionId::Weight)?;

        Ok(PredictionRequest {
            sex: self.choice(QuestionId::Sex)?,
            age: self.choice(QuestionId::Age)?,
            height,
            weight,
            bmi: risk::round_one_decimal(risk::bmi(height, weight)),
            high_bp: self.flag(QuestionId::HighBp)?,
            high_chol: self.flag(QuestionId::HighChol)?,
            stroke: self.flag(QuestionId::Stroke)?,
            diff_walk: self.flag(QuestionId::DiffWalk)?,
            gen_hlth: self.choice(QuestionId::GenHlth)?,
            phys_hlth: self.days(QuestionId::PhysHlth)?,
            phys_activity: self.flag(QuestionId::PhysActivity)?,
            smoker: self.flag(QuestionId::Smoker)?,
            fruits: self.flag(QuestionId::Fruits)?,
            veggies: self.flag(QuestionId::Veggies)?,
            hvy_alcohol_consump: self.flag(QuestionId::HvyAlcoholConsump)?,
            ment_hlth: self.days(QuestionId::MentHlth)?,
        })
    }
}

/// `integer` marks a count: whole and not negative.
fn parse_number(id: QuestionId, raw: &str, integer: bool) -> Result<f64, WizardError> {
    let invalid = || WizardError::InvalidNumber {
        question: id,
        value: raw.to_string(),
    };
    let normalized = raw.trim().replace(',', ".");
    let value: f64 = normalized.parse().map_err(|_| invalid())?;
    if !value.is_finite() || (integer && (value.fract() != 0.0 || value < 0.0)) {
        return Err(invalid());
    }
    Ok(value)
}

/// Reads `question,value` rows from a CSV answer file.
pub fn read_answers_csv(path: &Path) -> anyhow::Result<Vec<(QuestionId, String)>> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        question: String,
        value: String,
    }

    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mut answers = Vec::new();

    for (line, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result.with_context(|| format!("bad row {} in {}", line + 2, path.display()))?;
        let id: QuestionId = row.question.parse()?;
        answers.push((id, row.value));
    }

    Ok(answers)
}

/// Fills the wizard from a full answer set and walks it to the last step.
pub fn apply_answers(wizard: &mut Wizard, answers: &[(QuestionId, String)]) -> anyhow::Result<()> {
    for (id, value) in answers {
        wizard
            .set_answer(*id, value)
            .with_context(|| format!("invalid answer for {id}"))?;
    }
    while !wizard.is_last_step() {
        let step = wizard.current_step().label;
        wizard
            .next()
            .with_context(|| format!("answers for step {step:?} are incomplete"))?;
    }
    Ok(())
}
