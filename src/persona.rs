//! The prediction models introduced as a panel of doctors.

use crate::models::ModelKind;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Persona {
    pub kind: ModelKind,
    pub name: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    pub strengths: &'static [&'static str],
    pub when_to_listen: &'static str,
    pub limitations: &'static str,
}

impl Persona {
    /// Name of the model behind the persona.
    pub fn model(&self) -> &'static str {
        self.kind.display_name()
    }
}

const LOGISTIC: Persona = Persona {
    kind: ModelKind::Logistic,
    name: "Dr. Andrew",
    title: "The voice of reason",
    description: "The doctor who always sticks to proven procedures and the medical textbooks. \
He does not go looking for trouble, because he believes the important signals are always visible \
to the naked eye. His linear approach can miss subtle, non-linear patterns hidden in a patient's data.",
    strengths: &[
        "Keeps results from being overcomplicated.",
        "When a patient's numbers are great, makes sure the \"No diabetes\" column is solidly filled.",
        "The foundation of the team: gives clear, direct answers that can be explained to a patient.",
    ],
    when_to_listen: "When you want a clear answer to \"why is the result what it is?\". If the others \
strongly disagree with him, he may be missing a complex pattern.",
    limitations: "In some cases he does not capture the whole picture. Always compare with the other opinions.",
};

const RANDOM_FOREST: Persona = Persona {
    kind: ModelKind::RandomForest,
    name: "Dr. Yolanda",
    title: "The voice of patience",
    description: "The doctor who never rushes a diagnosis. Her strength is looking at a patient from \
a thousand angles at once and averaging what she sees. When the data is uncertain she spreads her \
answer evenly, which in medicine is a virtue: overconfidence helps nobody.",
    strengths: &[
        "Keeps results stable, with no false hope and no needless alarms.",
        "Her percentages for healthy, prediabetes and diabetes rarely jump around, so she can be trusted.",
        "When the data is uncertain she honestly shows the uncertainty.",
    ],
    when_to_listen: "When a patient's data is incomplete or messy. She does not get lost in it, and her \
caution is a strength.",
    limitations: "Her approach can be very cautious. Sometimes she is too conservative in her conclusions.",
};

const GRADIENT_BOOST: Persona = Persona {
    kind: ModelKind::GradientBoost,
    name: "Dr. Paul",
    title: "The voice of intuition",
    description: "The doctor who stays late over the results because he likes catching subtle patterns. \
He is not better than the rest, just more inquisitive where others see only statistics. His complexity \
has a price: it is harder to explain why he says what he says, but when he is right, he is really right.",
    strengths: &[
        "Pays attention to detail and catches patterns the others can miss.",
        "Can sense risk in someone who looks healthy at first glance but has a specific set of symptoms.",
        "Excellent at spotting very early signs of disease, with unmatched precision in borderline cases.",
    ],
    when_to_listen: "When catching very early signs of disease matters to you. If he alone stands out, \
double-check the result, because he may overstate the risk.",
    limitations: "His results can be hard to interpret. Check his recommendations against the other opinions.",
};

pub static PERSONAS: [Persona; 3] = [LOGISTIC, RANDOM_FOREST, GRADIENT_BOOST];

pub fn persona(kind: ModelKind) -> &'static Persona {
    match kind {
        ModelKind::Logistic => &PERSONAS[0],
        ModelKind::RandomForest => &PERSONAS[1],
        ModelKind::GradientBoost => &PERSONAS[2],
    }
}
