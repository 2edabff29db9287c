//! Deterministic field extraction, scoped by conversation state.
//!
//! Each state owns one [`Extractor`]. Text is only interpreted by the
//! extractor of the current state, so an early "Miraflores" is never read as
//! a name and a date typed during salary talk is never read as a birth date.

use std::collections::HashMap;
use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;

use super::models::{CandidateFacts, ConversationState};
use crate::geo::{district_centroid, GeoPoint};
use crate::models::store::ShiftType;
use crate::text::{contains_phrase, fold, title_case};

/// Turns raw candidate text into the subset of facts it states.
pub trait Extractor: Send + Sync {
    fn extract(&self, text: &str, known: &CandidateFacts) -> CandidateFacts;
}

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b[a-z0-9._%+\-]+@[a-z0-9.\-]+\.[a-z]{2,}\b").expect("valid email regex")
});
static DNI: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{8})\b").expect("valid national id regex"));
static FOREIGN_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:ce|carn[eé]t? de extranjer[ií]a|pasaporte)\W*([a-z0-9]{9,12})\b")
        .expect("valid foreign id regex")
});
static BIRTH_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{1,2})[/.\-](\d{1,2})[/.\-](\d{4})\b").expect("valid date regex")
});
static NAME_INTRO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:me llamo|mi nombre es|soy)\s+([\p{L}']+(?:\s+[\p{L}']+){0,3})")
        .expect("valid name regex")
});
static AMOUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d{1,3}(?:[.,]\d{3})+|\d+)(?:[.,](\d{1,2}))?\s*(k|mil)?\b")
        .expect("valid amount regex")
});
static COORDINATES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(-?\d{1,2}\.\d+)\s*[,;]\s*(-?\d{1,3}\.\d+)").expect("valid coordinates regex")
});
static CHOICE_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{1,2})\b").expect("valid choice regex"));

const NAME_STOPWORDS: &[&str] = &[
    "de", "del", "el", "la", "un", "una", "mayor", "menor", "soy", "me", "mi", "vivo", "hola",
    "buenas", "buenos", "estoy", "tengo", "en", "y", "que", "quiero",
];

// ────────────────────────────────────────────────────────────────────────────
// Yes / no
// ────────────────────────────────────────────────────────────────────────────

const AFFIRMATIVE_IDIOMS: &[&str] = &["no hay problema", "no problem", "sin problema"];
const NEGATIVE: &[&str] = &[
    "no", "nop", "nunca", "rechazo", "negativo", "tampoco", "no acepto", "no puedo",
];
const AFFIRMATIVE: &[&str] = &[
    "si", "sip", "acepto", "aceptar", "ok", "okay", "claro", "dale", "de acuerdo", "correcto",
    "afirmativo", "por supuesto", "bueno", "yes", "listo", "confirmo", "perfecto", "puedo",
];

/// Reads a yes/no answer. Negation wins over affirmation except for idioms
/// such as "no hay problema".
pub fn parse_yes_no(text: &str) -> Option<bool> {
    let folded = fold(text);
    if AFFIRMATIVE_IDIOMS.iter().any(|p| contains_phrase(&folded, p)) {
        return Some(true);
    }
    if NEGATIVE.iter().any(|p| contains_phrase(&folded, p)) {
        return Some(false);
    }
    if AFFIRMATIVE.iter().any(|p| contains_phrase(&folded, p)) {
        return Some(true);
    }
    None
}

// ────────────────────────────────────────────────────────────────────────────
// Per-state extractors
// ────────────────────────────────────────────────────────────────────────────

pub struct TermsExtractor;

impl Extractor for TermsExtractor {
    fn extract(&self, text: &str, _known: &CandidateFacts) -> CandidateFacts {
        CandidateFacts {
            terms_accepted: parse_yes_no(text),
            ..Default::default()
        }
    }
}

/// Name, national ID, e-mail and birth date, in any order, in one or several messages.
pub struct BasicInfoExtractor;

impl BasicInfoExtractor {
    fn name(text: &str, known: &CandidateFacts) -> Option<String> {
        if let Some(caps) = NAME_INTRO.captures(text) {
            let candidate = caps[1].trim();
            let first = fold(candidate.split_whitespace().next().unwrap_or_default());
            if !NAME_STOPWORDS.contains(&first.as_str()) {
                return Some(title_case(candidate));
            }
        }
        if known.name.is_some() {
            return None;
        }
        // A bare segment of 2–4 alphabetic words, e.g. "Ana Torres, 45678912, ana@x.pe".
        text.split([',', ';', '\n'])
            .map(str::trim)
            .find(|segment| {
                let words: Vec<&str> = segment.split_whitespace().collect();
                (2..=4).contains(&words.len())
                    && words
                        .iter()
                        .all(|w| w.chars().all(|c| c.is_alphabetic() || c == '\''))
                    && !NAME_STOPWORDS.contains(&fold(words[0]).as_str())
            })
            .map(title_case)
    }

    fn national_id(text: &str) -> Option<String> {
        // Dates like 15081995 written without separators are not IDs when they parse as dates.
        let without_dates = BIRTH_DATE.replace_all(text, " ");
        if let Some(caps) = FOREIGN_ID.captures(&without_dates) {
            return Some(caps[1].to_uppercase());
        }
        DNI.captures(&without_dates).map(|caps| caps[1].to_string())
    }

    fn birth_date(text: &str) -> Option<NaiveDate> {
        let caps = BIRTH_DATE.captures(text)?;
        let day: u32 = caps[1].parse().ok()?;
        let month: u32 = caps[2].parse().ok()?;
        let year: i32 = caps[3].parse().ok()?;
        NaiveDate::from_ymd_opt(year, month, day)
    }
}

impl Extractor for BasicInfoExtractor {
    fn extract(&self, text: &str, known: &CandidateFacts) -> CandidateFacts {
        let email = EMAIL.find(text).map(|m| m.as_str().to_lowercase());
        // Keep the e-mail's local part from being read as a name.
        let without_email = EMAIL.replace_all(text, " ");
        CandidateFacts {
            email,
            name: Self::name(&without_email, known),
            national_id: Self::national_id(&without_email),
            birth_date: Self::birth_date(&without_email),
            ..Default::default()
        }
    }
}

/// Two yes/no gates: rotating shifts, then weekends. A plain "sí" answers the
/// first gate still open; "ambos" answers both; naming a topic targets it.
pub struct HardFilterExtractor;

impl HardFilterExtractor {
    fn shift_preference(folded: &str) -> Option<ShiftType> {
        const FLEXIBLE: &[&str] = &[
            "flexible", "cualquier horario", "cualquier turno", "rotativo", "rotativos",
            "disponibilidad total", "full disponibilidad",
        ];
        const FIXED: &[&str] = &[
            "turno fijo", "horario fijo", "solo mananas", "solo manana", "solo tardes",
            "solo tarde", "solo noches", "solo noche",
        ];
        if FIXED.iter().any(|p| contains_phrase(folded, p)) {
            Some(ShiftType::Fixed)
        } else if FLEXIBLE.iter().any(|p| contains_phrase(folded, p)) {
            Some(ShiftType::Flexible)
        } else {
            None
        }
    }
}

impl Extractor for HardFilterExtractor {
    fn extract(&self, text: &str, known: &CandidateFacts) -> CandidateFacts {
        let folded = fold(text);
        let mut facts = CandidateFacts {
            shift_preference: Self::shift_preference(&folded),
            ..Default::default()
        };
        let Some(answer) = parse_yes_no(text) else {
            return facts;
        };

        let mentions_weekends = ["fin de semana", "fines de semana", "sabado", "domingo"]
            .iter()
            .any(|p| contains_phrase(&folded, p));
        let mentions_shifts = ["turno", "turnos", "rotativo", "rotativos", "noche", "noches"]
            .iter()
            .any(|p| contains_phrase(&folded, p));
        let both = ["ambos", "ambas", "los dos", "las dos", "todo", "a todo"]
            .iter()
            .any(|p| contains_phrase(&folded, p));

        if both || (mentions_shifts && mentions_weekends) {
            facts.available_rotating_shifts = Some(answer);
            facts.available_weekends = Some(answer);
        } else if mentions_weekends {
            facts.available_weekends = Some(answer);
        } else if mentions_shifts || known.available_rotating_shifts.is_none() {
            facts.available_rotating_shifts = Some(answer);
        } else {
            facts.available_weekends = Some(answer);
        }
        facts
    }
}

pub struct SalaryExtractor;

/// Accepted range for a monthly salary expectation, in local currency.
const SALARY_RANGE: std::ops::RangeInclusive<u32> = 100..=100_000;

pub fn parse_amount(text: &str) -> Option<u32> {
    AMOUNT.captures_iter(text).find_map(|caps| {
        let whole: String = caps[1].chars().filter(char::is_ascii_digit).collect();
        let mut value: f64 = whole.parse().ok()?;
        if let Some(fraction) = caps.get(2) {
            value += format!("0.{}", fraction.as_str()).parse::<f64>().ok()?;
        }
        if caps.get(3).is_some() {
            value *= 1000.0;
        }
        let value = value.round();
        (value >= 0.0 && value <= f64::from(u32::MAX))
            .then_some(value as u32)
            .filter(|v| SALARY_RANGE.contains(v))
    })
}

impl Extractor for SalaryExtractor {
    fn extract(&self, text: &str, _known: &CandidateFacts) -> CandidateFacts {
        CandidateFacts {
            salary_expectation: parse_amount(text),
            ..Default::default()
        }
    }
}

/// Shared coordinates ("-12.12, -77.03") and/or a district name.
pub struct LocationExtractor;

impl LocationExtractor {
    fn coordinates(text: &str) -> Option<GeoPoint> {
        let caps = COORDINATES.captures(text)?;
        let lat: f64 = caps[1].parse().ok()?;
        let lng: f64 = caps[2].parse().ok()?;
        GeoPoint::new(lat, lng).usable()
    }
}

impl Extractor for LocationExtractor {
    fn extract(&self, text: &str, _known: &CandidateFacts) -> CandidateFacts {
        CandidateFacts {
            location: Self::coordinates(text),
            district: district_centroid(text).map(|m| m.name.to_string()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChoiceField {
    Store,
    Vacancy,
    Slot,
}

/// A 1-based pick from a numbered list, by digit or Spanish ordinal.
pub struct ChoiceExtractor {
    pub field: ChoiceField,
    pub max: u8,
}

const ORDINALS: &[(&str, u8)] = &[
    ("primera", 1), ("primero", 1), ("primer", 1), ("uno", 1),
    ("segunda", 2), ("segundo", 2), ("dos", 2),
    ("tercera", 3), ("tercero", 3), ("tercer", 3), ("tres", 3),
    ("cuarta", 4), ("cuarto", 4), ("cuatro", 4),
    ("quinta", 5), ("quinto", 5), ("cinco", 5),
];

pub fn parse_choice(text: &str, max: u8) -> Option<u8> {
    let in_range = |n: u8| (1..=max).contains(&n).then_some(n);
    if let Some(n) = CHOICE_NUMBER
        .captures_iter(text)
        .filter_map(|caps| caps[1].parse::<u8>().ok())
        .find_map(in_range)
    {
        return Some(n);
    }
    let folded = fold(text);
    ORDINALS
        .iter()
        .find(|(word, _)| contains_phrase(&folded, word))
        .and_then(|(_, n)| in_range(*n))
}

impl Extractor for ChoiceExtractor {
    fn extract(&self, text: &str, _known: &CandidateFacts) -> CandidateFacts {
        let choice = parse_choice(text, self.max);
        let mut facts = CandidateFacts::default();
        match self.field {
            ChoiceField::Store => facts.selected_store_index = choice,
            ChoiceField::Vacancy => facts.selected_vacancy_index = choice,
            ChoiceField::Slot => facts.selected_slot_index = choice,
        }
        facts
    }
}

const MAX_SCREENING_ANSWER_CHARS: usize = 500;

pub struct ScreeningExtractor;

impl Extractor for ScreeningExtractor {
    fn extract(&self, text: &str, _known: &CandidateFacts) -> CandidateFacts {
        let answer: String = text.trim().chars().take(MAX_SCREENING_ANSWER_CHARS).collect();
        CandidateFacts {
            screening_answer: (!answer.is_empty()).then_some(answer),
            ..Default::default()
        }
    }
}

pub struct AttendanceExtractor;

impl Extractor for AttendanceExtractor {
    fn extract(&self, text: &str, _known: &CandidateFacts) -> CandidateFacts {
        CandidateFacts {
            attendance_confirmed: parse_yes_no(text),
            ..Default::default()
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Registry
// ────────────────────────────────────────────────────────────────────────────

/// State → extractor table. States without an entry extract nothing.
pub struct ExtractorSet {
    by_state: HashMap<ConversationState, Box<dyn Extractor>>,
}

impl ExtractorSet {
    pub fn empty() -> Self {
        Self {
            by_state: HashMap::new(),
        }
    }

    /// Registers (or replaces) the extractor for `state`.
    pub fn with(mut self, state: ConversationState, extractor: Box<dyn Extractor>) -> Self {
        self.by_state.insert(state, extractor);
        self
    }

    pub fn extract(
        &self,
        state: ConversationState,
        text: &str,
        known: &CandidateFacts,
    ) -> CandidateFacts {
        self.by_state
            .get(&state)
            .map(|e| e.extract(text, known))
            .unwrap_or_default()
    }
}

impl Default for ExtractorSet {
    fn default() -> Self {
        use ConversationState as S;
        Self::empty()
            .with(S::TermsCheck, Box::new(TermsExtractor))
            .with(S::BasicInfo, Box::new(BasicInfoExtractor))
            .with(S::HardFilters, Box::new(HardFilterExtractor))
            .with(S::SalaryExpectation, Box::new(SalaryExtractor))
            .with(S::LocationInput, Box::new(LocationExtractor))
            .with(
                S::StoreSelection,
                Box::new(ChoiceExtractor { field: ChoiceField::Store, max: 3 }),
            )
            .with(
                S::VacancySelection,
                Box::new(ChoiceExtractor { field: ChoiceField::Vacancy, max: 9 }),
            )
            .with(S::Screening, Box::new(ScreeningExtractor))
            .with(
                S::InterviewSlotOffer,
                Box::new(ChoiceExtractor { field: ChoiceField::Slot, max: 9 }),
            )
            .with(S::Confirmed, Box::new(AttendanceExtractor))
    }
}
