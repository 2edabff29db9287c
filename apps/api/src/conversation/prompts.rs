// State-specific instructions and the deterministic replies used when the
// model cannot (or must not) be asked. Policy rules live in llm_client::prompts.

use std::fmt::Write;

use super::models::{CandidateFacts, ConversationState, Offers};
use crate::llm_client::prompts::POLICY_PREAMBLE;

/// Something that happened this turn that the reply must explain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    /// No district or coordinates could be recognized.
    LocationNotFound,
    /// The location resolved but no store within range has a fitting vacancy.
    NoOpeningsNearby,
    /// The calendar has no free interview times in the window.
    NoSlots,
    /// The picked slot was taken between offering and booking; fresh slots are listed.
    SlotTaken,
    /// The vacancy filled up before the booking could be made.
    VacancyFilled,
    /// The pick did not match any listed option.
    InvalidChoice,
    /// The candidate confirmed attendance.
    AttendanceConfirmed,
}

/// Everything the reply for one turn may talk about.
#[derive(Debug)]
pub struct TurnContext<'a> {
    pub brand: &'a str,
    /// The state the reply is written for, i.e. the state after this turn.
    pub state: ConversationState,
    pub facts: &'a CandidateFacts,
    pub offers: &'a Offers,
    pub notice: Option<Notice>,
    /// Local display string of the booked interview, once there is one.
    pub interview_display: Option<String>,
}

pub fn state_instruction(state: ConversationState) -> &'static str {
    use ConversationState as S;
    match state {
        S::Start | S::TermsCheck => {
            "Greet the candidate, say you help with job applications for BRAND, and ask whether \
             they accept the processing of their personal data for this application (yes/no)."
        }
        S::BasicInfo => {
            "Ask for whatever is still missing among: full name, national ID (DNI or CE), \
             e-mail, date of birth (dd/mm/yyyy). Ask for the missing items together in one question."
        }
        S::HardFilters => {
            "Ask the next unanswered availability question. First: can they work rotating \
             shifts? Then: can they work weekends? Ask only the first one still unanswered."
        }
        S::SalaryExpectation => "Ask for their monthly salary expectation in soles.",
        S::LocationInput => {
            "Ask which district they live in, or invite them to share their location."
        }
        S::StoreSelection => {
            "List the STORES in CONTEXT as a numbered list with name, address and distance, \
             and ask which one they prefer by number."
        }
        S::VacancySelection => {
            "List the VACANCIES of the chosen store in CONTEXT as a numbered list and ask \
             which position they want by number."
        }
        S::Screening => {
            "Ask one short screening question: do they have previous experience in retail \
             or customer service, and where?"
        }
        S::InterviewSlotOffer => {
            "List the SLOTS in CONTEXT as a numbered list and ask which interview time suits them."
        }
        S::Confirmed => {
            "Confirm the interview using INTERVIEW and the chosen store address. Ask them to \
             reply to confirm they will attend. If they already confirmed, thank them and say goodbye."
        }
        S::Rejected => {
            "Thank the candidate politely, explain they cannot continue with this application \
             right now, and say goodbye. Do not ask anything."
        }
    }
}

fn notice_instruction(notice: Notice) -> &'static str {
    match notice {
        Notice::LocationNotFound => {
            "The location was not recognized. Ask for a nearby district name in Lima."
        }
        Notice::NoOpeningsNearby => {
            "There are no openings near that location right now. Say so and ask whether they \
             could work from another district."
        }
        Notice::NoSlots => {
            "There are no interview times available right now. Say a recruiter will write \
             back soon, and ask them to write again later."
        }
        Notice::SlotTaken => {
            "The chosen time was just taken. Apologize and offer the updated SLOTS."
        }
        Notice::VacancyFilled => {
            "The position filled up before the booking. Apologize. If stores are listed \
             below, ask them to choose one again; otherwise ask for another district."
        }
        Notice::InvalidChoice => "The reply did not match any listed option. Repeat the options.",
        Notice::AttendanceConfirmed => "The candidate confirmed attendance. Thank them.",
    }
}

fn write_context(out: &mut String, ctx: &TurnContext<'_>) {
    let facts = ctx.facts;
    out.push_str("CONTEXT:\n");
    if let Some(name) = &facts.name {
        let _ = writeln!(out, "- Candidate name: {name}");
    }

    if matches!(
        ctx.state,
        ConversationState::BasicInfo | ConversationState::HardFilters
    ) {
        let missing: Vec<&str> = [
            (facts.name.is_none(), "name"),
            (facts.national_id.is_none(), "national ID"),
            (facts.email.is_none(), "e-mail"),
            (facts.birth_date.is_none(), "date of birth"),
            (facts.available_rotating_shifts.is_none(), "rotating shifts"),
            (facts.available_weekends.is_none(), "weekends"),
        ]
        .into_iter()
        .filter_map(|(is_missing, label)| is_missing.then_some(label))
        .collect();
        let _ = writeln!(out, "- Still unknown: {}", missing.join(", "));
    }

    if ctx.state == ConversationState::StoreSelection {
        out.push_str("STORES:\n");
        for (i, store) in ctx.offers.stores.iter().enumerate() {
            let _ = writeln!(
                out,
                "{}. {} ({}) - {:.1} km",
                i + 1,
                store.name,
                store.address,
                store.distance_km
            );
        }
    }

    if let Some(store) = ctx.offers.selected_store(facts) {
        let _ = writeln!(out, "- Chosen store: {} ({})", store.name, store.address);
        if ctx.state == ConversationState::VacancySelection {
            out.push_str("VACANCIES:\n");
            for (i, vacancy) in store.vacancies.iter().enumerate() {
                let _ = writeln!(out, "{}. {} ({} shift)", i + 1, vacancy.title, vacancy.shift_type.as_str());
            }
        }
    }

    if ctx.state == ConversationState::InterviewSlotOffer {
        out.push_str("SLOTS:\n");
        for (i, slot) in ctx.offers.slots.iter().enumerate() {
            let _ = writeln!(out, "{}. {}", i + 1, slot.display);
        }
    }

    if let Some(display) = &ctx.interview_display {
        let _ = writeln!(out, "- INTERVIEW: {display}");
    }
}

/// Policy preamble, state instruction, optional notice and the rendered context.
pub fn build_system_prompt(ctx: &TurnContext<'_>) -> String {
    let mut prompt = String::with_capacity(2048);
    prompt.push_str(POLICY_PREAMBLE);
    prompt.push_str("\n\nCURRENT STEP: ");
    prompt.push_str(&state_instruction(ctx.state).replace("BRAND", ctx.brand));
    if let Some(notice) = ctx.notice {
        prompt.push_str("\nNOTE: ");
        prompt.push_str(notice_instruction(notice));
    }
    prompt.push_str("\n\n");
    write_context(&mut prompt, ctx);
    prompt
}

// ────────────────────────────────────────────────────────────────────────────
// Canned candidate-facing replies
// ────────────────────────────────────────────────────────────────────────────

pub const TECHNICAL_DIFFICULTY: &str =
    "Disculpa, tuvimos una dificultad técnica. ¿Podrías repetir tu último mensaje, por favor?";

pub const UNKNOWN_CHANNEL: &str =
    "Hola, este canal no está disponible para postulaciones en este momento. Disculpa las molestias.";

/// Confirmation used when a booking succeeded but the reply could not be generated.
pub fn booking_confirmed(display: &str, store_name: &str, address: &str) -> String {
    format!(
        "¡Listo! Tu entrevista quedó agendada para el {display} en {store_name} ({address}). \
         ¿Nos confirmas tu asistencia?"
    )
}
