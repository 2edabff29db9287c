//! The dialogue transition table.
//!
//! The next state is a pure function of the current state, the merged facts
//! and a few side-effect outcomes ([`Gates`]). The language model never takes
//! part in this decision. At most one step is taken per inbound message.
//!
//! The only backward step is a vacancy filling up between the slot offer and
//! the booking: the candidate returns to store selection, or to location
//! input when no store is left to offer.

use super::models::{CandidateFacts, ConversationState};

/// Outcomes of the side effects run for the current state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Gates {
    /// The store matcher returned at least one store.
    pub matches_available: bool,
    /// The scheduler has at least one free slot to offer.
    pub slots_available: bool,
    /// An interview exists for the candidate.
    pub interview_booked: bool,
    /// The chosen vacancy had no open slot left at booking time.
    pub vacancy_filled: bool,
}

pub fn next_state(
    current: ConversationState,
    facts: &CandidateFacts,
    gates: &Gates,
) -> ConversationState {
    use ConversationState as S;

    match current {
        S::Start => S::TermsCheck,
        S::TermsCheck => match facts.terms_accepted {
            Some(true) => S::BasicInfo,
            Some(false) => S::Rejected,
            None => S::TermsCheck,
        },
        S::BasicInfo if facts.has_basic_info() => S::HardFilters,
        S::HardFilters => match (facts.available_rotating_shifts, facts.available_weekends) {
            (Some(false), _) | (_, Some(false)) => S::Rejected,
            (Some(true), Some(true)) => S::SalaryExpectation,
            _ => S::HardFilters,
        },
        S::SalaryExpectation if facts.salary_expectation.is_some() => S::LocationInput,
        S::LocationInput if gates.matches_available => S::StoreSelection,
        S::StoreSelection if facts.selected_store_index.is_some() => S::VacancySelection,
        S::VacancySelection => S::Screening,
        S::Screening if gates.slots_available => S::InterviewSlotOffer,
        S::InterviewSlotOffer if gates.interview_booked => S::Confirmed,
        S::InterviewSlotOffer if gates.vacancy_filled => {
            if gates.matches_available {
                S::StoreSelection
            } else {
                S::LocationInput
            }
        }
        other => other,
    }
}
