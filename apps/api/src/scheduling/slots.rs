use chrono::{DateTime, Datelike, Days, Duration, FixedOffset, NaiveTime, TimeZone, Utc, Weekday};

use crate::models::interview::TimeSlot;
use crate::scheduling::calendar::BusyInterval;

/// Local start hours offered every working day.
pub const INTERVIEW_HOURS: [u32; 7] = [9, 10, 11, 14, 15, 16, 17];
pub const SLOT_MINUTES: i64 = 60;
pub const NON_WORKING_DAY: Weekday = Weekday::Sun;

const WEEKDAYS_ES: [&str; 7] = [
    "lunes", "martes", "miércoles", "jueves", "viernes", "sábado", "domingo",
];
const MONTHS_ES: [&str; 12] = [
    "enero", "febrero", "marzo", "abril", "mayo", "junio", "julio", "agosto", "septiembre",
    "octubre", "noviembre", "diciembre",
];

/// Enumerates slots for `days_ahead` calendar days starting the day after `from`,
/// in `from`'s local offset, skipping the non-working weekday.
pub fn generate_slots(from: DateTime<FixedOffset>, days_ahead: u32) -> Vec<TimeSlot> {
    let offset = *from.offset();
    let today = from.date_naive();
    let mut slots = Vec::new();

    for day in 1..=u64::from(days_ahead) {
        let Some(date) = today.checked_add_days(Days::new(day)) else {
            break;
        };
        if date.weekday() == NON_WORKING_DAY {
            continue;
        }
        for hour in INTERVIEW_HOURS {
            let Some(time) = NaiveTime::from_hms_opt(hour, 0, 0) else {
                continue;
            };
            let Some(local) = offset.from_local_datetime(&date.and_time(time)).single() else {
                continue;
            };
            let start = local.with_timezone(&Utc);
            slots.push(TimeSlot {
                start,
                end: start + Duration::minutes(SLOT_MINUTES),
                display: display_local(&local),
            });
        }
    }
    slots
}

/// Spanish rendering such as "martes 14 de octubre, 09:00".
pub fn display_local(local: &DateTime<FixedOffset>) -> String {
    let weekday = WEEKDAYS_ES[local.weekday().num_days_from_monday() as usize];
    let month = MONTHS_ES[local.month0() as usize];
    format!(
        "{weekday} {} de {month}, {}",
        local.day(),
        local.format("%H:%M")
    )
}

/// Half-open intersection of `[a_start, a_end)` and `[b_start, b_end)`.
/// Touching endpoints do not overlap.
pub fn overlaps(
    a_start: DateTime<Utc>,
    a_end: DateTime<Utc>,
    b_start: DateTime<Utc>,
    b_end: DateTime<Utc>,
) -> bool {
    a_start < b_end && b_start < a_end
}

/// Removes every slot that overlaps any busy interval.
pub fn without_conflicts(slots: Vec<TimeSlot>, busy: &[BusyInterval]) -> Vec<TimeSlot> {
    slots
        .into_iter()
        .filter(|slot| {
            !busy
                .iter()
                .any(|b| overlaps(slot.start, slot.end, b.start, b.end))
        })
        .collect()
}
