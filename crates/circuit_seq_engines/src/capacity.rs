#![forbid(unsafe_code)]

use circuit_seq_contracts::sample::SampleOrdinal;
use circuit_seq_contracts::settings::PlateSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotDecision {
    Admit(SampleOrdinal),
    Full { capacity: u32, committed: u32 },
}

/// Admission decision for one more sample given the committed count of the
/// week and the settings snapshot in force.
///
/// Ordinals already issued above a lowered capacity stay valid; they only
/// make the week report as full.
pub fn evaluate_slot(committed: u32, settings: &PlateSettings) -> SlotDecision {
    let capacity = settings.capacity();
    if committed >= capacity {
        return SlotDecision::Full {
            capacity,
            committed,
        };
    }
    match SampleOrdinal::new(committed + 1) {
        Ok(ordinal) => SlotDecision::Admit(ordinal),
        Err(_) => SlotDecision::Full {
            capacity,
            committed,
        },
    }
}

pub fn remaining(committed: u32, settings: &PlateSettings) -> u32 {
    settings.capacity().saturating_sub(committed)
}
