use crate::db::Batch;

/// Attendees currently checked in: the sum of active batch counts.
pub fn checked_in<'a>(batches: impl IntoIterator<Item = &'a Batch>) -> u32 {
    batches
        .into_iter()
        .map(Batch::contribution)
        .fold(0, u32::saturating_add)
}

pub fn remaining(purchased: u32, checked_in: u32) -> u32 {
    purchased.saturating_sub(checked_in)
}

/// Admission state of a ticket, derived from its rollup.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Progress {
    NotStarted,
    Partial,
    /// Every purchased slot is admitted. A ticket with no slots is full.
    Full,
}

impl Progress {
    pub fn of(purchased: u32, checked_in: u32) -> Self {
        if checked_in >= purchased {
            Self::Full
        } else if checked_in == 0 {
            Self::NotStarted
        } else {
            Self::Partial
        }
    }
}
