use std::collections::{BTreeMap, HashMap, HashSet};

use crate::config::AttritionConfig;
use crate::model::{DepartureEvent, EnrollmentRecord, StudentId};

/// Confirmed attrition split by whether the student shows up elsewhere.
#[derive(Debug, Clone, Default)]
pub struct DestinationSplit {
    pub flights: Vec<DepartureEvent>,
    pub abandonment: Vec<DepartureEvent>,
    /// Qualifying destination records per flight student, deduplicated and
    /// in feed order.
    pub destination_records: BTreeMap<StudentId, Vec<EnrollmentRecord>>,
    /// Repeated (student, year, institution, program) rows dropped.
    pub duplicates_removed: usize,
}

/// Classify each non-graduate departure as destination flight or total
/// abandonment.
///
/// A record qualifies when it is at another institution in or after the
/// student's first absence year. `records` may hold any institution's rows;
/// only students in `attrition` are considered.
pub fn classify_destinations(
    attrition: &[DepartureEvent],
    records: &[EnrollmentRecord],
    config: &AttritionConfig,
) -> DestinationSplit {
    let first_absence: HashMap<StudentId, i32> = attrition
        .iter()
        .map(|e| (e.student_id, e.first_absence_year))
        .collect();

    let mut seen = HashSet::new();
    let mut split = DestinationSplit::default();

    for record in records {
        let Some(&absence) = first_absence.get(&record.student_id) else {
            continue;
        };
        if record.institution_id == config.home_institution_id
            || record.period_year < absence
            || config.is_sentinel_year(record.period_year)
        {
            continue;
        }
        if !seen.insert(record.dedup_key()) {
            split.duplicates_removed += 1;
            continue;
        }
        split
            .destination_records
            .entry(record.student_id)
            .or_default()
            .push(record.clone());
    }

    for event in attrition {
        if split.destination_records.contains_key(&event.student_id) {
            split.flights.push(*event);
        } else {
            split.abandonment.push(*event);
        }
    }

    if split.duplicates_removed > 0 {
        tracing::warn!(
            duplicates_removed = split.duplicates_removed,
            "Duplicate destination enrollment rows removed"
        );
    }
    tracing::info!(
        attrition = attrition.len(),
        destination_flight = split.flights.len(),
        total_abandonment = split.abandonment.len(),
        "Destination classification complete"
    );

    split
}
