use std::collections::HashMap;

use crate::cohort::CohortTable;
use crate::config::GraduationRules;
use crate::departure::HomePresence;
use crate::model::{DepartureEvent, GraduationBasis, GraduationRecord, ScheduleTrack, StudentId};

/// Titled graduation records indexed by student.
#[derive(Debug, Clone, Default)]
pub struct GraduationIndex {
    /// Latest titled home graduation year per student.
    home_titled: HashMap<StudentId, i32>,
    /// Years of every titled record, at any institution.
    titled_years: HashMap<StudentId, Vec<i32>>,
}

impl GraduationIndex {
    pub fn build(records: &[GraduationRecord], home_institution_id: i64) -> Self {
        let mut index = Self::default();
        for record in records.iter().filter(|r| r.has_title()) {
            if record.institution_id == home_institution_id {
                let year = index
                    .home_titled
                    .entry(record.student_id)
                    .or_insert(record.period_year);
                *year = (*year).max(record.period_year);
            }
            index
                .titled_years
                .entry(record.student_id)
                .or_default()
                .push(record.period_year);
        }
        index
    }

    pub fn graduated_at_home(&self, student: StudentId) -> bool {
        self.home_titled.contains_key(&student)
    }

    pub fn home_graduation_year(&self, student: StudentId) -> Option<i32> {
        self.home_titled.get(&student).copied()
    }

    /// Any titled record, anywhere, on or after `year`.
    pub fn graduated_since(&self, student: StudentId, year: i32) -> bool {
        self.titled_years
            .get(&student)
            .is_some_and(|years| years.iter().any(|&y| y >= year))
    }

    pub fn home_graduates(&self) -> usize {
        self.home_titled.len()
    }
}

/// Whether enrolled years reach the nominal duration for the cohort's plan.
pub fn meets_nominal_duration(
    enrolled_years: usize,
    cohort: i32,
    track: ScheduleTrack,
    rules: &GraduationRules,
) -> bool {
    enrolled_years as f64 >= rules.nominal_years_for(cohort, track)
}

#[derive(Debug, Clone, Default)]
pub struct GraduationOutcome {
    pub graduates: Vec<(DepartureEvent, GraduationBasis)>,
    /// Departures not explained by graduation.
    pub attrition: Vec<DepartureEvent>,
    /// Graduation record present while enrolled years fall short of the
    /// nominal duration. Always resolved in favour of the record.
    pub ambiguous: usize,
}

impl GraduationOutcome {
    pub fn count_by(&self, basis: GraduationBasis) -> usize {
        self.graduates.iter().filter(|(_, b)| *b == basis).count()
    }
}

/// Remove graduates from the departure population.
pub fn classify_graduates(
    events: &[DepartureEvent],
    cohorts: &CohortTable,
    presence: &HomePresence,
    index: &GraduationIndex,
    rules: &GraduationRules,
) -> GraduationOutcome {
    let mut outcome = GraduationOutcome::default();

    for event in events {
        let student = event.student_id;
        let has_record = index.graduated_at_home(student);

        let duration_signal = cohorts
            .get(student)
            .and_then(|a| a.schedule_track)
            .map(|track| {
                let enrolled = presence
                    .years_of(student)
                    .map(|ys| ys.range(event.cohort..).count())
                    .unwrap_or(0);
                meets_nominal_duration(enrolled, event.cohort, track, rules)
            });

        if has_record {
            if duration_signal == Some(false) {
                tracing::debug!(
                    %student,
                    cohort = event.cohort,
                    "Graduation record with short enrollment, keeping record"
                );
                outcome.ambiguous += 1;
            }
            outcome.graduates.push((*event, GraduationBasis::Record));
        } else if rules.uses_duration_fallback() && duration_signal == Some(true) {
            outcome.graduates.push((*event, GraduationBasis::Duration));
        } else {
            outcome.attrition.push(*event);
        }
    }

    if outcome.ambiguous > 0 {
        tracing::warn!(
            ambiguous = outcome.ambiguous,
            "Graduation records disagree with the nominal-duration heuristic; \
             records take precedence"
        );
    }
    tracing::info!(
        departures = events.len(),
        graduates = outcome.graduates.len(),
        attrition = outcome.attrition.len(),
        "Graduation classification complete"
    );

    outcome
}
