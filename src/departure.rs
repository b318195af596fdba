//! Home presence index and the departure scan.
//!
//! A departure is only confirmed when the student never reappears at the home
//! institution up to the latest year the dataset covers. Absences followed by
//! a return are gap years (stop-outs) and never produce an event.

use std::collections::{BTreeSet, HashMap};

use crate::cohort::CohortTable;
use crate::config::AttritionConfig;
use crate::error::{AttritionError, Result};
use crate::model::{DepartureEvent, EnrollmentRecord, StudentId};

/// Years each student is present at the home institution, built once per run.
#[derive(Debug, Clone)]
pub struct HomePresence {
    years: HashMap<StudentId, BTreeSet<i32>>,
    max_observed_year: i32,
}

impl HomePresence {
    /// Index home-institution records by student. Fails when no record has a
    /// usable period year, since no departure can then be confirmed.
    pub fn build(records: &[EnrollmentRecord], config: &AttritionConfig) -> Result<Self> {
        let mut years: HashMap<StudentId, BTreeSet<i32>> = HashMap::new();
        let mut home_records = 0usize;

        for record in records {
            if record.institution_id != config.home_institution_id {
                continue;
            }
            home_records += 1;
            if config.is_sentinel_year(record.period_year) {
                continue;
            }
            years
                .entry(record.student_id)
                .or_default()
                .insert(record.period_year);
        }

        let max_observed_year = years
            .values()
            .filter_map(|set| set.last().copied())
            .max()
            .ok_or(AttritionError::MissingMaxYear {
                records: home_records,
            })?;

        Ok(Self {
            years,
            max_observed_year,
        })
    }

    pub fn max_observed_year(&self) -> i32 {
        self.max_observed_year
    }

    pub fn years_of(&self, student: StudentId) -> Option<&BTreeSet<i32>> {
        self.years.get(&student)
    }

    pub fn is_present(&self, student: StudentId, year: i32) -> bool {
        self.years
            .get(&student)
            .is_some_and(|set| set.contains(&year))
    }

    pub fn students(&self) -> usize {
        self.years.len()
    }
}

/// Outcome of scanning one student's home years.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HomeStatus {
    /// Present in the last observed year: right-censored.
    Active { gap_years: Vec<i32> },
    Departed {
        last_home_year: i32,
        first_absence_year: i32,
        gap_years: Vec<i32>,
    },
}

impl HomeStatus {
    pub fn gap_years(&self) -> &[i32] {
        match self {
            Self::Active { gap_years } | Self::Departed { gap_years, .. } => gap_years,
        }
    }
}

/// Walk a student's home years from their cohort forward.
///
/// Returns `None` when the student has no home year at or after the cohort
/// year (a data gap). Pure over its inputs, so students can be scanned in
/// any order or in parallel.
pub fn scan_student(
    years: &BTreeSet<i32>,
    cohort: i32,
    max_observed_year: i32,
) -> Option<HomeStatus> {
    if cohort > max_observed_year {
        return None;
    }
    let mut year = *years.range(cohort..=max_observed_year).next()?;
    let mut gap_years = Vec::new();

    loop {
        if year >= max_observed_year {
            return Some(HomeStatus::Active { gap_years });
        }
        let next = year + 1;
        if years.contains(&next) {
            year = next;
            continue;
        }
        let later = if next < max_observed_year {
            years.range(next + 1..=max_observed_year).next()
        } else {
            None
        };
        match later {
            Some(&returned) => {
                gap_years.extend(next..returned);
                year = returned;
            }
            None => {
                return Some(HomeStatus::Departed {
                    last_home_year: year,
                    first_absence_year: next,
                    gap_years,
                })
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DepartureScan {
    pub events: Vec<DepartureEvent>,
    pub active: Vec<StudentId>,
    /// Students skipped because they have no home year in their cohort range.
    pub data_gaps: Vec<StudentId>,
    /// Students with at least one gap year before returning.
    pub stop_outs: usize,
}

/// Scan every student with a cohort and collect confirmed departures.
pub fn detect_departures(cohorts: &CohortTable, presence: &HomePresence) -> DepartureScan {
    let max_year = presence.max_observed_year();
    let mut scan = DepartureScan::default();

    for assignment in cohorts.iter() {
        let student = assignment.student_id;
        let status = presence
            .years_of(student)
            .and_then(|years| scan_student(years, assignment.cohort, max_year));

        let Some(status) = status else {
            tracing::debug!(
                %student,
                cohort = assignment.cohort,
                "No home enrollment in cohort range, skipping"
            );
            scan.data_gaps.push(student);
            continue;
        };

        if !status.gap_years().is_empty() {
            scan.stop_outs += 1;
        }

        match status {
            HomeStatus::Active { .. } => scan.active.push(student),
            HomeStatus::Departed {
                last_home_year,
                first_absence_year,
                ..
            } => scan.events.push(DepartureEvent {
                student_id: student,
                cohort: assignment.cohort,
                last_home_year,
                first_absence_year,
            }),
        }
    }

    tracing::info!(
        max_observed_year = max_year,
        departures = scan.events.len(),
        active = scan.active.len(),
        data_gaps = scan.data_gaps.len(),
        stop_outs = scan.stop_outs,
        "Departure scan complete"
    );

    scan
}
