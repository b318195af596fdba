//! Per-cohort counts and run diagnostics.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cohort::CohortTable;
use crate::error::Result;
use crate::model::{Classification, StudentId};
use crate::schema::summary;

/// Outcome counts for one entry cohort.
///
/// `entrants` always equals the sum of the five disjoint outcome counts;
/// `graduated_elsewhere` is a subset of the attrition counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CohortSummary {
    pub cohort: i32,
    pub entrants: usize,
    pub active: usize,
    pub graduates: usize,
    pub destination_flight: usize,
    pub total_abandonment: usize,
    pub data_gaps: usize,
    pub graduated_elsewhere: usize,
}

impl CohortSummary {
    pub fn attrition(&self) -> usize {
        self.destination_flight + self.total_abandonment
    }

    pub fn is_balanced(&self) -> bool {
        self.entrants
            == self.active
                + self.graduates
                + self.destination_flight
                + self.total_abandonment
                + self.data_gaps
    }
}

/// Tally classifications per cohort. Students absent from `classifications`
/// count as data gaps.
pub fn summarize_cohorts(
    cohorts: &CohortTable,
    classifications: &BTreeMap<StudentId, Classification>,
    graduated_elsewhere: &HashSet<StudentId>,
) -> Vec<CohortSummary> {
    let mut by_cohort: BTreeMap<i32, CohortSummary> = BTreeMap::new();

    for assignment in cohorts.iter() {
        let row = by_cohort
            .entry(assignment.cohort)
            .or_insert_with(|| CohortSummary {
                cohort: assignment.cohort,
                ..Default::default()
            });
        row.entrants += 1;

        match classifications.get(&assignment.student_id) {
            None => row.data_gaps += 1,
            Some(Classification::Active) => row.active += 1,
            Some(Classification::Graduate { .. }) => row.graduates += 1,
            Some(Classification::DestinationFlight) => row.destination_flight += 1,
            Some(Classification::TotalAbandonment) => row.total_abandonment += 1,
        }
        if graduated_elsewhere.contains(&assignment.student_id) {
            row.graduated_elsewhere += 1;
        }
    }

    by_cohort.into_values().collect()
}

pub fn summary_frame(summaries: &[CohortSummary]) -> Result<DataFrame> {
    let col = |f: fn(&CohortSummary) -> usize| -> Vec<u64> {
        summaries.iter().map(|s| f(s) as u64).collect()
    };
    let cohorts: Vec<i32> = summaries.iter().map(|s| s.cohort).collect();

    let df = DataFrame::new(vec![
        Column::new(summary::COHORT.into(), &cohorts),
        Column::new(summary::ENTRANTS.into(), &col(|s| s.entrants)),
        Column::new(summary::ACTIVE.into(), &col(|s| s.active)),
        Column::new(summary::GRADUATES.into(), &col(|s| s.graduates)),
        Column::new(summary::DESTINATION_FLIGHT.into(), &col(|s| s.destination_flight)),
        Column::new(summary::TOTAL_ABANDONMENT.into(), &col(|s| s.total_abandonment)),
        Column::new(summary::DATA_GAPS.into(), &col(|s| s.data_gaps)),
        Column::new(summary::GRADUATED_ELSEWHERE.into(), &col(|s| s.graduated_elsewhere)),
    ])?;
    Ok(df)
}

// ── Diagnostics ─────────────────────────────────────────────────────────────

/// A student skipped without failing the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StudentIssue {
    /// Cohort assigned but no home enrollment at or after the cohort year.
    DataGap { student_id: StudentId, cohort: i32 },
}

/// Everything needed to tell a correct zero from a broken stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunDiagnostics {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub cohort_filter: Option<i32>,
    pub home_records: usize,
    pub max_observed_year: Option<i32>,
    pub cohort_students: usize,
    pub excluded_students: usize,
    pub issues: Vec<StudentIssue>,
    pub stop_outs: usize,
    pub departures: usize,
    pub graduates_by_record: usize,
    pub graduates_by_duration: usize,
    pub ambiguous_classifications: usize,
    pub destination_records: usize,
    pub duplicates_removed: usize,
    /// Home graduates with at least one later enrollment.
    pub graduates_reentered: usize,
    /// Stages that produced no rows from non-empty input.
    pub empty_stages: Vec<String>,
}

impl RunDiagnostics {
    pub fn start(cohort_filter: Option<i32>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            cohort_filter,
            home_records: 0,
            max_observed_year: None,
            cohort_students: 0,
            excluded_students: 0,
            issues: Vec::new(),
            stop_outs: 0,
            departures: 0,
            graduates_by_record: 0,
            graduates_by_duration: 0,
            ambiguous_classifications: 0,
            destination_records: 0,
            duplicates_removed: 0,
            graduates_reentered: 0,
            empty_stages: Vec::new(),
        }
    }

    /// Record a stage boundary; an empty output from non-empty input is flagged.
    pub fn stage(&mut self, name: &str, input_rows: usize, output_rows: usize) {
        tracing::info!(stage = name, input_rows, output_rows, "Stage complete");
        if input_rows > 0 && output_rows == 0 {
            tracing::warn!(stage = name, input_rows, "Stage produced no rows from non-empty input");
            self.empty_stages.push(name.to_string());
        }
    }

    pub fn data_gaps(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| matches!(i, StudentIssue::DataGap { .. }))
            .count()
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cohort::assign_cohorts;
    use crate::config::AttritionConfig;
    use crate::model::{EnrollmentRecord, GraduationBasis};

    fn table() -> CohortTable {
        let records: Vec<_> = (1..=6)
            .map(|s| {
                let cohort = if s <= 5 { 2015 } else { 2016 };
                EnrollmentRecord::new(StudentId(s), cohort, 104).with_entry_year(cohort)
            })
            .collect();
        assign_cohorts(&records, &AttritionConfig::default(), None)
    }

    #[test]
    fn counts_partition_each_cohort() {
        let classifications = BTreeMap::from([
            (StudentId(1), Classification::Active),
            (
                StudentId(2),
                Classification::Graduate {
                    basis: GraduationBasis::Record,
                },
            ),
            (StudentId(3), Classification::DestinationFlight),
            (StudentId(4), Classification::TotalAbandonment),
            (StudentId(6), Classification::TotalAbandonment),
        ]);
        let elsewhere = HashSet::from([StudentId(3)]);

        let rows = summarize_cohorts(&table(), &classifications, &elsewhere);
        assert_eq!(rows.len(), 2);
        assert_eq!(
            rows[0],
            CohortSummary {
                cohort: 2015,
                entrants: 5,
                active: 1,
                graduates: 1,
                destination_flight: 1,
                total_abandonment: 1,
                data_gaps: 1,
                graduated_elsewhere: 1,
            }
        );
        assert!(rows.iter().all(CohortSummary::is_balanced));
        assert_eq!(rows[1].attrition(), 1);

        let df = summary_frame(&rows).unwrap();
        assert_eq!(df.height(), 2);
        assert_eq!(df.width(), 8);
    }

    #[test]
    fn empty_stage_is_flagged_only_for_non_empty_input() {
        let mut diagnostics = RunDiagnostics::start(Some(2015));
        diagnostics.stage("cohorts", 0, 0);
        diagnostics.stage("departures", 10, 0);
        diagnostics.stage("destinations", 4, 2);
        assert_eq!(diagnostics.empty_stages, vec!["departures".to_string()]);
    }

    #[test]
    fn diagnostics_serialize_to_json() {
        let mut diagnostics = RunDiagnostics::start(None);
        diagnostics.issues.push(StudentIssue::DataGap {
            student_id: StudentId(7),
            cohort: 2018,
        });
        diagnostics.finish();

        let json = diagnostics.to_json().unwrap();
        let back: RunDiagnostics = serde_json::from_str(&json).unwrap();
        assert_eq!(back, diagnostics);
        assert_eq!(back.data_gaps(), 1);
        assert!(json.contains("\"kind\": \"data_gap\""));
    }
}
