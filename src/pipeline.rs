//! End-to-end attrition run: cohorts, departures, graduation filter,
//! destination split, trajectories of leavers and of home graduates, with
//! output frames.

use std::collections::{BTreeMap, HashSet};

use polars::prelude::*;
use serde::{Deserialize, Serialize};

use crate::cohort::{assign_cohorts, CohortTable};
use crate::config::AttritionConfig;
use crate::departure::{detect_departures, HomePresence};
use crate::destination::classify_destinations;
use crate::error::Result;
use crate::feeds::{EnrollmentQuery, EnrollmentSource, GraduationSource};
use crate::graduation::{classify_graduates, GraduationIndex};
use crate::model::{Classification, DepartureEvent, GraduationBasis, ScheduleTrack, StudentId};
use crate::post_graduation::{
    aggregate_post_graduation, graduate_stops_frame, graduate_trajectory_frame,
    reentry_delay_frame, reentry_level_frame, GraduateTrajectory,
};
use crate::route_graph::LevelRouteGraph;
use crate::schema::attrition;
use crate::summary::{
    summarize_cohorts, summary_frame, CohortSummary, RunDiagnostics, StudentIssue,
};
use crate::trajectory::{aggregate_trajectories, stops_frame, trajectory_frame, Trajectory};

/// One confirmed non-graduate departure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttritionRow {
    pub student_id: StudentId,
    pub cohort: i32,
    pub last_home_year: i32,
    pub first_absence_year: i32,
    pub schedule_track: Option<ScheduleTrack>,
    pub classification: Classification,
    /// A titled graduation anywhere on or after the first absence year.
    pub graduated_after_departure: bool,
}

pub struct AttritionPipeline {
    config: AttritionConfig,
}

impl AttritionPipeline {
    pub fn new(config: AttritionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &AttritionConfig {
        &self.config
    }

    /// Classify every home-institution student (optionally one cohort).
    ///
    /// Fails only on dataset-level problems; students that cannot be
    /// classified are reported in the run diagnostics.
    pub fn run<E, G>(
        &self,
        enrollments: &E,
        graduations: &G,
        cohort: Option<i32>,
    ) -> Result<AttritionRun>
    where
        E: EnrollmentSource + ?Sized,
        G: GraduationSource + ?Sized,
    {
        let config = &self.config;
        let mut diagnostics = RunDiagnostics::start(cohort);
        tracing::info!(
            run_id = %diagnostics.run_id,
            home_institution = config.home_institution_id,
            ?cohort,
            "Attrition run started"
        );

        // Home population.
        let home_records = enrollments.enrollments(&config.home_query())?;
        diagnostics.home_records = home_records.len();

        let presence = match HomePresence::build(&home_records, config) {
            Ok(presence) => presence,
            Err(err) => {
                tracing::error!(
                    run_id = %diagnostics.run_id,
                    error = %err,
                    "Attrition run aborted"
                );
                return Err(err);
            }
        };
        diagnostics.max_observed_year = Some(presence.max_observed_year());

        let cohorts = assign_cohorts(&home_records, config, cohort);
        diagnostics.cohort_students = cohorts.len();
        diagnostics.excluded_students = cohorts.excluded_students();
        diagnostics.stage("cohort_assignment", home_records.len(), cohorts.len());

        // Departures.
        let scan = detect_departures(&cohorts, &presence);
        diagnostics.stop_outs = scan.stop_outs;
        diagnostics.departures = scan.events.len();
        diagnostics.issues.extend(scan.data_gaps.iter().filter_map(|&student_id| {
            cohorts.get(student_id).map(|a| StudentIssue::DataGap {
                student_id,
                cohort: a.cohort,
            })
        }));
        diagnostics.stage(
            "departure_scan",
            cohorts.len(),
            scan.events.len() + scan.active.len(),
        );

        // Graduation filter.
        let graduation_records = graduations.graduations()?;
        let index = GraduationIndex::build(&graduation_records, config.home_institution_id);
        let outcome = classify_graduates(
            &scan.events,
            &cohorts,
            &presence,
            &index,
            &config.graduation,
        );
        diagnostics.graduates_by_record = outcome.count_by(GraduationBasis::Record);
        diagnostics.graduates_by_duration = outcome.count_by(GraduationBasis::Duration);
        diagnostics.ambiguous_classifications = outcome.ambiguous;
        diagnostics.stage("graduation_filter", scan.events.len(), outcome.attrition.len());

        let record_graduates: Vec<DepartureEvent> = outcome
            .graduates
            .iter()
            .filter(|(_, basis)| *basis == GraduationBasis::Record)
            .map(|(event, _)| *event)
            .collect();

        // One bulk fetch for the attrition population and the home graduates.
        let followed: Vec<StudentId> = outcome
            .attrition
            .iter()
            .chain(&record_graduates)
            .map(|e| e.student_id)
            .collect();
        let destination_feed = if followed.is_empty() {
            Vec::new()
        } else {
            enrollments.enrollments(&EnrollmentQuery::for_students(followed))?
        };
        let split = classify_destinations(&outcome.attrition, &destination_feed, config);
        diagnostics.destination_records = split.destination_records.values().map(Vec::len).sum();
        diagnostics.duplicates_removed = split.duplicates_removed;

        let trajectories =
            aggregate_trajectories(&split.flights, &split.destination_records, &cohorts);
        diagnostics.stage("trajectories", split.flights.len(), trajectories.len());

        let graduate_trajectories = aggregate_post_graduation(
            &record_graduates,
            &index,
            &destination_feed,
            &cohorts,
            config,
        );
        diagnostics.graduates_reentered = graduate_trajectories
            .iter()
            .filter(|t| t.reentered())
            .count();
        diagnostics.stage(
            "post_graduation",
            record_graduates.len(),
            graduate_trajectories.len(),
        );

        // Final labels.
        let mut classifications: BTreeMap<StudentId, Classification> = BTreeMap::new();
        for &student in &scan.active {
            classifications.insert(student, Classification::Active);
        }
        for (event, basis) in &outcome.graduates {
            classifications.insert(event.student_id, Classification::Graduate { basis: *basis });
        }

        let mut attrition_rows = Vec::with_capacity(outcome.attrition.len());
        let mut graduated_elsewhere = HashSet::new();
        let labelled = split
            .flights
            .iter()
            .map(|e| (e, Classification::DestinationFlight))
            .chain(split.abandonment.iter().map(|e| (e, Classification::TotalAbandonment)));

        for (event, classification) in labelled {
            classifications.insert(event.student_id, classification);
            let row = attrition_row(event, classification, &cohorts, &index);
            if row.graduated_after_departure {
                graduated_elsewhere.insert(row.student_id);
            }
            attrition_rows.push(row);
        }
        attrition_rows.sort_by_key(|r| r.student_id);

        let summaries = summarize_cohorts(&cohorts, &classifications, &graduated_elsewhere);
        diagnostics.finish();

        tracing::info!(
            run_id = %diagnostics.run_id,
            students = classifications.len(),
            attrition = attrition_rows.len(),
            destination_flight = split.flights.len(),
            data_gaps = diagnostics.data_gaps(),
            "Attrition run complete"
        );

        Ok(AttritionRun {
            attrition: attrition_rows,
            trajectories,
            graduate_trajectories,
            classifications,
            summaries,
            diagnostics,
            separator: config.trajectory.separator.clone(),
        })
    }
}

fn attrition_row(
    event: &DepartureEvent,
    classification: Classification,
    cohorts: &CohortTable,
    index: &GraduationIndex,
) -> AttritionRow {
    AttritionRow {
        student_id: event.student_id,
        cohort: event.cohort,
        last_home_year: event.last_home_year,
        first_absence_year: event.first_absence_year,
        schedule_track: cohorts.get(event.student_id).and_then(|a| a.schedule_track),
        classification,
        graduated_after_departure: index
            .graduated_since(event.student_id, event.first_absence_year),
    }
}

/// Result of one pipeline run.
#[derive(Debug, Clone)]
pub struct AttritionRun {
    /// Destination-flight and total-abandonment rows, by student id.
    pub attrition: Vec<AttritionRow>,
    /// One per destination-flight student.
    pub trajectories: Vec<Trajectory>,
    /// One per graduate with a titled home record, in or out of re-entry.
    pub graduate_trajectories: Vec<GraduateTrajectory>,
    pub classifications: BTreeMap<StudentId, Classification>,
    pub summaries: Vec<CohortSummary>,
    pub diagnostics: RunDiagnostics,
    separator: String,
}

impl AttritionRun {
    pub fn classification_of(&self, student: StudentId) -> Option<Classification> {
        self.classifications.get(&student).copied()
    }

    pub fn trajectory_of(&self, student: StudentId) -> Option<&Trajectory> {
        self.trajectories.iter().find(|t| t.student_id == student)
    }

    pub fn graduate_trajectory_of(&self, student: StudentId) -> Option<&GraduateTrajectory> {
        self.graduate_trajectories
            .iter()
            .find(|t| t.student_id == student)
    }

    pub fn summary_for(&self, cohort: i32) -> Option<&CohortSummary> {
        self.summaries.iter().find(|s| s.cohort == cohort)
    }

    pub fn route_graph(&self) -> LevelRouteGraph {
        LevelRouteGraph::from_trajectories(&self.trajectories)
    }

    pub fn graduate_route_graph(&self) -> LevelRouteGraph {
        LevelRouteGraph::from_graduate_trajectories(&self.graduate_trajectories)
    }

    pub fn attrition_frame(&self) -> Result<DataFrame> {
        let rows = &self.attrition;
        let students: Vec<i64> = rows.iter().map(|r| r.student_id.0).collect();
        let cohorts: Vec<i32> = rows.iter().map(|r| r.cohort).collect();
        let absences: Vec<i32> = rows.iter().map(|r| r.first_absence_year).collect();
        let last_home: Vec<i32> = rows.iter().map(|r| r.last_home_year).collect();
        let tracks: Vec<Option<&str>> = rows
            .iter()
            .map(|r| r.schedule_track.map(|t| t.as_str()))
            .collect();
        let labels: Vec<&str> = rows.iter().map(|r| r.classification.label()).collect();
        let elsewhere: Vec<bool> = rows.iter().map(|r| r.graduated_after_departure).collect();

        let df = DataFrame::new(vec![
            Column::new(attrition::STUDENT_ID.into(), &students),
            Column::new(attrition::COHORT.into(), &cohorts),
            Column::new(attrition::FIRST_ABSENCE_YEAR.into(), &absences),
            Column::new(attrition::LAST_HOME_YEAR.into(), &last_home),
            Column::new(attrition::SCHEDULE_TRACK.into(), &tracks),
            Column::new(attrition::CLASSIFICATION.into(), &labels),
            Column::new(attrition::GRADUATED_AFTER_DEPARTURE.into(), &elsewhere),
        ])?;
        Ok(df)
    }

    pub fn trajectory_frame(&self) -> Result<DataFrame> {
        trajectory_frame(&self.trajectories, &self.separator)
    }

    pub fn stops_frame(&self) -> Result<DataFrame> {
        stops_frame(&self.trajectories)
    }

    pub fn summary_frame(&self) -> Result<DataFrame> {
        summary_frame(&self.summaries)
    }

    pub fn route_frame(&self) -> Result<DataFrame> {
        self.route_graph().to_frame()
    }

    pub fn graduate_trajectory_frame(&self) -> Result<DataFrame> {
        graduate_trajectory_frame(&self.graduate_trajectories, &self.separator)
    }

    pub fn graduate_stops_frame(&self) -> Result<DataFrame> {
        graduate_stops_frame(&self.graduate_trajectories)
    }

    pub fn reentry_level_frame(&self) -> Result<DataFrame> {
        reentry_level_frame(&self.graduate_trajectories)
    }

    pub fn reentry_delay_frame(&self) -> Result<DataFrame> {
        reentry_delay_frame(&self.graduate_trajectories)
    }

    pub fn graduate_route_frame(&self) -> Result<DataFrame> {
        self.graduate_route_graph().to_frame()
    }
}
