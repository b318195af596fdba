//! Post-departure trajectories of destination-flight students.
//!
//! Yearly destination records collapse into one [`TrajectoryStop`] per
//! (institution, program, level). A [`Trajectory`] owns its stops as a single
//! ordered collection; the flat pipe-delimited form used for persistence is
//! derived from it and parsed back into it, never edited column by column.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use polars::prelude::*;
use serde::{Deserialize, Serialize};

use crate::cohort::CohortTable;
use crate::error::{AttritionError, Result};
use crate::model::{DepartureEvent, EnrollmentRecord, ProgramLevel, ScheduleTrack, StudentId};
use crate::schema::{stop, trajectory};

/// One (institution, program) episode after leaving the home institution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryStop {
    pub entry_year: i32,
    pub last_year: i32,
    pub institution_id: i64,
    pub institution_name: Option<String>,
    pub program_name: Option<String>,
    pub knowledge_area: Option<String>,
    pub nominal_duration: Option<i32>,
    pub program_level: Option<ProgramLevel>,
    pub institution_tiers: [Option<String>; 3],
    pub admission_requirement: Option<String>,
}

impl TrajectoryStop {
    fn from_record(record: &EnrollmentRecord) -> Self {
        Self {
            entry_year: record.period_year,
            last_year: record.period_year,
            institution_id: record.institution_id,
            institution_name: record.institution_name.clone(),
            program_name: record.program_name.clone(),
            knowledge_area: record.knowledge_area.clone(),
            nominal_duration: record.nominal_duration,
            program_level: record.program_level,
            institution_tiers: record.institution_tiers.clone(),
            admission_requirement: record.admission_requirement.clone(),
        }
    }

    /// Chronological order with a deterministic tie-break.
    pub(crate) fn chronological(a: &Self, b: &Self) -> Ordering {
        a.entry_year
            .cmp(&b.entry_year)
            .then(a.last_year.cmp(&b.last_year))
            .then(a.institution_id.cmp(&b.institution_id))
            .then_with(|| a.program_name.cmp(&b.program_name))
            .then(a.program_level.cmp(&b.program_level))
    }
}

/// Years between leaving and the first re-enrollment elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestInterval {
    Immediate,
    OneYear,
    TwoYears,
    ThreeToFive,
    SixToTen,
    MoreThanTen,
}

impl RestInterval {
    pub fn from_years(years: i32) -> Self {
        match years {
            i32::MIN..=0 => Self::Immediate,
            1 => Self::OneYear,
            2 => Self::TwoYears,
            3..=5 => Self::ThreeToFive,
            6..=10 => Self::SixToTen,
            _ => Self::MoreThanTen,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Immediate => "immediate",
            Self::OneYear => "1_year",
            Self::TwoYears => "2_years",
            Self::ThreeToFive => "3_to_5_years",
            Self::SixToTen => "6_to_10_years",
            Self::MoreThanTen => "more_than_10_years",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    pub student_id: StudentId,
    pub cohort: i32,
    pub first_absence_year: i32,
    pub schedule_track: Option<ScheduleTrack>,
    stops: Vec<TrajectoryStop>,
}

impl Trajectory {
    pub fn new(
        event: &DepartureEvent,
        schedule_track: Option<ScheduleTrack>,
        stops: Vec<TrajectoryStop>,
    ) -> Self {
        let mut trajectory = Self {
            student_id: event.student_id,
            cohort: event.cohort,
            first_absence_year: event.first_absence_year,
            schedule_track,
            stops,
        };
        trajectory.sort_stops();
        trajectory
    }

    pub fn stops(&self) -> &[TrajectoryStop] {
        &self.stops
    }

    /// Stable sort by entry year; sorting an already sorted trajectory is a no-op.
    pub fn sort_stops(&mut self) {
        self.stops.sort_by(TrajectoryStop::chronological);
    }

    pub fn first_stop(&self) -> Option<&TrajectoryStop> {
        self.stops.first()
    }

    pub fn rest_years(&self) -> Option<i32> {
        self.first_stop()
            .map(|s| s.entry_year - self.first_absence_year)
    }

    pub fn rest_interval(&self) -> Option<RestInterval> {
        self.rest_years().map(RestInterval::from_years)
    }

    pub fn reached_advanced_level(&self) -> bool {
        self.stops
            .iter()
            .any(|s| s.program_level.is_some_and(|l| l.is_advanced()))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let mut trajectory: Self = serde_json::from_str(json)?;
        trajectory.sort_stops();
        Ok(trajectory)
    }

    /// Flatten into separator-joined lists, one list per stop attribute.
    pub fn to_flat(&self, separator: &str) -> Result<FlatTrajectory> {
        Ok(FlatTrajectory {
            student_id: self.student_id.0,
            cohort: self.cohort,
            first_absence_year: self.first_absence_year,
            schedule_track: self.schedule_track.map(|t| t.as_str().to_string()),
            lists: flatten_stops(&self.stops, separator, self.student_id)?,
        })
    }

    pub fn from_flat(flat: &FlatTrajectory, separator: &str) -> Result<Self> {
        let student_id = StudentId(flat.student_id);
        let mut trajectory = Self {
            student_id,
            cohort: flat.cohort,
            first_absence_year: flat.first_absence_year,
            schedule_track: flat.schedule_track.as_deref().and_then(ScheduleTrack::parse),
            stops: parse_stops(&flat.lists, separator, student_id)?,
        };
        trajectory.sort_stops();
        Ok(trajectory)
    }
}

/// Join each stop attribute into one list per column of
/// `schema::trajectory::LISTS`.
///
/// Every joined list must split back into exactly the values it was built
/// from; a value that would fuse with a neighbouring separator is rejected.
pub(crate) fn flatten_stops(
    stops: &[TrajectoryStop],
    separator: &str,
    student: StudentId,
) -> Result<[String; 12]> {
    let mut columns: [Vec<String>; 12] = Default::default();

    for s in stops {
        let values = [
            s.entry_year.to_string(),
            s.last_year.to_string(),
            s.institution_id.to_string(),
            opt_text(&s.institution_name),
            opt_text(&s.program_name),
            opt_text(&s.knowledge_area),
            s.nominal_duration.map(|d| d.to_string()).unwrap_or_default(),
            s.program_level.map(|l| l.as_str().to_string()).unwrap_or_default(),
            opt_text(&s.institution_tiers[0]),
            opt_text(&s.institution_tiers[1]),
            opt_text(&s.institution_tiers[2]),
            opt_text(&s.admission_requirement),
        ];
        for (i, value) in values.into_iter().enumerate() {
            columns[i].push(value);
        }
    }

    let mut lists: [String; 12] = Default::default();
    for (i, values) in columns.iter().enumerate() {
        let joined = values.join(separator);
        if !values.is_empty() && !joined.split(separator).eq(values.iter().map(String::as_str)) {
            return Err(AttritionError::TrajectoryParse(format!(
                "student {student}: values in {} do not survive the '{separator}' separator",
                trajectory::LISTS[i]
            )));
        }
        lists[i] = joined;
    }
    Ok(lists)
}

/// Parse separator-joined lists back into stops, checking that every list
/// holds one value per stop.
pub(crate) fn parse_stops(
    lists: &[String; 12],
    separator: &str,
    student: StudentId,
) -> Result<Vec<TrajectoryStop>> {
    let stop_count = if lists[0].is_empty() {
        0
    } else {
        lists[0].split(separator).count()
    };

    let mut columns: Vec<Vec<&str>> = Vec::with_capacity(lists.len());
    for (i, list) in lists.iter().enumerate() {
        let parts: Vec<&str> = if stop_count == 0 {
            Vec::new()
        } else {
            list.split(separator).collect()
        };
        if parts.len() != stop_count {
            return Err(AttritionError::TrajectoryParse(format!(
                "student {student}: {} has {} values, expected {stop_count}",
                trajectory::LISTS[i],
                parts.len()
            )));
        }
        columns.push(parts);
    }

    let mut stops = Vec::with_capacity(stop_count);
    for j in 0..stop_count {
        let field = |i: usize| columns[i][j];
        stops.push(TrajectoryStop {
            entry_year: parse_int(field(0), "entry year")?,
            last_year: parse_int(field(1), "last year")?,
            institution_id: parse_int(field(2), "institution id")?,
            institution_name: text_opt(field(3)),
            program_name: text_opt(field(4)),
            knowledge_area: text_opt(field(5)),
            nominal_duration: match field(6) {
                "" => None,
                raw => Some(parse_int(raw, "nominal duration")?),
            },
            program_level: match field(7) {
                "" => None,
                raw => Some(ProgramLevel::parse(raw).ok_or_else(|| {
                    AttritionError::TrajectoryParse(format!("unknown level '{raw}'"))
                })?),
            },
            institution_tiers: [text_opt(field(8)), text_opt(field(9)), text_opt(field(10))],
            admission_requirement: text_opt(field(11)),
        });
    }
    stops.sort_by(TrajectoryStop::chronological);
    Ok(stops)
}

/// Persisted form of a trajectory: per-stop attributes as separator-joined
/// strings, in `schema::trajectory::LISTS` order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatTrajectory {
    pub student_id: i64,
    pub cohort: i32,
    pub first_absence_year: i32,
    pub schedule_track: Option<String>,
    pub lists: [String; 12],
}

fn opt_text(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

fn text_opt(raw: &str) -> Option<String> {
    (!raw.is_empty()).then(|| raw.to_string())
}

fn parse_int<T: std::str::FromStr>(raw: &str, what: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| AttritionError::TrajectoryParse(format!("invalid {what} '{raw}'")))
}

// ── Aggregation ─────────────────────────────────────────────────────────────

/// Group records by (institution, program, level). Each stop spans the
/// minimum to maximum period year and takes descriptive attributes from its
/// earliest record. Stops come back in chronological order.
pub(crate) fn collapse_stops<'a>(
    records: impl IntoIterator<Item = &'a EnrollmentRecord>,
) -> Vec<TrajectoryStop> {
    let mut ordered: Vec<&EnrollmentRecord> = records.into_iter().collect();
    ordered.sort_by_key(|r| r.period_year);

    let mut stops: Vec<TrajectoryStop> = Vec::new();
    let mut slot: HashMap<(i64, Option<&str>, Option<ProgramLevel>), usize> = HashMap::new();

    for record in ordered {
        let key = (
            record.institution_id,
            record.program_name.as_deref(),
            record.program_level,
        );
        match slot.get(&key) {
            Some(&i) => {
                let stop = &mut stops[i];
                stop.entry_year = stop.entry_year.min(record.period_year);
                stop.last_year = stop.last_year.max(record.period_year);
            }
            None => {
                slot.insert(key, stops.len());
                stops.push(TrajectoryStop::from_record(record));
            }
        }
    }

    stops.sort_by(TrajectoryStop::chronological);
    stops
}

/// Collapse each flight student's destination records into ordered stops.
pub fn aggregate_trajectories(
    flights: &[DepartureEvent],
    destination_records: &BTreeMap<StudentId, Vec<EnrollmentRecord>>,
    cohorts: &CohortTable,
) -> Vec<Trajectory> {
    let mut trajectories = Vec::with_capacity(flights.len());

    for event in flights {
        let Some(records) = destination_records.get(&event.student_id) else {
            continue;
        };

        let stops = collapse_stops(records.iter());
        let track = cohorts.get(event.student_id).and_then(|a| a.schedule_track);
        trajectories.push(Trajectory::new(event, track, stops));
    }

    tracing::info!(
        students = trajectories.len(),
        stops = trajectories.iter().map(|t| t.stops().len()).sum::<usize>(),
        "Trajectories aggregated"
    );

    trajectories
}

// ── Output frames ───────────────────────────────────────────────────────────

/// One row per student, per-stop attributes as separator-joined lists.
pub fn trajectory_frame(trajectories: &[Trajectory], separator: &str) -> Result<DataFrame> {
    let flats = trajectories
        .iter()
        .map(|t| t.to_flat(separator))
        .collect::<Result<Vec<_>>>()?;

    let students: Vec<i64> = flats.iter().map(|f| f.student_id).collect();
    let cohorts: Vec<i32> = flats.iter().map(|f| f.cohort).collect();
    let absences: Vec<i32> = flats.iter().map(|f| f.first_absence_year).collect();
    let tracks: Vec<Option<String>> = flats.iter().map(|f| f.schedule_track.clone()).collect();
    let rest_years: Vec<Option<i32>> = trajectories.iter().map(|t| t.rest_years()).collect();
    let rest_intervals: Vec<Option<String>> = trajectories
        .iter()
        .map(|t| t.rest_interval().map(|r| r.as_str().to_string()))
        .collect();
    let advanced: Vec<bool> = trajectories.iter().map(|t| t.reached_advanced_level()).collect();

    let mut columns = vec![
        Column::new(trajectory::STUDENT_ID.into(), &students),
        Column::new(trajectory::COHORT.into(), &cohorts),
        Column::new(trajectory::FIRST_ABSENCE_YEAR.into(), &absences),
        Column::new(trajectory::SCHEDULE_TRACK.into(), &tracks),
    ];
    for (i, name) in trajectory::LISTS.iter().enumerate() {
        let values: Vec<String> = flats.iter().map(|f| f.lists[i].clone()).collect();
        columns.push(Column::new((*name).into(), &values));
    }
    columns.push(Column::new(trajectory::REST_YEARS.into(), &rest_years));
    columns.push(Column::new(trajectory::REST_INTERVAL.into(), &rest_intervals));
    columns.push(Column::new(trajectory::REACHED_ADVANCED_LEVEL.into(), &advanced));

    Ok(DataFrame::new(columns)?)
}

/// One row per stop, with its position in the student's trajectory.
pub fn stops_frame(trajectories: &[Trajectory]) -> Result<DataFrame> {
    stop_rows_frame(trajectories.iter().map(|t| (t.student_id, t.stops())))
}

pub(crate) fn stop_rows_frame<'a>(
    rows: impl IntoIterator<Item = (StudentId, &'a [TrajectoryStop])>,
) -> Result<DataFrame> {
    let mut students = Vec::new();
    let mut sequence = Vec::new();
    let mut entry = Vec::new();
    let mut last = Vec::new();
    let mut institution_ids = Vec::new();
    let mut institutions = Vec::new();
    let mut programs = Vec::new();
    let mut areas = Vec::new();
    let mut durations = Vec::new();
    let mut levels = Vec::new();
    let mut tiers: [Vec<Option<String>>; 3] = Default::default();
    let mut requirements = Vec::new();

    for (student, stops) in rows {
        for (i, s) in stops.iter().enumerate() {
            students.push(student.0);
            sequence.push(i as i32 + 1);
            entry.push(s.entry_year);
            last.push(s.last_year);
            institution_ids.push(s.institution_id);
            institutions.push(s.institution_name.clone());
            programs.push(s.program_name.clone());
            areas.push(s.knowledge_area.clone());
            durations.push(s.nominal_duration);
            levels.push(s.program_level.map(|l| l.as_str().to_string()));
            for (column, tier) in tiers.iter_mut().zip(&s.institution_tiers) {
                column.push(tier.clone());
            }
            requirements.push(s.admission_requirement.clone());
        }
    }

    let [tiers_1, tiers_2, tiers_3] = tiers;
    let df = DataFrame::new(vec![
        Column::new(stop::STUDENT_ID.into(), &students),
        Column::new(stop::SEQUENCE.into(), &sequence),
        Column::new(stop::ENTRY_YEAR.into(), &entry),
        Column::new(stop::LAST_YEAR.into(), &last),
        Column::new(stop::INSTITUTION_ID.into(), &institution_ids),
        Column::new(stop::INSTITUTION_NAME.into(), &institutions),
        Column::new(stop::PROGRAM_NAME.into(), &programs),
        Column::new(stop::KNOWLEDGE_AREA.into(), &areas),
        Column::new(stop::NOMINAL_DURATION.into(), &durations),
        Column::new(stop::LEVEL.into(), &levels),
        Column::new(stop::INSTITUTION_TIER_1.into(), &tiers_1),
        Column::new(stop::INSTITUTION_TIER_2.into(), &tiers_2),
        Column::new(stop::INSTITUTION_TIER_3.into(), &tiers_3),
        Column::new(stop::ADMISSION_REQUIREMENT.into(), &requirements),
    ])?;
    Ok(df)
}
