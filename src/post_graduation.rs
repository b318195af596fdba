//! Where home-institution graduates enroll after their degree.
//!
//! Mirrors the destination-flight trajectories, anchored at the home
//! graduation year instead of the first absence year. Only enrollments that
//! start strictly after the graduation year count as re-entry; the
//! graduation year itself belongs to the program just completed.

use std::collections::{BTreeMap, HashSet};

use polars::prelude::*;
use serde::{Deserialize, Serialize};

use crate::cohort::CohortTable;
use crate::config::AttritionConfig;
use crate::error::Result;
use crate::graduation::GraduationIndex;
use crate::model::{DepartureEvent, EnrollmentRecord, ProgramLevel, ScheduleTrack, StudentId};
use crate::schema::{graduate, reentry, trajectory};
use crate::trajectory::{
    collapse_stops, flatten_stops, stop_rows_frame, RestInterval, TrajectoryStop,
};

const LEVELS: [ProgramLevel; 3] = [
    ProgramLevel::Undergraduate,
    ProgramLevel::PostTitle,
    ProgramLevel::Graduate,
];

/// Enrollments of one home graduate after the graduation year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraduateTrajectory {
    pub student_id: StudentId,
    pub cohort: i32,
    pub graduation_year: i32,
    pub schedule_track: Option<ScheduleTrack>,
    stops: Vec<TrajectoryStop>,
}

impl GraduateTrajectory {
    pub fn new(
        student_id: StudentId,
        cohort: i32,
        graduation_year: i32,
        schedule_track: Option<ScheduleTrack>,
        stops: Vec<TrajectoryStop>,
    ) -> Self {
        let mut stops = stops;
        stops.sort_by(TrajectoryStop::chronological);
        Self {
            student_id,
            cohort,
            graduation_year,
            schedule_track,
            stops,
        }
    }

    /// Empty when the graduate never enrolled again.
    pub fn stops(&self) -> &[TrajectoryStop] {
        &self.stops
    }

    pub fn reentered(&self) -> bool {
        !self.stops.is_empty()
    }

    pub fn first_stop(&self) -> Option<&TrajectoryStop> {
        self.stops.first()
    }

    /// Years from graduation to the first later enrollment.
    pub fn reentry_years(&self) -> Option<i32> {
        self.first_stop()
            .map(|s| s.entry_year - self.graduation_year)
    }

    pub fn reentry_interval(&self) -> Option<RestInterval> {
        self.reentry_years().map(RestInterval::from_years)
    }

    /// Level of the earliest re-entry.
    pub fn first_reentry_level(&self) -> Option<ProgramLevel> {
        self.stops.iter().find_map(|s| s.program_level)
    }

    /// Highest level reached after graduating.
    pub fn highest_reentry_level(&self) -> Option<ProgramLevel> {
        self.stops.iter().filter_map(|s| s.program_level).max()
    }

    /// (level, years since graduation) for every stop with a known level.
    pub fn reentry_delays(&self) -> Vec<(ProgramLevel, i32)> {
        self.stops
            .iter()
            .filter_map(|s| {
                s.program_level
                    .map(|level| (level, s.entry_year - self.graduation_year))
            })
            .collect()
    }
}

/// Build one trajectory per record-based graduate.
///
/// `records` may hold any student's rows at any institution. Graduates with
/// no later enrollment still get an (empty) trajectory so they count in
/// route totals.
pub fn aggregate_post_graduation(
    graduates: &[DepartureEvent],
    index: &GraduationIndex,
    records: &[EnrollmentRecord],
    cohorts: &CohortTable,
    config: &AttritionConfig,
) -> Vec<GraduateTrajectory> {
    let graduation_years: BTreeMap<StudentId, i32> = graduates
        .iter()
        .filter_map(|e| {
            let year = index.home_graduation_year(e.student_id);
            if year.is_none() {
                tracing::debug!(student = %e.student_id, "Graduate without a titled home record");
            }
            year.map(|y| (e.student_id, y))
        })
        .collect();

    let mut later: BTreeMap<StudentId, Vec<&EnrollmentRecord>> = BTreeMap::new();
    let mut seen = HashSet::new();
    for record in records {
        let Some(&year) = graduation_years.get(&record.student_id) else {
            continue;
        };
        if record.period_year <= year || config.is_sentinel_year(record.period_year) {
            continue;
        }
        if seen.insert(record.dedup_key()) {
            later.entry(record.student_id).or_default().push(record);
        }
    }

    let mut trajectories = Vec::with_capacity(graduation_years.len());
    for event in graduates {
        let Some(&year) = graduation_years.get(&event.student_id) else {
            continue;
        };
        let stops = later
            .remove(&event.student_id)
            .map(collapse_stops)
            .unwrap_or_default();
        let track = cohorts.get(event.student_id).and_then(|a| a.schedule_track);
        trajectories.push(GraduateTrajectory::new(
            event.student_id,
            event.cohort,
            year,
            track,
            stops,
        ));
    }

    tracing::info!(
        graduates = trajectories.len(),
        reentered = trajectories.iter().filter(|t| t.reentered()).count(),
        "Post-graduation trajectories aggregated"
    );

    trajectories
}

// ── Output frames ───────────────────────────────────────────────────────────

/// One row per graduate, per-stop attributes as separator-joined lists.
pub fn graduate_trajectory_frame(
    trajectories: &[GraduateTrajectory],
    separator: &str,
) -> Result<DataFrame> {
    let lists = trajectories
        .iter()
        .map(|t| flatten_stops(t.stops(), separator, t.student_id))
        .collect::<Result<Vec<_>>>()?;

    let students: Vec<i64> = trajectories.iter().map(|t| t.student_id.0).collect();
    let cohorts: Vec<i32> = trajectories.iter().map(|t| t.cohort).collect();
    let years: Vec<i32> = trajectories.iter().map(|t| t.graduation_year).collect();
    let tracks: Vec<Option<&str>> = trajectories
        .iter()
        .map(|t| t.schedule_track.map(|s| s.as_str()))
        .collect();
    let reentry_years: Vec<Option<i32>> = trajectories.iter().map(|t| t.reentry_years()).collect();
    let intervals: Vec<Option<&str>> = trajectories
        .iter()
        .map(|t| t.reentry_interval().map(|r| r.as_str()))
        .collect();
    let first: Vec<Option<&str>> = trajectories
        .iter()
        .map(|t| t.first_reentry_level().map(|l| l.as_str()))
        .collect();
    let highest: Vec<Option<&str>> = trajectories
        .iter()
        .map(|t| t.highest_reentry_level().map(|l| l.as_str()))
        .collect();

    let mut columns = vec![
        Column::new(graduate::STUDENT_ID.into(), &students),
        Column::new(graduate::COHORT.into(), &cohorts),
        Column::new(graduate::GRADUATION_YEAR.into(), &years),
        Column::new(graduate::SCHEDULE_TRACK.into(), &tracks),
    ];
    for (i, name) in trajectory::LISTS.iter().enumerate() {
        let values: Vec<&str> = lists.iter().map(|l| l[i].as_str()).collect();
        columns.push(Column::new((*name).into(), &values));
    }
    columns.push(Column::new(graduate::REENTRY_YEARS.into(), &reentry_years));
    columns.push(Column::new(graduate::REENTRY_INTERVAL.into(), &intervals));
    columns.push(Column::new(graduate::FIRST_REENTRY_LEVEL.into(), &first));
    columns.push(Column::new(graduate::HIGHEST_REENTRY_LEVEL.into(), &highest));

    Ok(DataFrame::new(columns)?)
}

/// One row per post-graduation stop.
pub fn graduate_stops_frame(trajectories: &[GraduateTrajectory]) -> Result<DataFrame> {
    stop_rows_frame(trajectories.iter().map(|t| (t.student_id, t.stops())))
}

/// Graduates that re-entered, counted by first and by highest level.
pub fn reentry_level_frame(trajectories: &[GraduateTrajectory]) -> Result<DataFrame> {
    let count = |pick: fn(&GraduateTrajectory) -> Option<ProgramLevel>, level: ProgramLevel| {
        trajectories.iter().filter(|t| pick(*t) == Some(level)).count() as u64
    };
    let labels: Vec<&str> = LEVELS.iter().map(|l| l.as_str()).collect();
    let first: Vec<u64> = LEVELS
        .iter()
        .map(|&l| count(GraduateTrajectory::first_reentry_level, l))
        .collect();
    let highest: Vec<u64> = LEVELS
        .iter()
        .map(|&l| count(GraduateTrajectory::highest_reentry_level, l))
        .collect();

    let df = DataFrame::new(vec![
        Column::new(reentry::LEVEL.into(), &labels),
        Column::new(reentry::FIRST_REENTRY.into(), &first),
        Column::new(reentry::HIGHEST_REENTRY.into(), &highest),
    ])?;
    Ok(df)
}

/// Delay from graduation to each later enrollment, by cohort and level.
/// Every stop is one observation.
pub fn reentry_delay_frame(trajectories: &[GraduateTrajectory]) -> Result<DataFrame> {
    let mut delays: BTreeMap<(i32, ProgramLevel), Vec<i32>> = BTreeMap::new();
    for t in trajectories {
        for (level, delay) in t.reentry_delays() {
            delays.entry((t.cohort, level)).or_default().push(delay);
        }
    }

    let mut cohorts = Vec::with_capacity(delays.len());
    let mut levels = Vec::with_capacity(delays.len());
    let mut counts = Vec::with_capacity(delays.len());
    let mut means = Vec::with_capacity(delays.len());
    let mut medians = Vec::with_capacity(delays.len());
    let mut mins = Vec::with_capacity(delays.len());
    let mut maxes = Vec::with_capacity(delays.len());

    for ((cohort, level), mut values) in delays {
        values.sort_unstable();
        let n = values.len();
        let mean = values.iter().map(|&v| v as f64).sum::<f64>() / n as f64;
        let median = if n % 2 == 1 {
            values[n / 2] as f64
        } else {
            (values[n / 2 - 1] + values[n / 2]) as f64 / 2.0
        };

        cohorts.push(cohort);
        levels.push(level.as_str());
        counts.push(n as u64);
        means.push((mean * 100.0).round() / 100.0);
        medians.push(median);
        mins.push(values[0]);
        maxes.push(values[n - 1]);
    }

    let df = DataFrame::new(vec![
        Column::new(reentry::COHORT.into(), &cohorts),
        Column::new(reentry::LEVEL.into(), &levels),
        Column::new(reentry::TRAJECTORIES.into(), &counts),
        Column::new(reentry::MEAN_DELAY.into(), &means),
        Column::new(reentry::MEDIAN_DELAY.into(), &medians),
        Column::new(reentry::MIN_DELAY.into(), &mins),
        Column::new(reentry::MAX_DELAY.into(), &maxes),
    ])?;
    Ok(df)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::GraduationRecord;

    fn graduate(student: i64, cohort: i32) -> DepartureEvent {
        DepartureEvent {
            student_id: StudentId(student),
            cohort,
            last_home_year: 2019,
            first_absence_year: 2020,
        }
    }

    fn rec(
        student: i64,
        year: i32,
        inst: i64,
        program: &str,
        level: ProgramLevel,
    ) -> EnrollmentRecord {
        EnrollmentRecord::new(StudentId(student), year, inst)
            .with_program(program)
            .with_level(level)
    }

    fn titled(student: i64, year: i32) -> GraduationRecord {
        GraduationRecord::new(StudentId(student), year, 104, Some("Contador Auditor"))
    }

    fn build(
        graduates: &[DepartureEvent],
        grads: &[GraduationRecord],
        records: &[EnrollmentRecord],
    ) -> Vec<GraduateTrajectory> {
        let index = GraduationIndex::build(grads, 104);
        aggregate_post_graduation(
            graduates,
            &index,
            records,
            &CohortTable::default(),
            &AttritionConfig::default(),
        )
    }

    #[test]
    fn only_enrollments_after_the_graduation_year_count() {
        use ProgramLevel::*;
        let records = vec![
            rec(1, 2019, 104, "Contador Auditor", Undergraduate),
            rec(1, 2019, 200, "Derecho", Undergraduate),
            rec(1, 2021, 300, "Magíster en Tributación", Graduate),
            rec(1, 2022, 300, "Magíster en Tributación", Graduate),
            rec(1, 2022, 300, "Magíster en Tributación", Graduate),
            rec(1, 2024, 104, "Diplomado en Auditoría", PostTitle),
            rec(1, 9999, 400, "Derecho", Undergraduate),
            rec(7, 2023, 300, "Derecho", Undergraduate),
        ];
        let out = build(&[graduate(1, 2015)], &[titled(1, 2019)], &records);

        assert_eq!(out.len(), 1);
        let t = &out[0];
        assert_eq!(t.graduation_year, 2019);
        let spans: Vec<(i64, i32, i32)> = t
            .stops()
            .iter()
            .map(|s| (s.institution_id, s.entry_year, s.last_year))
            .collect();
        assert_eq!(spans, vec![(300, 2021, 2022), (104, 2024, 2024)]);
        assert_eq!(t.reentry_years(), Some(2));
        assert_eq!(t.reentry_interval(), Some(RestInterval::TwoYears));
        assert_eq!(t.first_reentry_level(), Some(Graduate));
        assert_eq!(t.highest_reentry_level(), Some(Graduate));
        assert_eq!(t.reentry_delays(), vec![(Graduate, 2), (PostTitle, 5)]);
    }

    #[test]
    fn graduates_without_later_enrollment_keep_an_empty_trajectory() {
        let out = build(
            &[graduate(1, 2015), graduate(2, 2015)],
            &[titled(1, 2019), titled(2, 2020)],
            &[],
        );
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|t| !t.reentered()));
        assert_eq!(out[0].reentry_years(), None);
        assert_eq!(out[0].first_reentry_level(), None);
    }

    #[test]
    fn graduates_without_a_home_record_are_skipped() {
        let records = [rec(1, 2021, 300, "Derecho", ProgramLevel::Undergraduate)];
        let out = build(&[graduate(1, 2015)], &[], &records);
        assert!(out.is_empty());
    }

    #[test]
    fn level_and_delay_frames() {
        use ProgramLevel::*;
        let records = vec![
            rec(1, 2021, 300, "Magíster", Graduate),
            rec(2, 2021, 200, "Derecho", Undergraduate),
            rec(2, 2025, 300, "Diplomado", PostTitle),
            rec(3, 2023, 200, "Psicología", Undergraduate),
        ];
        let out = build(
            &[graduate(1, 2015), graduate(2, 2015), graduate(3, 2015), graduate(4, 2016)],
            &[titled(1, 2019), titled(2, 2020), titled(3, 2020), titled(4, 2021)],
            &records,
        );

        let levels = reentry_level_frame(&out).unwrap();
        assert_eq!(levels.height(), 3);
        let first: Vec<Option<u64>> = levels
            .column(reentry::FIRST_REENTRY)
            .unwrap()
            .u64()
            .unwrap()
            .into_iter()
            .collect();
        let highest: Vec<Option<u64>> = levels
            .column(reentry::HIGHEST_REENTRY)
            .unwrap()
            .u64()
            .unwrap()
            .into_iter()
            .collect();
        // undergraduate, post_title, graduate
        assert_eq!(first, vec![Some(2), Some(0), Some(1)]);
        assert_eq!(highest, vec![Some(1), Some(1), Some(1)]);

        let delays = reentry_delay_frame(&out).unwrap();
        // (2015, undergraduate): delays 1 and 3.
        assert_eq!(delays.height(), 3);
        let row = delays
            .clone()
            .lazy()
            .filter(col(reentry::LEVEL).eq(lit("undergraduate")))
            .collect()
            .unwrap();
        let value = |name: &str| row.column(name).unwrap().cast(&DataType::Float64).unwrap();
        assert_eq!(value(reentry::TRAJECTORIES).f64().unwrap().get(0), Some(2.0));
        assert_eq!(value(reentry::MEAN_DELAY).f64().unwrap().get(0), Some(2.0));
        assert_eq!(value(reentry::MEDIAN_DELAY).f64().unwrap().get(0), Some(2.0));
        assert_eq!(value(reentry::MIN_DELAY).f64().unwrap().get(0), Some(1.0));
        assert_eq!(value(reentry::MAX_DELAY).f64().unwrap().get(0), Some(3.0));

        let flat = graduate_trajectory_frame(&out, " | ").unwrap();
        assert_eq!(flat.height(), 4);
        let programs = flat.column(trajectory::PROGRAMS).unwrap().str().unwrap();
        assert_eq!(programs.get(1), Some("Derecho | Diplomado"));
        assert_eq!(programs.get(3), Some(""));

        assert_eq!(graduate_stops_frame(&out).unwrap().height(), 4);
    }
}
