//! Enrollment and graduation fact sources.
//!
//! The classification stages never talk to storage directly: they ask a
//! source for typed records once per run, using an [`EnrollmentQuery`] as the
//! filter object. Sources exist for in-memory record vectors and for polars
//! `DataFrame`s (typically loaded from the CSV exports of the unified views).

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use polars::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{AttritionError, Result};
use crate::model::{
    fold_label, EnrollmentRecord, GraduationRecord, ProgramLevel, ScheduleTrack, StudentId,
};
use crate::schema::{enrollment, graduation};

// ── Query parameters ────────────────────────────────────────────────────────

/// Typed filter over the enrollment feed. Unset fields do not filter.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EnrollmentQuery {
    pub institution_id: Option<i64>,
    /// Inclusive period-year range.
    pub period_years: Option<(i32, i32)>,
    /// Inclusive program entry-year range.
    pub entry_years: Option<(i32, i32)>,
    pub schedule_tracks: Vec<ScheduleTrack>,
    /// Case- and accent-insensitive substring of the program name.
    pub program_contains: Option<String>,
    /// Inclusive nominal duration range, in semesters.
    pub duration_semesters: Option<(i32, i32)>,
    #[serde(skip)]
    pub students: Option<BTreeSet<StudentId>>,
}

impl EnrollmentQuery {
    pub fn for_institution(institution_id: i64) -> Self {
        Self {
            institution_id: Some(institution_id),
            ..Default::default()
        }
    }

    /// Every record of the given students, at any institution.
    pub fn for_students(students: impl IntoIterator<Item = StudentId>) -> Self {
        Self {
            students: Some(students.into_iter().collect()),
            ..Default::default()
        }
    }

    pub fn matches(&self, record: &EnrollmentRecord) -> bool {
        if self
            .institution_id
            .is_some_and(|id| id != record.institution_id)
        {
            return false;
        }
        if let Some((lo, hi)) = self.period_years {
            if !(lo..=hi).contains(&record.period_year) {
                return false;
            }
        }
        if let Some((lo, hi)) = self.entry_years {
            match record.program_entry_year {
                Some(year) if (lo..=hi).contains(&year) => {}
                _ => return false,
            }
        }
        if !self.schedule_tracks.is_empty() {
            match record.schedule_track {
                Some(track) if self.schedule_tracks.contains(&track) => {}
                _ => return false,
            }
        }
        if let Some(pattern) = &self.program_contains {
            let pattern = fold_label(pattern);
            match &record.program_name {
                Some(name) if fold_label(name).contains(&pattern) => {}
                _ => return false,
            }
        }
        if let Some((lo, hi)) = self.duration_semesters {
            match record.nominal_duration {
                Some(d) if (lo..=hi).contains(&d) => {}
                _ => return false,
            }
        }
        if let Some(students) = &self.students {
            if !students.contains(&record.student_id) {
                return false;
            }
        }
        true
    }

    /// Push the numeric filters down into a lazy frame. String filters are
    /// applied by [`EnrollmentQuery::matches`] after conversion.
    pub fn apply(&self, lazy: LazyFrame) -> LazyFrame {
        let mut lazy = lazy;

        if let Some(id) = self.institution_id {
            lazy = lazy.filter(col(enrollment::INSTITUTION_ID).eq(lit(id)));
        }
        if let Some((lo, hi)) = self.period_years {
            lazy = lazy.filter(
                col(enrollment::PERIOD_YEAR)
                    .gt_eq(lit(lo as i64))
                    .and(col(enrollment::PERIOD_YEAR).lt_eq(lit(hi as i64))),
            );
        }
        if let Some((lo, hi)) = self.entry_years {
            lazy = lazy.filter(
                col(enrollment::PROGRAM_ENTRY_YEAR)
                    .gt_eq(lit(lo as i64))
                    .and(col(enrollment::PROGRAM_ENTRY_YEAR).lt_eq(lit(hi as i64))),
            );
        }
        if let Some((lo, hi)) = self.duration_semesters {
            lazy = lazy.filter(
                col(enrollment::NOMINAL_DURATION)
                    .gt_eq(lit(lo as i64))
                    .and(col(enrollment::NOMINAL_DURATION).lt_eq(lit(hi as i64))),
            );
        }
        if let Some(students) = &self.students {
            let ids: Vec<i64> = students.iter().map(|s| s.0).collect();
            let ids = Series::new(enrollment::STUDENT_ID.into(), ids);
            lazy = lazy.filter(col(enrollment::STUDENT_ID).is_in(lit(ids), false));
        }

        lazy
    }
}

// ── Source traits ───────────────────────────────────────────────────────────

pub trait EnrollmentSource {
    fn enrollments(&self, query: &EnrollmentQuery) -> Result<Vec<EnrollmentRecord>>;
}

pub trait GraduationSource {
    fn graduations(&self) -> Result<Vec<GraduationRecord>>;
}

impl EnrollmentSource for [EnrollmentRecord] {
    fn enrollments(&self, query: &EnrollmentQuery) -> Result<Vec<EnrollmentRecord>> {
        Ok(self.iter().filter(|r| query.matches(r)).cloned().collect())
    }
}

impl EnrollmentSource for Vec<EnrollmentRecord> {
    fn enrollments(&self, query: &EnrollmentQuery) -> Result<Vec<EnrollmentRecord>> {
        self.as_slice().enrollments(query)
    }
}

impl GraduationSource for [GraduationRecord] {
    fn graduations(&self) -> Result<Vec<GraduationRecord>> {
        Ok(self.to_vec())
    }
}

impl GraduationSource for Vec<GraduationRecord> {
    fn graduations(&self) -> Result<Vec<GraduationRecord>> {
        Ok(self.clone())
    }
}

// ── DataFrame-backed sources ────────────────────────────────────────────────

/// Enrollment feed held as a normalized polars frame (integer columns cast
/// to Int64, everything else kept as strings).
#[derive(Debug, Clone)]
pub struct EnrollmentFrame {
    df: DataFrame,
}

impl EnrollmentFrame {
    pub fn new(df: DataFrame) -> Result<Self> {
        require_columns(&df, &enrollment::REQUIRED)?;
        reject_non_integer(&df, &enrollment::REQUIRED)?;
        let df = cast_integer_columns(df, &enrollment::INTEGER)?;
        Ok(Self { df })
    }

    pub fn frame(&self) -> &DataFrame {
        &self.df
    }

    pub fn height(&self) -> usize {
        self.df.height()
    }
}

impl EnrollmentSource for EnrollmentFrame {
    fn enrollments(&self, query: &EnrollmentQuery) -> Result<Vec<EnrollmentRecord>> {
        let filtered = query.apply(self.df.clone().lazy()).collect()?;
        let records = enrollment_records(&filtered)?;
        Ok(records.into_iter().filter(|r| query.matches(r)).collect())
    }
}

#[derive(Debug, Clone)]
pub struct GraduationFrame {
    df: DataFrame,
}

impl GraduationFrame {
    pub fn new(df: DataFrame) -> Result<Self> {
        require_columns(&df, &graduation::REQUIRED)?;
        reject_non_integer(&df, &graduation::REQUIRED)?;
        let df = cast_integer_columns(df, &graduation::INTEGER)?;
        Ok(Self { df })
    }

    pub fn frame(&self) -> &DataFrame {
        &self.df
    }
}

impl GraduationSource for GraduationFrame {
    fn graduations(&self) -> Result<Vec<GraduationRecord>> {
        graduation_records(&self.df)
    }
}

/// Convert a normalized enrollment frame into typed records. Rows with a
/// blank student, period or institution are dropped.
pub fn enrollment_records(df: &DataFrame) -> Result<Vec<EnrollmentRecord>> {
    let students = int_values(df, enrollment::STUDENT_ID)?;
    let periods = int_values(df, enrollment::PERIOD_YEAR)?;
    let institutions = int_values(df, enrollment::INSTITUTION_ID)?;
    let durations = int_values(df, enrollment::NOMINAL_DURATION)?;
    let entry_years = int_values(df, enrollment::PROGRAM_ENTRY_YEAR)?;
    let institution_names = str_values(df, enrollment::INSTITUTION_NAME)?;
    let programs = str_values(df, enrollment::PROGRAM_NAME)?;
    let areas = str_values(df, enrollment::KNOWLEDGE_AREA)?;
    let tracks = str_values(df, enrollment::SCHEDULE_TRACK)?;
    let tiers_1 = str_values(df, enrollment::INSTITUTION_TIER_1)?;
    let tiers_2 = str_values(df, enrollment::INSTITUTION_TIER_2)?;
    let tiers_3 = str_values(df, enrollment::INSTITUTION_TIER_3)?;
    let requirements = str_values(df, enrollment::ADMISSION_REQUIREMENT)?;
    let levels = str_values(df, enrollment::PROGRAM_LEVEL)?;

    let mut records = Vec::with_capacity(df.height());
    let mut dropped = 0usize;

    for i in 0..df.height() {
        let (Some(student), Some(period), Some(institution)) = (
            students[i],
            periods[i].and_then(to_year),
            institutions[i],
        ) else {
            dropped += 1;
            continue;
        };

        records.push(EnrollmentRecord {
            student_id: StudentId(student),
            period_year: period,
            institution_id: institution,
            institution_name: institution_names[i].clone(),
            program_name: programs[i].clone(),
            knowledge_area: areas[i].clone(),
            schedule_track: tracks[i].as_deref().and_then(ScheduleTrack::parse),
            nominal_duration: durations[i].and_then(to_year),
            program_entry_year: entry_years[i].and_then(to_year),
            institution_tiers: [tiers_1[i].clone(), tiers_2[i].clone(), tiers_3[i].clone()],
            admission_requirement: requirements[i].clone(),
            program_level: levels[i].as_deref().and_then(ProgramLevel::parse),
        });
    }

    if dropped > 0 {
        tracing::warn!(dropped, "Enrollment rows without student, period or institution");
    }

    Ok(records)
}

pub fn graduation_records(df: &DataFrame) -> Result<Vec<GraduationRecord>> {
    let students = int_values(df, graduation::STUDENT_ID)?;
    let periods = int_values(df, graduation::PERIOD_YEAR)?;
    let institutions = int_values(df, graduation::INSTITUTION_ID)?;
    let programs = str_values(df, graduation::PROGRAM_NAME)?;
    let titles = str_values(df, graduation::DEGREE_TITLE)?;

    let mut records = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let (Some(student), Some(period), Some(institution)) = (
            students[i],
            periods[i].and_then(to_year),
            institutions[i],
        ) else {
            continue;
        };
        records.push(GraduationRecord {
            student_id: StudentId(student),
            period_year: period,
            institution_id: institution,
            program_name: programs[i].clone(),
            degree_title: titles[i].clone(),
        });
    }
    Ok(records)
}

// ── CSV loading ─────────────────────────────────────────────────────────────

/// Reads feed exports relative to a base directory.
#[derive(Debug, Clone)]
pub struct FeedLoader {
    base_path: PathBuf,
}

impl FeedLoader {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn load_enrollments(&self, filename: &str) -> Result<EnrollmentFrame> {
        let df = self.read_csv_as_strings(filename, None)?;
        tracing::info!(file = filename, rows = df.height(), "Loaded enrollment feed");
        EnrollmentFrame::new(df)
    }

    pub fn load_graduations(&self, filename: &str) -> Result<GraduationFrame> {
        let df = self.read_csv_as_strings(filename, None)?;
        tracing::info!(file = filename, rows = df.height(), "Loaded graduation feed");
        GraduationFrame::new(df)
    }

    /// Read a CSV file with all columns as String dtype.
    /// Trims whitespace from column names and applies optional rename.
    pub fn read_csv_as_strings(
        &self,
        filename: &str,
        rename: Option<HashMap<String, String>>,
    ) -> Result<DataFrame> {
        let path = self.base_path.join(filename);
        let mut df = CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(Some(0)) // all columns as String
            .try_into_reader_with_file_path(Some(path))?
            .finish()?;

        let trimmed: Vec<String> = df
            .get_column_names_str()
            .iter()
            .map(|c| c.trim().to_string())
            .collect();
        df.set_column_names(trimmed.as_slice())?;

        if let Some(map) = rename {
            let old: Vec<&str> = map.keys().map(|s| s.as_str()).collect();
            let new: Vec<&str> = map.values().map(|s| s.as_str()).collect();
            df = df.lazy().rename(old, new, true).collect()?;
        }

        Ok(df)
    }
}

// ── Private helpers ─────────────────────────────────────────────────────────

fn require_columns(df: &DataFrame, required: &[&str]) -> Result<()> {
    for &col_name in required {
        if df.column(col_name).is_err() {
            return Err(AttritionError::MissingColumn(col_name.to_string()));
        }
    }
    Ok(())
}

/// Identifier columns must hold integers; blanks are allowed and later
/// dropped, anything else means the export is corrupt.
fn reject_non_integer(df: &DataFrame, names: &[&str]) -> Result<()> {
    for &name in names {
        let Ok(column) = df.column(name) else {
            continue;
        };
        if column.dtype() != &DataType::String {
            continue;
        }
        let bad = column
            .str()?
            .into_iter()
            .enumerate()
            .filter_map(|(row, v)| v.map(|v| (row, v.trim())))
            .find(|(_, v)| !v.is_empty() && v.parse::<i64>().is_err());
        if let Some((row, value)) = bad {
            return Err(AttritionError::InvalidData(format!(
                "column {name}, row {row}: '{value}' is not an integer"
            )));
        }
    }
    Ok(())
}

/// Cast the listed columns (when present) to Int64. String columns are
/// stripped first; unparseable values become null.
fn cast_integer_columns(df: DataFrame, names: &[&str]) -> Result<DataFrame> {
    let exprs: Vec<Expr> = names
        .iter()
        .filter_map(|&name| {
            let column = df.column(name).ok()?;
            let expr = if column.dtype() == &DataType::String {
                col(name)
                    .str()
                    .strip_chars(lit(" \t\r\n"))
                    .cast(DataType::Int64)
            } else {
                col(name).cast(DataType::Int64)
            };
            Some(expr)
        })
        .collect();

    if exprs.is_empty() {
        return Ok(df);
    }
    Ok(df.lazy().with_columns(exprs).collect()?)
}

fn int_values(df: &DataFrame, name: &str) -> Result<Vec<Option<i64>>> {
    match df.column(name) {
        Ok(column) => Ok(column.i64()?.into_iter().collect()),
        Err(_) => Ok(vec![None; df.height()]),
    }
}

/// String values with blanks mapped to None.
fn str_values(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>> {
    let Ok(column) = df.column(name) else {
        return Ok(vec![None; df.height()]);
    };
    let column = column.cast(&DataType::String)?;
    let values = column
        .str()?
        .into_iter()
        .map(|v| {
            v.map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        })
        .collect();
    Ok(values)
}

fn to_year(value: i64) -> Option<i32> {
    i32::try_from(value).ok()
}
