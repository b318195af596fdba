use std::fmt;

use serde::{Deserialize, Serialize};

use crate::schema::classification;

/// Student identifier as published in the enrollment and graduation feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StudentId(pub i64);

impl fmt::Display for StudentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lowercase, trim and strip Spanish accents so feed labels compare loosely.
pub(crate) fn fold_label(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'á' => 'a',
            'é' => 'e',
            'í' => 'i',
            'ó' => 'o',
            'ú' | 'ü' => 'u',
            other => other,
        })
        .collect()
}

// ── Schedule track ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleTrack {
    Day,
    Evening,
}

impl ScheduleTrack {
    /// Accepts the feed labels ("Diurna", "Vespertina") and the English names.
    pub fn parse(raw: &str) -> Option<Self> {
        match fold_label(raw).as_str() {
            "diurna" | "diurno" | "day" => Some(Self::Day),
            "vespertina" | "vespertino" | "evening" => Some(Self::Evening),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Evening => "evening",
        }
    }
}

impl fmt::Display for ScheduleTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Program level ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgramLevel {
    Undergraduate,
    PostTitle,
    Graduate,
}

impl ProgramLevel {
    pub fn parse(raw: &str) -> Option<Self> {
        let folded = fold_label(raw);
        match folded.as_str() {
            "pregrado" | "undergraduate" => Some(Self::Undergraduate),
            "postitulo" | "post_title" | "post-title" => Some(Self::PostTitle),
            "postgrado" | "graduate" => Some(Self::Graduate),
            _ if folded.contains("postitulo") => Some(Self::PostTitle),
            _ if folded.contains("postgrado")
                || folded.contains("magister")
                || folded.contains("doctor") =>
            {
                Some(Self::Graduate)
            }
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Undergraduate => "undergraduate",
            Self::PostTitle => "post_title",
            Self::Graduate => "graduate",
        }
    }

    /// Post-title and graduate programs both count as continuing past a first degree.
    pub fn is_advanced(&self) -> bool {
        matches!(self, Self::PostTitle | Self::Graduate)
    }
}

impl fmt::Display for ProgramLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Fact records ────────────────────────────────────────────────────────────

/// One row of the enrollment feed: a student in one program for one period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrollmentRecord {
    pub student_id: StudentId,
    pub period_year: i32,
    pub institution_id: i64,
    pub institution_name: Option<String>,
    pub program_name: Option<String>,
    pub knowledge_area: Option<String>,
    pub schedule_track: Option<ScheduleTrack>,
    /// Nominal program duration in half-year units.
    pub nominal_duration: Option<i32>,
    pub program_entry_year: Option<i32>,
    pub institution_tiers: [Option<String>; 3],
    pub admission_requirement: Option<String>,
    pub program_level: Option<ProgramLevel>,
}

impl EnrollmentRecord {
    pub fn new(student_id: StudentId, period_year: i32, institution_id: i64) -> Self {
        Self {
            student_id,
            period_year,
            institution_id,
            institution_name: None,
            program_name: None,
            knowledge_area: None,
            schedule_track: None,
            nominal_duration: None,
            program_entry_year: None,
            institution_tiers: [None, None, None],
            admission_requirement: None,
            program_level: None,
        }
    }

    pub fn with_entry_year(mut self, year: i32) -> Self {
        self.program_entry_year = Some(year);
        self
    }

    pub fn with_track(mut self, track: ScheduleTrack) -> Self {
        self.schedule_track = Some(track);
        self
    }

    pub fn with_program(mut self, program: &str) -> Self {
        self.program_name = Some(program.to_string());
        self
    }

    pub fn with_institution_name(mut self, name: &str) -> Self {
        self.institution_name = Some(name.to_string());
        self
    }

    pub fn with_level(mut self, level: ProgramLevel) -> Self {
        self.program_level = Some(level);
        self
    }

    pub fn with_duration(mut self, semesters: i32) -> Self {
        self.nominal_duration = Some(semesters);
        self
    }

    pub fn with_area(mut self, area: &str) -> Self {
        self.knowledge_area = Some(area.to_string());
        self
    }

    /// Identity used when collapsing duplicated feed rows.
    pub fn dedup_key(&self) -> (StudentId, i32, i64, Option<&str>) {
        (
            self.student_id,
            self.period_year,
            self.institution_id,
            self.program_name.as_deref(),
        )
    }
}

/// One row of the graduation feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraduationRecord {
    pub student_id: StudentId,
    pub period_year: i32,
    pub institution_id: i64,
    pub program_name: Option<String>,
    pub degree_title: Option<String>,
}

impl GraduationRecord {
    pub fn new(
        student_id: StudentId,
        period_year: i32,
        institution_id: i64,
        degree_title: Option<&str>,
    ) -> Self {
        Self {
            student_id,
            period_year,
            institution_id,
            program_name: None,
            degree_title: degree_title.map(str::to_string),
        }
    }

    /// A record only proves graduation when a degree title was actually awarded.
    pub fn has_title(&self) -> bool {
        self.degree_title
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty())
    }
}

// ── Derived entities ────────────────────────────────────────────────────────

/// A student's entry cohort at the home institution and the program track
/// they entered on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortAssignment {
    pub student_id: StudentId,
    pub cohort: i32,
    pub schedule_track: Option<ScheduleTrack>,
    pub program_name: Option<String>,
}

/// Confirmed permanent absence from the home institution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepartureEvent {
    pub student_id: StudentId,
    pub cohort: i32,
    pub last_home_year: i32,
    pub first_absence_year: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraduationBasis {
    /// Degree title recorded at the home institution.
    Record,
    /// Enrolled long enough to have completed the nominal duration.
    Duration,
}

/// Mutually exclusive outcome for every student with a cohort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Classification {
    Active,
    Graduate { basis: GraduationBasis },
    DestinationFlight,
    TotalAbandonment,
}

impl Classification {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Active => classification::ACTIVE,
            Self::Graduate { .. } => classification::GRADUATE,
            Self::DestinationFlight => classification::DESTINATION_FLIGHT,
            Self::TotalAbandonment => classification::TOTAL_ABANDONMENT,
        }
    }

    pub fn is_attrition(&self) -> bool {
        matches!(self, Self::DestinationFlight | Self::TotalAbandonment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_track_parses_feed_labels() {
        assert_eq!(ScheduleTrack::parse("Diurna"), Some(ScheduleTrack::Day));
        assert_eq!(ScheduleTrack::parse(" VESPERTINA "), Some(ScheduleTrack::Evening));
        assert_eq!(ScheduleTrack::parse("evening"), Some(ScheduleTrack::Evening));
        assert_eq!(ScheduleTrack::parse("A Distancia"), None);
    }

    #[test]
    fn program_level_folds_accents_and_degree_names() {
        assert_eq!(ProgramLevel::parse("Pregrado"), Some(ProgramLevel::Undergraduate));
        assert_eq!(ProgramLevel::parse("Postítulo"), Some(ProgramLevel::PostTitle));
        assert_eq!(ProgramLevel::parse("Postgrado"), Some(ProgramLevel::Graduate));
        assert_eq!(ProgramLevel::parse("Magíster"), Some(ProgramLevel::Graduate));
        assert_eq!(ProgramLevel::parse(""), None);
        assert!(ProgramLevel::PostTitle.is_advanced());
        assert!(!ProgramLevel::Undergraduate.is_advanced());
    }

    #[test]
    fn blank_degree_title_is_not_proof_of_graduation() {
        let id = StudentId(1);
        assert!(GraduationRecord::new(id, 2019, 104, Some("Contador Auditor")).has_title());
        assert!(!GraduationRecord::new(id, 2019, 104, Some("   ")).has_title());
        assert!(!GraduationRecord::new(id, 2019, 104, None).has_title());
    }

    #[test]
    fn classification_serializes_with_kind_tag() {
        let json = serde_json::to_string(&Classification::Graduate {
            basis: GraduationBasis::Duration,
        })
        .unwrap();
        assert!(json.contains("\"kind\":\"graduate\""));
        assert!(json.contains("duration"));
        assert!(Classification::TotalAbandonment.is_attrition());
        assert!(!Classification::Active.is_attrition());
    }
}
