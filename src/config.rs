//! Run configuration: home institution, cohort bounds and graduation rules.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AttritionError, Result};
use crate::feeds::EnrollmentQuery;
use crate::model::ScheduleTrack;

/// Institution code of ECAS in the national enrollment registry.
pub const DEFAULT_HOME_INSTITUTION: i64 = 104;

/// Placeholder years the registry uses for missing entry dates.
pub const DEFAULT_INVALID_YEARS: [i32; 2] = [1900, 9999];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AttritionConfig {
    pub home_institution_id: i64,
    pub cohort_min_year: i32,
    pub cohort_max_year: i32,
    pub invalid_years: Vec<i32>,
    pub graduation: GraduationRules,
    pub trajectory: TrajectoryFormat,
    /// Extra filters narrowing which home-institution enrollments define the
    /// studied population. The institution itself is always forced to the
    /// home institution.
    pub home_scope: EnrollmentQuery,
}

impl Default for AttritionConfig {
    fn default() -> Self {
        Self {
            home_institution_id: DEFAULT_HOME_INSTITUTION,
            cohort_min_year: 2007,
            cohort_max_year: 2025,
            invalid_years: DEFAULT_INVALID_YEARS.to_vec(),
            graduation: GraduationRules::default(),
            trajectory: TrajectoryFormat::default(),
            home_scope: EnrollmentQuery::default(),
        }
    }
}

impl AttritionConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        tracing::debug!(path = %path.display(), "Loading attrition config");
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cohort_min_year > self.cohort_max_year {
            return Err(AttritionError::Validation(format!(
                "cohort_min_year {} is after cohort_max_year {}",
                self.cohort_min_year, self.cohort_max_year
            )));
        }
        self.graduation.validate()?;
        if self.trajectory.separator.trim().is_empty() {
            return Err(AttritionError::Validation(
                "trajectory separator must contain a visible character".into(),
            ));
        }
        Ok(())
    }

    /// True for years the registry uses as "unknown".
    pub fn is_sentinel_year(&self, year: i32) -> bool {
        self.invalid_years.contains(&year)
    }

    /// Entry years outside the bounds or equal to a sentinel never form a cohort.
    pub fn is_valid_cohort_year(&self, year: i32) -> bool {
        !self.is_sentinel_year(year)
            && (self.cohort_min_year..=self.cohort_max_year).contains(&year)
    }

    /// The home scope with the institution pinned to the home institution.
    pub fn home_query(&self) -> EnrollmentQuery {
        let mut query = self.home_scope.clone();
        query.institution_id = Some(self.home_institution_id);
        query
    }
}

// ── Graduation rules ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GraduationPolicy {
    /// Only a titled graduation record at the home institution counts.
    #[default]
    Exact,
    /// Titled record first; otherwise enrolled years compared against the
    /// nominal duration table. For datasets with incomplete graduation feeds.
    ExactWithDurationFallback,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GraduationRules {
    pub policy: GraduationPolicy,
    /// First cohort year studying under the shortened curriculum.
    pub new_plan_from_year: i32,
    pub nominal_years: NominalYears,
}

impl Default for GraduationRules {
    fn default() -> Self {
        Self {
            policy: GraduationPolicy::Exact,
            new_plan_from_year: 2021,
            nominal_years: NominalYears::default(),
        }
    }
}

impl GraduationRules {
    pub fn uses_duration_fallback(&self) -> bool {
        self.policy == GraduationPolicy::ExactWithDurationFallback
    }

    /// Nominal program length in years for a cohort on a given track.
    pub fn nominal_years_for(&self, cohort: i32, track: ScheduleTrack) -> f64 {
        let new_plan = cohort >= self.new_plan_from_year;
        let table = &self.nominal_years;
        match (track, new_plan) {
            (ScheduleTrack::Day, false) => table.day_old,
            (ScheduleTrack::Evening, false) => table.evening_old,
            (ScheduleTrack::Day, true) => table.day_new,
            (ScheduleTrack::Evening, true) => table.evening_new,
        }
    }

    fn validate(&self) -> Result<()> {
        let t = &self.nominal_years;
        for (name, value) in [
            ("day_old", t.day_old),
            ("evening_old", t.evening_old),
            ("day_new", t.day_new),
            ("evening_new", t.evening_new),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(AttritionError::Validation(format!(
                    "nominal_years.{name} must be positive, got {value}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NominalYears {
    pub day_old: f64,
    pub evening_old: f64,
    pub day_new: f64,
    pub evening_new: f64,
}

impl Default for NominalYears {
    fn default() -> Self {
        Self {
            day_old: 4.5,
            evening_old: 5.0,
            day_new: 4.0,
            evening_new: 4.5,
        }
    }
}

// ── Trajectory serialization ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrajectoryFormat {
    /// Joins per-stop values in the flat persisted form.
    pub separator: String,
}

impl Default for TrajectoryFormat {
    fn default() -> Self {
        Self {
            separator: " | ".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_registry_constants() {
        let config = AttritionConfig::default();
        assert_eq!(config.home_institution_id, 104);
        assert!(config.is_valid_cohort_year(2007));
        assert!(config.is_valid_cohort_year(2025));
        assert!(!config.is_valid_cohort_year(2006));
        assert!(!config.is_valid_cohort_year(1900));
        assert!(config.is_sentinel_year(9999));
        assert_eq!(config.graduation.policy, GraduationPolicy::Exact);
    }

    #[test]
    fn nominal_years_depend_on_plan_and_track() {
        let rules = GraduationRules::default();
        assert_eq!(rules.nominal_years_for(2015, ScheduleTrack::Day), 4.5);
        assert_eq!(rules.nominal_years_for(2015, ScheduleTrack::Evening), 5.0);
        assert_eq!(rules.nominal_years_for(2021, ScheduleTrack::Day), 4.0);
        assert_eq!(rules.nominal_years_for(2023, ScheduleTrack::Evening), 4.5);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = AttritionConfig::from_toml_str(
            r#"
            cohort_min_year = 2010

            [graduation]
            policy = "exact_with_duration_fallback"

            [home_scope]
            schedule_tracks = ["day", "evening"]
            duration_semesters = [8, 10]
            "#,
        )
        .unwrap();

        assert_eq!(config.cohort_min_year, 2010);
        assert_eq!(config.cohort_max_year, 2025);
        assert!(config.graduation.uses_duration_fallback());
        assert_eq!(config.graduation.nominal_years.evening_old, 5.0);
        assert_eq!(config.home_scope.schedule_tracks.len(), 2);
        assert_eq!(config.home_query().institution_id, Some(104));
    }

    #[test]
    fn inverted_bounds_are_rejected() {
        let err = AttritionConfig::from_toml_str("cohort_min_year = 2030").unwrap_err();
        assert!(matches!(err, AttritionError::Validation(_)));
    }

    #[test]
    fn non_positive_nominal_years_are_rejected() {
        let err = AttritionConfig::from_toml_str(
            r#"
            [graduation.nominal_years]
            day_new = 0.0
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("day_new"));
    }

    #[test]
    fn malformed_toml_is_a_config_error() {
        let err = AttritionConfig::from_toml_str("home_institution_id = \"ecas\"").unwrap_err();
        assert!(matches!(err, AttritionError::Config(_)));
    }
}
