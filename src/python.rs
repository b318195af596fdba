use std::collections::HashMap;

use pyo3::prelude::*;
use pyo3::types::PyModule;
use pyo3_polars::PyDataFrame;

use crate::config::AttritionConfig;
use crate::error::AttritionError;
use crate::feeds::{EnrollmentFrame, FeedLoader, GraduationFrame};
use crate::pipeline::{AttritionPipeline, AttritionRun};
use crate::schema;
use crate::trajectory::{FlatTrajectory, Trajectory};

const DEFAULT_ENROLLMENT_FILE: &str = "vista_matricula_unificada.csv";
const DEFAULT_GRADUATION_FILE: &str = "vista_titulados_unificada.csv";

#[pyclass]
pub struct AttritionModel {
    loader: FeedLoader,
    pipeline: AttritionPipeline,
    enrollments: Option<EnrollmentFrame>,
    graduations: Option<GraduationFrame>,
    last_run: Option<AttritionRun>,
}

impl AttritionModel {
    fn run_result(&self) -> Result<&AttritionRun, AttritionError> {
        self.last_run
            .as_ref()
            .ok_or_else(|| AttritionError::NotLoaded("no run yet, call run() first".into()))
    }
}

#[pymethods]
impl AttritionModel {
    #[new]
    #[pyo3(signature = (base_path, config_file=None))]
    fn new(base_path: String, config_file: Option<String>) -> PyResult<Self> {
        let loader = FeedLoader::new(base_path);
        let config = match config_file {
            Some(name) => AttritionConfig::load(loader.base_path().join(name))?,
            None => AttritionConfig::default(),
        };
        Ok(Self {
            loader,
            pipeline: AttritionPipeline::new(config)?,
            enrollments: None,
            graduations: None,
            last_run: None,
        })
    }

    // ── Data loading ────────────────────────────────────────────────────────

    /// Load any CSV into a Polars DataFrame with all columns as strings.
    #[pyo3(signature = (filename, rename=None))]
    fn load_csv(
        &self,
        filename: &str,
        rename: Option<HashMap<String, String>>,
    ) -> PyResult<PyDataFrame> {
        Ok(PyDataFrame(self.loader.read_csv_as_strings(filename, rename)?))
    }

    /// Load the unified enrollment export. Integer columns are parsed.
    #[pyo3(signature = (filename=None))]
    fn load_enrollments(&mut self, filename: Option<&str>) -> PyResult<PyDataFrame> {
        let feed = self
            .loader
            .load_enrollments(filename.unwrap_or(DEFAULT_ENROLLMENT_FILE))?;
        let df = feed.frame().clone();
        self.enrollments = Some(feed);
        self.last_run = None;
        Ok(PyDataFrame(df))
    }

    #[pyo3(signature = (filename=None))]
    fn load_graduations(&mut self, filename: Option<&str>) -> PyResult<PyDataFrame> {
        let feed = self
            .loader
            .load_graduations(filename.unwrap_or(DEFAULT_GRADUATION_FILE))?;
        let df = feed.frame().clone();
        self.graduations = Some(feed);
        self.last_run = None;
        Ok(PyDataFrame(df))
    }

    /// Use an already-loaded enrollment frame instead of a CSV file.
    fn set_enrollments(&mut self, df: PyDataFrame) -> PyResult<()> {
        self.enrollments = Some(EnrollmentFrame::new(df.0)?);
        self.last_run = None;
        Ok(())
    }

    fn set_graduations(&mut self, df: PyDataFrame) -> PyResult<()> {
        self.graduations = Some(GraduationFrame::new(df.0)?);
        self.last_run = None;
        Ok(())
    }

    // ── Classification ──────────────────────────────────────────────────────

    /// Run the full classification. Returns the attrition population.
    #[pyo3(signature = (cohort=None))]
    fn run(&mut self, cohort: Option<i32>) -> PyResult<PyDataFrame> {
        let enrollments = self
            .enrollments
            .as_ref()
            .ok_or_else(|| AttritionError::NotLoaded("enrollments".into()))?;
        let graduations = self
            .graduations
            .as_ref()
            .ok_or_else(|| AttritionError::NotLoaded("graduations".into()))?;

        let run = self.pipeline.run(enrollments, graduations, cohort)?;
        let df = run.attrition_frame()?;
        self.last_run = Some(run);
        Ok(PyDataFrame(df))
    }

    fn get_attrition(&self) -> PyResult<PyDataFrame> {
        Ok(PyDataFrame(self.run_result()?.attrition_frame()?))
    }

    fn get_trajectories(&self) -> PyResult<PyDataFrame> {
        Ok(PyDataFrame(self.run_result()?.trajectory_frame()?))
    }

    fn get_trajectory_stops(&self) -> PyResult<PyDataFrame> {
        Ok(PyDataFrame(self.run_result()?.stops_frame()?))
    }

    fn get_summary(&self) -> PyResult<PyDataFrame> {
        Ok(PyDataFrame(self.run_result()?.summary_frame()?))
    }

    fn get_routes(&self) -> PyResult<PyDataFrame> {
        Ok(PyDataFrame(self.run_result()?.route_frame()?))
    }

    fn get_graduate_trajectories(&self) -> PyResult<PyDataFrame> {
        Ok(PyDataFrame(self.run_result()?.graduate_trajectory_frame()?))
    }

    fn get_graduate_stops(&self) -> PyResult<PyDataFrame> {
        Ok(PyDataFrame(self.run_result()?.graduate_stops_frame()?))
    }

    /// Graduates that enrolled again, by first and by highest level.
    fn get_reentry_levels(&self) -> PyResult<PyDataFrame> {
        Ok(PyDataFrame(self.run_result()?.reentry_level_frame()?))
    }

    fn get_reentry_delays(&self) -> PyResult<PyDataFrame> {
        Ok(PyDataFrame(self.run_result()?.reentry_delay_frame()?))
    }

    fn get_graduate_routes(&self) -> PyResult<PyDataFrame> {
        Ok(PyDataFrame(self.run_result()?.graduate_route_frame()?))
    }

    fn diagnostics_json(&self) -> PyResult<String> {
        Ok(self.run_result()?.diagnostics.to_json()?)
    }

    /// Parse one flattened trajectory row back into its structured JSON form.
    #[staticmethod]
    #[pyo3(signature = (
        student_id,
        cohort,
        first_absence_year,
        lists,
        schedule_track=None,
        separator=" | "
    ))]
    fn parse_trajectory(
        student_id: i64,
        cohort: i32,
        first_absence_year: i32,
        lists: Vec<String>,
        schedule_track: Option<String>,
        separator: &str,
    ) -> PyResult<String> {
        let lists: [String; 12] = lists.try_into().map_err(|got: Vec<String>| {
            AttritionError::TrajectoryParse(format!(
                "expected {} lists, got {}",
                schema::trajectory::LISTS.len(),
                got.len()
            ))
        })?;
        let flat = FlatTrajectory {
            student_id,
            cohort,
            first_absence_year,
            schedule_track,
            lists,
        };
        Ok(Trajectory::from_flat(&flat, separator)?.to_json()?)
    }
}

/// Export schema constants as Python submodules
pub fn add_schema_exports(m: &Bound<'_, PyModule>) -> PyResult<()> {
    // Enrollment feed
    let enrollment = PyModule::new(m.py(), "enrollment")?;
    enrollment.add("STUDENT_ID", schema::enrollment::STUDENT_ID)?;
    enrollment.add("PERIOD_YEAR", schema::enrollment::PERIOD_YEAR)?;
    enrollment.add("INSTITUTION_ID", schema::enrollment::INSTITUTION_ID)?;
    enrollment.add("PROGRAM_NAME", schema::enrollment::PROGRAM_NAME)?;
    enrollment.add("SCHEDULE_TRACK", schema::enrollment::SCHEDULE_TRACK)?;
    enrollment.add("PROGRAM_ENTRY_YEAR", schema::enrollment::PROGRAM_ENTRY_YEAR)?;
    enrollment.add("PROGRAM_LEVEL", schema::enrollment::PROGRAM_LEVEL)?;
    m.add_submodule(&enrollment)?;

    // Graduation feed
    let graduation = PyModule::new(m.py(), "graduation")?;
    graduation.add("STUDENT_ID", schema::graduation::STUDENT_ID)?;
    graduation.add("PERIOD_YEAR", schema::graduation::PERIOD_YEAR)?;
    graduation.add("INSTITUTION_ID", schema::graduation::INSTITUTION_ID)?;
    graduation.add("DEGREE_TITLE", schema::graduation::DEGREE_TITLE)?;
    m.add_submodule(&graduation)?;

    // Attrition output
    let attrition = PyModule::new(m.py(), "attrition")?;
    attrition.add("STUDENT_ID", schema::attrition::STUDENT_ID)?;
    attrition.add("COHORT", schema::attrition::COHORT)?;
    attrition.add("FIRST_ABSENCE_YEAR", schema::attrition::FIRST_ABSENCE_YEAR)?;
    attrition.add("CLASSIFICATION", schema::attrition::CLASSIFICATION)?;
    attrition.add(
        "GRADUATED_AFTER_DEPARTURE",
        schema::attrition::GRADUATED_AFTER_DEPARTURE,
    )?;
    m.add_submodule(&attrition)?;

    // Trajectory output
    let trajectory = PyModule::new(m.py(), "trajectory")?;
    trajectory.add("LISTS", schema::trajectory::LISTS.to_vec())?;
    trajectory.add("REST_YEARS", schema::trajectory::REST_YEARS)?;
    trajectory.add("REST_INTERVAL", schema::trajectory::REST_INTERVAL)?;
    trajectory.add(
        "REACHED_ADVANCED_LEVEL",
        schema::trajectory::REACHED_ADVANCED_LEVEL,
    )?;
    m.add_submodule(&trajectory)?;

    // Post-graduation output
    let graduate = PyModule::new(m.py(), "graduate")?;
    graduate.add("GRADUATION_YEAR", schema::graduate::GRADUATION_YEAR)?;
    graduate.add("REENTRY_YEARS", schema::graduate::REENTRY_YEARS)?;
    graduate.add("REENTRY_INTERVAL", schema::graduate::REENTRY_INTERVAL)?;
    graduate.add("FIRST_REENTRY_LEVEL", schema::graduate::FIRST_REENTRY_LEVEL)?;
    graduate.add("HIGHEST_REENTRY_LEVEL", schema::graduate::HIGHEST_REENTRY_LEVEL)?;
    m.add_submodule(&graduate)?;

    // Classification labels
    let classification = PyModule::new(m.py(), "classification")?;
    classification.add("ACTIVE", schema::classification::ACTIVE)?;
    classification.add("GRADUATE", schema::classification::GRADUATE)?;
    classification.add(
        "DESTINATION_FLIGHT",
        schema::classification::DESTINATION_FLIGHT,
    )?;
    classification.add(
        "TOTAL_ABANDONMENT",
        schema::classification::TOTAL_ABANDONMENT,
    )?;
    m.add_submodule(&classification)?;

    Ok(())
}
