pub mod cohort;
pub mod config;
pub mod departure;
pub mod destination;
pub mod error;
pub mod feeds;
pub mod graduation;
pub mod model;
pub mod pipeline;
pub mod post_graduation;
pub mod route_graph;
pub mod schema;
pub mod summary;
pub mod trajectory;

#[cfg(feature = "python")]
mod python;

pub use config::{AttritionConfig, GraduationPolicy};
pub use error::{AttritionError, Result};
pub use feeds::{EnrollmentQuery, EnrollmentSource, FeedLoader, GraduationSource};
pub use model::{Classification, DepartureEvent, EnrollmentRecord, GraduationRecord, StudentId};
pub use pipeline::{AttritionPipeline, AttritionRun};
pub use post_graduation::GraduateTrajectory;
pub use trajectory::{Trajectory, TrajectoryStop};

#[cfg(feature = "python")]
use pyo3::prelude::*;

#[cfg(feature = "python")]
#[pymodule]
fn _core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<python::AttritionModel>()?;
    python::add_schema_exports(m)?;
    Ok(())
}
