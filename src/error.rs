use thiserror::Error;

#[derive(Error, Debug)]
pub enum AttritionError {
    #[error("Data not loaded: {0}")]
    NotLoaded(String),

    #[error("Missing column: {0}")]
    MissingColumn(String),

    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("InvalidData: {0}")]
    InvalidData(String),

    #[error("Validation: {0}")]
    Validation(String),

    /// The home-institution fact set has no usable period year, so no
    /// departure can be confirmed against it.
    #[error(
        "No valid period year in {records} home-institution records; \
         cannot establish max observed year"
    )]
    MissingMaxYear { records: usize },

    #[error("Trajectory parse error: {0}")]
    TrajectoryParse(String),

    #[error("{0}")]
    General(String),
}

pub type Result<T> = std::result::Result<T, AttritionError>;

#[cfg(feature = "python")]
mod py {
    use super::AttritionError;
    use pyo3::exceptions::PyRuntimeError;
    use pyo3::PyErr;

    impl From<AttritionError> for PyErr {
        fn from(err: AttritionError) -> PyErr {
            PyRuntimeError::new_err(err.to_string())
        }
    }

    impl From<PyErr> for AttritionError {
        fn from(err: PyErr) -> Self {
            AttritionError::General(err.to_string())
        }
    }
}
