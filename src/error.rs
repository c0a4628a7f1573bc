use crate::fit::SolveError;
use crate::graph::{GraphError, GroupingError};
use crate::math::GeometryError;

/// Error surfaced to the user, carrying the process exit code.
///
/// - 2: invalid input, configuration or I/O
/// - 3: graph/grouping invariant violated
/// - 4: numerical or fatal estimation failure
#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}

impl From<GraphError> for AppError {
    fn from(e: GraphError) -> Self {
        AppError::new(2, format!("Proximity graph error: {e}"))
    }
}

impl From<GroupingError> for AppError {
    fn from(e: GroupingError) -> Self {
        let code = match e {
            GroupingError::InvalidFactor
            | GroupingError::PartitionSize { .. }
            | GroupingError::GroupLabel { .. } => 2,
            _ => 3,
        };
        AppError::new(code, format!("Grouping error: {e}"))
    }
}

impl From<GeometryError> for AppError {
    fn from(e: GeometryError) -> Self {
        AppError::new(2, format!("Geometry error: {e}"))
    }
}

impl From<SolveError> for AppError {
    fn from(e: SolveError) -> Self {
        let code = match e {
            SolveError::MissingData(_) => 2,
            SolveError::EmptyCandidateSet { .. } => 3,
            SolveError::SingularSystem { .. } | SolveError::SolverDiverged { .. } => 4,
        };
        AppError::new(code, format!("Estimation failed: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::QpError;

    #[test]
    fn typed_errors_map_to_exit_codes() {
        assert_eq!(AppError::from(GraphError::InvalidRadius(-1.0)).exit_code(), 2);
        assert_eq!(
            AppError::from(GroupingError::DegenerateGroup { strand: 3, group: 1 }).exit_code(),
            3
        );
        assert_eq!(
            AppError::from(GroupingError::GroupLabel { group: 9, limit: 4 }).exit_code(),
            2
        );
        assert_eq!(AppError::from(SolveError::MissingData("x".into())).exit_code(), 2);
        assert_eq!(AppError::from(SolveError::EmptyCandidateSet { strand: 1 }).exit_code(), 3);
        let diverged = SolveError::SolverDiverged {
            strand: 1,
            source: QpError::Diverged { iterations: 5 },
        };
        let err = AppError::from(diverged);
        assert_eq!(err.exit_code(), 4);
        assert!(err.to_string().contains("strand 1"), "{err}");
    }
}
