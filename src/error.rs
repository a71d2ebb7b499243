use std::fmt;

/// Pipeline stage named in the error chain when a run halts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Stage {
    Resample,
    Weather,
    Features,
    Split,
    Train,
    Evaluate,
    Export,
}

/// Context attached to the error chain; recover it with
/// `err.downcast_ref::<StageFailed>()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageFailed(pub Stage);

impl fmt::Display for StageFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} stage failed", self.0)
    }
}

pub trait StageContext<T> {
    fn stage(self, stage: Stage) -> anyhow::Result<T>;
}

impl<T, E> StageContext<T> for Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn stage(self, stage: Stage) -> anyhow::Result<T> {
        self.map_err(|e| anyhow::Error::new(e).context(StageFailed(stage)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forecast::split::{Partition, SplitError, Window};
    use chrono::NaiveDate;

    #[test]
    fn test_stage_is_outermost_context() {
        let t = NaiveDate::from_ymd_opt(2010, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let failed: Result<(), SplitError> = Err(SplitError::EmptySplit {
            partition: Partition::Test,
            window: Window::new(t, t),
            available: 10,
        });

        let err = failed.stage(Stage::Split).unwrap_err();

        assert_eq!(err.to_string(), "split stage failed");
        assert_eq!(err.downcast_ref::<StageFailed>(), Some(&StageFailed(Stage::Split)));
        assert!(format!("{err:#}").contains("matches none of the 10 feature rows"));
        assert!(err.downcast_ref::<SplitError>().is_some());
    }
}
