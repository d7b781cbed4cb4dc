// src/future/data_future.rs

use std::path::PathBuf;

use crate::errors::TaskError;
use crate::future::app_future::{AppFuture, Outcome};

/// A view on one declared output file of an app.
///
/// Settles together with its parent [`AppFuture`]: with the staged path of
/// the file on success, with the parent's error otherwise.
#[derive(Debug, Clone)]
pub struct DataFuture {
    parent: AppFuture,
    index: usize,
}

impl DataFuture {
    pub(crate) fn new(parent: AppFuture, index: usize) -> Self {
        Self { parent, index }
    }

    pub fn parent(&self) -> &AppFuture {
        &self.parent
    }

    /// Declared name of the output.
    pub fn filename(&self) -> &str {
        self.parent
            .declared_outputs()
            .get(self.index)
            .map(|s| s.as_str())
            .unwrap_or_default()
    }

    pub fn is_done(&self) -> bool {
        self.parent.is_done()
    }

    /// Non-blocking peek at the staged path.
    pub fn try_path(&self) -> Option<Result<PathBuf, TaskError>> {
        self.parent.try_outcome().map(|o| self.path_from(o))
    }

    /// Block until the parent settles; return the staged path.
    pub fn wait(&self) -> Result<PathBuf, TaskError> {
        self.path_from(self.parent.wait_outcome())
    }

    pub async fn path(&self) -> Result<PathBuf, TaskError> {
        self.path_from(self.parent.outcome().await)
    }

    fn path_from(&self, outcome: Outcome) -> Result<PathBuf, TaskError> {
        let value = outcome?;
        value
            .outputs
            .get(self.index)
            .cloned()
            .ok_or_else(|| TaskError::OutputStagingFailed {
                task: self.parent.task_id(),
                output: self.filename().to_string(),
                reason: "no staged path recorded for this output".to_string(),
            })
    }
}
