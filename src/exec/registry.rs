// src/exec/registry.rs

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::warn;

use crate::errors::{KernelError, Result};
use crate::exec::backend::{ExecContext, ExecutorBackend};

/// The fixed set of named executors a kernel dispatches to.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: BTreeMap<String, Arc<dyn ExecutorBackend>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor under its own name.
    pub fn add<E>(&mut self, executor: E) -> Result<()>
    where
        E: ExecutorBackend + 'static,
    {
        self.add_shared(Arc::new(executor))
    }

    /// Register an executor the caller keeps a handle to.
    pub fn add_shared(&mut self, executor: Arc<dyn ExecutorBackend>) -> Result<()> {
        let name = executor.name().to_string();
        if self.executors.contains_key(&name) {
            return Err(KernelError::ConfigError(format!(
                "executor '{name}' registered twice"
            )));
        }
        self.executors.insert(name, executor);
        Ok(())
    }

    /// Builder-style [`ExecutorRegistry::add`].
    pub fn with<E>(mut self, executor: E) -> Result<Self>
    where
        E: ExecutorBackend + 'static,
    {
        self.add(executor)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ExecutorBackend>> {
        self.executors.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.executors.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }

    pub(crate) fn start_all(&self, ctx: &ExecContext) -> Result<()> {
        for executor in self.executors.values() {
            executor.start(ctx.clone())?;
        }
        Ok(())
    }

    /// Shut every executor down; failures are logged, not returned.
    pub(crate) async fn shutdown_all(&self) {
        for (name, executor) in &self.executors {
            if let Err(e) = executor.shutdown().await {
                warn!(executor = %name, error = %e, "executor shutdown failed");
            }
        }
    }
}

impl fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.executors.keys()).finish()
    }
}
