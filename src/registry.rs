// Copyright (c) 2025, The Stagelink Authors
// MIT License
// All rights reserved.

//! # Worker Registry
//!
//! A closed lookup table from stage name to worker. The CLI front-end that starts a
//! worker process resolves its single worker here at startup; an unknown name fails
//! immediately with the known stages in hand for the error message, instead of being
//! discovered at runtime by reflection.

use crate::handler::Worker;
use std::{collections::HashMap, sync::Arc};

/// Maps stage names to the workers consuming them.
#[derive(Default)]
pub struct WorkerRegistry {
    workers: HashMap<String, Arc<dyn Worker>>,
}

impl WorkerRegistry {
    pub fn new() -> WorkerRegistry {
        WorkerRegistry::default()
    }

    /// Registers a worker under its stage name. Re-registering a stage replaces the
    /// previous worker; a stage is consumed by exactly one worker type.
    pub fn register(mut self, worker: Arc<dyn Worker>) -> Self {
        self.workers.insert(worker.stage().to_owned(), worker);
        self
    }

    /// Looks up the worker for a stage name.
    pub fn resolve(&self, stage: &str) -> Option<Arc<dyn Worker>> {
        self.workers.get(stage).cloned()
    }

    /// The registered stage names, sorted for stable error messages.
    pub fn stages(&self) -> Vec<&str> {
        let mut stages: Vec<&str> = self.workers.keys().map(String::as_str).collect();
        stages.sort_unstable();
        stages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        handler::{Outcome, WorkerError},
        message::Envelope,
    };
    use async_trait::async_trait;

    struct NamedWorker(&'static str);

    #[async_trait]
    impl Worker for NamedWorker {
        fn stage(&self) -> &str {
            self.0
        }

        async fn process(&self, _envelope: &Envelope) -> Result<Outcome, WorkerError> {
            Ok(Outcome::Completed)
        }
    }

    #[test]
    fn resolves_registered_stages() {
        let registry = WorkerRegistry::new()
            .register(Arc::new(NamedWorker("download.http")))
            .register(Arc::new(NamedWorker("analysis.filesize")));

        assert!(registry.resolve("download.http").is_some());
        assert!(registry.resolve("upload.ftp").is_none());
    }

    #[test]
    fn stages_are_sorted_for_error_messages() {
        let registry = WorkerRegistry::new()
            .register(Arc::new(NamedWorker("download.http")))
            .register(Arc::new(NamedWorker("analysis.filesize")));

        assert_eq!(registry.stages(), vec!["analysis.filesize", "download.http"]);
    }
}
