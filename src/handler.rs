// Copyright (c) 2025, The Stagelink Authors
// MIT License
// All rights reserved.

//! # Consumer Contract
//!
//! The uniform lifecycle every pipeline worker implements. A worker names its stage
//! (which doubles as routing key), exposes its topology once as an immutable value,
//! and supplies `process` — the business logic invoked per delivery. Everything else
//! (decoding, acknowledgment, failure routing) is owned by the dispatch boundary, so
//! a worker can neither double-ack nor forget to ack.
//!
//! Workers must tolerate redelivery: under at-least-once semantics a message may be
//! processed again after a crash. A worker that detects the work is already done
//! returns `Outcome::AlreadyHandled`, which acks the message without treating it as a
//! failure. The same outcome covers missing-prerequisite records: replays of completed
//! or obsolete work are skipped, never dead-lettered.

use crate::{
    exchange::ExchangeDefinition,
    message::Envelope,
    queue::QueueDefinition,
};
use async_trait::async_trait;
use thiserror::Error;

/// Successful delivery outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The work was performed
    Completed,
    /// The work was already done or its prerequisite no longer exists; nothing to do
    AlreadyHandled,
}

/// Faults raised by worker business logic.
///
/// Caught exactly once by the dispatch boundary, logged with their context, and
/// converted into a rejection of the single message being processed. They never
/// crash the worker process.
#[derive(Error, Debug)]
pub enum WorkerError {
    /// An external analysis command exited non-zero. Carries the structured result so
    /// the failure log shows the originating command line and exit status.
    #[error("command `{command}` exited with status {status}")]
    Command {
        command: String,
        status: i32,
        output: String,
    },

    /// A record the stage depends on is malformed or lacks a required field
    #[error("missing or invalid record: {0}")]
    MissingRecord(String),

    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Payload(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Option templates the broker client seeds worker topologies with.
#[derive(Debug, Clone)]
pub struct TopologyDefaults {
    pub exchange: ExchangeDefinition,
    pub queue: QueueDefinition,
}

/// A worker's subscription configuration: built once, passed by value to the broker
/// client, never mutated afterwards.
#[derive(Debug, Clone)]
pub struct WorkerTopology {
    /// The exchange to declare and bind to; `None` consumes from the queue directly
    pub exchange: Option<ExchangeDefinition>,
    pub queue: QueueDefinition,
    pub routing_key: String,
    /// Whether to synthesize the `.deadletter` shadow topology for this worker
    pub dead_letter: bool,
    pub consumer_tag: String,
}

impl WorkerTopology {
    /// The conventional topology for a stage: queue named after the stage, bound to
    /// the default exchange with the stage name as routing key, dead-lettering on,
    /// the stage name as consumer tag.
    pub fn for_stage(stage: &str, defaults: &TopologyDefaults) -> WorkerTopology {
        WorkerTopology {
            exchange: Some(defaults.exchange.clone()),
            queue: defaults.queue.renamed(stage.to_owned()),
            routing_key: stage.to_owned(),
            dead_letter: true,
            consumer_tag: stage.to_owned(),
        }
    }
}

/// One pipeline stage's worker.
#[async_trait]
pub trait Worker: Send + Sync {
    /// The stage name, e.g. `download.http` or `analysis.filesize`. Doubles as the
    /// routing key naming this stage in the pipeline graph.
    fn stage(&self) -> &str;

    /// Builds this worker's subscription topology from the broker client's templates.
    /// Override to deviate from the stage conventions (extra durability flags, a
    /// dedicated exchange, dead-lettering off).
    fn topology(&self, defaults: &TopologyDefaults) -> WorkerTopology {
        WorkerTopology::for_stage(self.stage(), defaults)
    }

    /// The stage's business logic. Runs once per delivery; the returned outcome or
    /// error decides acknowledgment. Follow-up messages for downstream stages are
    /// published from here through a `Publisher`.
    async fn process(&self, envelope: &Envelope) -> Result<Outcome, WorkerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> TopologyDefaults {
        TopologyDefaults {
            exchange: ExchangeDefinition::new("releases").durable(),
            queue: QueueDefinition::new("").durable(),
        }
    }

    #[test]
    fn stage_topology_follows_conventions() {
        let topology = WorkerTopology::for_stage("analysis.filesize", &defaults());

        assert_eq!(topology.queue.name(), "analysis.filesize");
        assert_eq!(topology.routing_key, "analysis.filesize");
        assert_eq!(topology.consumer_tag, "analysis.filesize");
        assert!(topology.dead_letter);
        assert_eq!(
            topology.exchange.as_ref().map(ExchangeDefinition::name),
            Some("releases")
        );
    }

    #[test]
    fn command_error_reports_command_line_and_status() {
        let err = WorkerError::Command {
            command: "cvs rlog -S module".to_owned(),
            status: 1,
            output: "connection refused".to_owned(),
        };

        assert_eq!(
            err.to_string(),
            "command `cvs rlog -S module` exited with status 1"
        );
    }
}
