// Copyright (c) 2025, The Stagelink Authors
// MIT License
// All rights reserved.

//! # Delivery Dispatch
//!
//! The boundary between the broker and worker business logic. `dispatch` is the only
//! code path allowed to acknowledge or reject a delivery, and it does so exactly once
//! on every path:
//!
//! - `Ok(Completed)` and `Ok(AlreadyHandled)` ack;
//! - any `WorkerError`, and an undecodable payload, reject without requeue, which
//!   routes the message to the worker's dead-letter queue when one is attached;
//! - `dispatch` itself never raises for worker faults — its only error is a failed
//!   ack/reject wire call, after which the channel cannot be trusted and the consume
//!   loop terminates.
//!
//! Centralizing the outcome here is what rules out double-acknowledgment (a broker
//! protocol error) and never-acknowledgment (a channel-wide stall once the unacked
//! limit is reached), regardless of what individual workers do.

use crate::{
    errors::AmqpError,
    handler::{Outcome, Worker, WorkerError},
    message::Envelope,
    otel,
};
use async_trait::async_trait;
use lapin::{
    message::Delivery,
    options::{BasicAckOptions, BasicNackOptions},
    protocol::basic::AMQPProperties,
};
use opentelemetry::{
    global::BoxedTracer,
    trace::{Span, Status},
};
use std::borrow::Cow;
use tracing::{debug, error};

/// The two delivery outcomes a consumer can signal to the broker.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub(crate) trait Acknowledger: Send + Sync {
    async fn ack(&self) -> Result<(), AmqpError>;

    async fn reject(&self, requeue: bool) -> Result<(), AmqpError>;
}

#[async_trait]
impl Acknowledger for Delivery {
    async fn ack(&self) -> Result<(), AmqpError> {
        match self.acker.ack(BasicAckOptions { multiple: false }).await {
            Err(err) => {
                error!(error = err.to_string(), "error whiling ack msg");
                Err(AmqpError::AckError)
            }
            _ => Ok(()),
        }
    }

    async fn reject(&self, requeue: bool) -> Result<(), AmqpError> {
        match self
            .acker
            .nack(BasicNackOptions {
                multiple: false,
                requeue,
            })
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error whiling reject msg");
                Err(AmqpError::RejectError)
            }
            _ => Ok(()),
        }
    }
}

/// Decodes one delivery, runs the worker, and settles the outcome.
pub(crate) async fn dispatch(
    tracer: &BoxedTracer,
    worker: &dyn Worker,
    props: &AMQPProperties,
    exchange: &str,
    routing_key: &str,
    redelivered: bool,
    data: &[u8],
    acker: &dyn Acknowledger,
) -> Result<(), AmqpError> {
    let stage = worker.stage();
    let (_ctx, mut span) = otel::consumer_span(props, tracer, stage);

    let envelope = match Envelope::decode(data, exchange, routing_key, redelivered) {
        Ok(envelope) => envelope,
        Err(err) => {
            error!(
                error = err.to_string(),
                stage, "undecodable payload, rejecting"
            );
            span.set_status(Status::Error {
                description: Cow::from("undecodable payload"),
            });
            return acker.reject(false).await;
        }
    };

    debug!(stage, redelivered, "message received");

    match worker.process(&envelope).await {
        Ok(Outcome::Completed) => {
            debug!(stage, "message successfully processed");
            span.set_status(Status::Ok);
            acker.ack().await
        }
        Ok(Outcome::AlreadyHandled) => {
            debug!(stage, "work already done, nothing to perform");
            span.set_status(Status::Ok);
            acker.ack().await
        }
        Err(err) => {
            match &err {
                WorkerError::Command {
                    command,
                    status,
                    output,
                } => error!(
                    command = command.as_str(),
                    exit_status = *status,
                    output = output.as_str(),
                    stage,
                    "stage command failed, rejecting"
                ),
                other => error!(
                    error = other.to_string(),
                    stage, "stage processing failed, rejecting"
                ),
            }
            span.record_error(&err);
            span.set_status(Status::Error {
                description: Cow::from(err.to_string()),
            });
            acker.reject(false).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::{MockPublisher, Publisher};
    use opentelemetry::global;
    use serde_json::json;
    use std::sync::Arc;

    enum Behavior {
        Complete,
        Skip,
        Fail,
    }

    struct StubWorker {
        behavior: Behavior,
        publisher: Option<Arc<dyn Publisher>>,
    }

    impl StubWorker {
        fn new(behavior: Behavior) -> StubWorker {
            StubWorker {
                behavior,
                publisher: None,
            }
        }
    }

    #[async_trait]
    impl Worker for StubWorker {
        fn stage(&self) -> &str {
            "download.http"
        }

        async fn process(&self, envelope: &Envelope) -> Result<Outcome, WorkerError> {
            match self.behavior {
                Behavior::Complete => {
                    if let Some(publisher) = &self.publisher {
                        publisher
                            .publish("analysis.filesize", envelope.payload())
                            .await
                            .map_err(|e| WorkerError::Failed(e.to_string()))?;
                    }
                    Ok(Outcome::Completed)
                }
                Behavior::Skip => Ok(Outcome::AlreadyHandled),
                Behavior::Fail => Err(WorkerError::Command {
                    command: "wget --quiet http://example.org/curl-8.0.tar.gz".to_owned(),
                    status: 4,
                    output: "network failure".to_owned(),
                }),
            }
        }
    }

    async fn run(worker: &dyn Worker, data: &[u8], acker: &MockAcknowledger) {
        dispatch(
            &global::tracer("test"),
            worker,
            &AMQPProperties::default(),
            "releases",
            "download.http",
            false,
            data,
            acker,
        )
        .await
        .unwrap();
    }

    #[test]
    fn deliveries_settle_through_the_acknowledger_seam() {
        fn assert_acknowledger<T: Acknowledger>() {}
        assert_acknowledger::<Delivery>();
    }

    #[tokio::test]
    async fn success_acks_exactly_once() {
        let mut acker = MockAcknowledger::new();
        acker.expect_ack().times(1).returning(|| Ok(()));
        acker.expect_reject().times(0);

        let payload = serde_json::to_vec(&json!({"project": "curl", "versionId": 7})).unwrap();
        run(&StubWorker::new(Behavior::Complete), &payload, &acker).await;
    }

    #[tokio::test]
    async fn worker_fault_rejects_without_requeue() {
        let mut acker = MockAcknowledger::new();
        acker.expect_ack().times(0);
        acker
            .expect_reject()
            .withf(|requeue| !requeue)
            .times(1)
            .returning(|_| Ok(()));

        let payload = serde_json::to_vec(&json!({"project": "curl", "versionId": 7})).unwrap();
        run(&StubWorker::new(Behavior::Fail), &payload, &acker).await;
    }

    #[tokio::test]
    async fn already_handled_acks_and_publishes_nothing() {
        let mut acker = MockAcknowledger::new();
        acker.expect_ack().times(1).returning(|| Ok(()));
        acker.expect_reject().times(0);

        let mut publisher = MockPublisher::new();
        publisher.expect_publish().times(0);
        publisher.expect_publish_durable().times(0);

        let worker = StubWorker {
            behavior: Behavior::Skip,
            publisher: Some(Arc::new(publisher)),
        };
        let payload = serde_json::to_vec(&json!({"project": "curl", "versionId": 7})).unwrap();
        run(&worker, &payload, &acker).await;
    }

    #[tokio::test]
    async fn completion_publishes_the_follow_up_stage() {
        let mut acker = MockAcknowledger::new();
        acker.expect_ack().times(1).returning(|| Ok(()));

        let mut publisher = MockPublisher::new();
        publisher
            .expect_publish()
            .withf(|stage, _| stage == "analysis.filesize")
            .times(1)
            .returning(|_, _| Ok(()));

        let worker = StubWorker {
            behavior: Behavior::Complete,
            publisher: Some(Arc::new(publisher)),
        };
        let payload = serde_json::to_vec(&json!({"project": "curl", "versionId": 7})).unwrap();
        run(&worker, &payload, &acker).await;
    }

    #[tokio::test]
    async fn undecodable_payload_rejects_without_running_the_worker() {
        let mut acker = MockAcknowledger::new();
        acker.expect_ack().times(0);
        acker
            .expect_reject()
            .withf(|requeue| !requeue)
            .times(1)
            .returning(|_| Ok(()));

        // Fail behavior would reject anyway; use Complete so a run of the worker
        // would be visible as an ack instead.
        run(&StubWorker::new(Behavior::Complete), b"\xff\xfe", &acker).await;
    }

    #[tokio::test]
    async fn failed_ack_surfaces_as_broker_error() {
        let mut acker = MockAcknowledger::new();
        acker
            .expect_ack()
            .times(1)
            .returning(|| Err(AmqpError::AckError));

        let payload = serde_json::to_vec(&json!({"project": "curl"})).unwrap();
        let result = dispatch(
            &global::tracer("test"),
            &StubWorker::new(Behavior::Complete),
            &AMQPProperties::default(),
            "releases",
            "download.http",
            false,
            &payload,
            &acker,
        )
        .await;

        assert_eq!(result, Err(AmqpError::AckError));
    }
}
