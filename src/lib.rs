// Copyright (c) 2025, The Stagelink Authors
// MIT License
// All rights reserved.

//! Broker abstraction and consumer contract for the release-metadata pipeline.
//!
//! Workers are independent processes chained through an AMQP broker: each consumes one
//! stage-named queue, performs its unit of work, and publishes follow-up messages to
//! downstream stages. This crate owns the parts every worker shares — connection and
//! channel lifecycle, idempotent topology declaration with dead-letter shadow queues,
//! publish/consume, and the dispatch boundary that guarantees exactly one ack or
//! reject per delivered message.

mod consumer;
mod otel;

pub mod broker;
pub mod channel;
pub mod config;
pub mod errors;
pub mod exchange;
pub mod handler;
pub mod message;
pub mod publisher;
pub mod queue;
pub mod registry;
pub mod topology;
