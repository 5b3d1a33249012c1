// Copyright (c) 2025, The Stagelink Authors
// MIT License
// All rights reserved.

//! # Error Types for the Broker Core
//!
//! This module defines `AmqpError`, the error type for every broker-facing operation:
//! connecting, declaring topology, publishing and consuming. Variants fall into three
//! classes with different recovery policies:
//!
//! - connection errors are fatal at startup and never retried by this crate;
//! - topology errors indicate a configuration bug (conflicting redeclaration) and are fatal;
//! - broker I/O errors after a connection was established propagate to the caller, which
//!   is expected to exit rather than continue on a possibly desynchronized channel.
//!
//! Worker business-logic faults are a separate type (`handler::WorkerError`) and never
//! appear here: they are absorbed by the dispatch boundary and only determine the
//! ack/reject outcome of a single message.

use thiserror::Error;

/// Errors raised by broker-facing operations.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AmqpError {
    /// Broker unreachable or credentials rejected
    #[error("failure to connect")]
    ConnectionError,

    /// Error creating a channel on an established connection
    #[error("failure to create a channel")]
    ChannelError,

    /// Conflicting or failed declaration of the named exchange
    #[error("failure to declare exchange `{0}`")]
    DeclareExchangeError(String),

    /// Failed declaration of the named queue
    #[error("failure to declare queue `{0}`")]
    DeclareQueueError(String),

    /// Error binding the named queue to the named exchange
    #[error("failure to bind queue `{0}` to exchange `{1}`")]
    BindError(String, String),

    /// Error publishing to the named exchange
    #[error("failure to publish to exchange `{0}`")]
    PublishError(String),

    /// Error registering a consumer on the named queue
    #[error("failure to register consumer on queue `{0}`")]
    ConsumerRegistrationError(String),

    /// Error acknowledging a delivery
    #[error("failure to ack message")]
    AckError,

    /// Error rejecting a delivery
    #[error("failure to reject message")]
    RejectError,

    /// The consume loop failed after subscription
    #[error("failure while consuming: `{0}`")]
    ConsumeError(String),
}
