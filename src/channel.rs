// Copyright (c) 2025, The Stagelink Authors
// MIT License
// All rights reserved.

//! # AMQP Channel Management
//!
//! Establishes the single connection and channel a worker process owns. There is no
//! retry loop here: an unreachable broker or rejected credentials is fatal to the
//! caller, and respawn policy belongs to the process supervisor, not this crate.

use crate::{config::BrokerConfig, errors::AmqpError};
use lapin::{types::LongString, Channel, Connection, ConnectionProperties};
use std::sync::Arc;
use tracing::{debug, error};

/// Connects to the broker and opens one channel on the new connection.
///
/// The connection is named after `cfg.app_name` so individual pipeline workers are
/// distinguishable in broker management tooling.
pub async fn new_amqp_channel(
    cfg: &BrokerConfig,
) -> Result<(Arc<Connection>, Arc<Channel>), AmqpError> {
    debug!("creating amqp connection...");
    let options = ConnectionProperties::default()
        .with_connection_name(LongString::from(cfg.app_name.clone()));

    let conn = match Connection::connect(&cfg.uri(), options).await {
        Ok(c) => Ok(c),
        Err(err) => {
            error!(
                error = err.to_string(),
                host = cfg.host.as_str(),
                "failure to connect"
            );
            Err(AmqpError::ConnectionError)
        }
    }?;
    debug!("amqp connected");

    debug!("creating amqp channel...");
    match conn.create_channel().await {
        Ok(c) => {
            debug!("channel created");
            Ok((Arc::new(conn), Arc::new(c)))
        }
        Err(err) => {
            error!(error = err.to_string(), "error to create the channel");
            Err(AmqpError::ChannelError)
        }
    }
}
