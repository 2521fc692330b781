//! Node implementations and the messaging helpers they share, including
//! the main type [`VtNode`][vt::VtNode].

use crate::{messages::ClusterConfig, topics::ServerManager, ZenohValueAsString};
use eyre::Context;
use futures::StreamExt;
use serde::{de::DeserializeOwned, Serialize};

pub mod vt;

/// Deserializes a received zenoh value into the given message type.
pub fn decode_message<T: DeserializeOwned>(value: &zenoh::prelude::Value) -> eyre::Result<T> {
    serde_json::from_str(&value.as_string()?).context("failed to deserialize message")
}

/// Serializes a message and publishes it on the given topic.
///
/// Messages should only be sent through this function, to ensure that all
/// of them use the same wire format.
pub async fn publish<T: Serialize>(
    zenoh: &zenoh::Session,
    topic: &str,
    message: &T,
) -> eyre::Result<()> {
    let serialized = serde_json::to_string(message).context("failed to serialize message")?;
    zenoh
        .put(topic, serialized)
        .await
        .map_err(|e| eyre::eyre!(e))
        .with_context(|| format!("failed to publish message on `{}`", topic))
}

/// Serializes a message and publishes it synchronously.
///
/// For the rare sends that must happen inside a critical section, where
/// suspending would hold the lock across an await.
pub fn publish_blocking<T: Serialize>(
    zenoh: &zenoh::Session,
    topic: &str,
    message: &T,
) -> eyre::Result<()> {
    use zenoh::prelude::ZFuture;

    let serialized = serde_json::to_string(message).context("failed to serialize message")?;
    zenoh
        .put(topic, serialized)
        .wait()
        .map_err(|e| eyre::eyre!(e))
        .with_context(|| format!("failed to publish message on `{}`", topic))
}

/// Waits until the server manager publishes a configuration that lists
/// the given server.
///
/// For a primary, an earlier configuration that does not list the server
/// is an error (the cluster does not know about us). A standby instead
/// keeps waiting: its id appears once the server manager promotes it.
pub async fn await_membership(
    zenoh: &zenoh::Session,
    zenoh_prefix: &str,
    server_id: u64,
    wait_for_promotion: bool,
) -> eyre::Result<ClusterConfig> {
    let mut subscriber = zenoh
        .subscribe(&ServerManager::config_topic(zenoh_prefix))
        .await
        .map_err(|e| eyre::eyre!(e))
        .context("failed to declare configuration subscriber")?;
    let mut config_stream = subscriber.receiver();

    loop {
        let sample = match config_stream.next().await {
            Some(sample) => sample,
            None => eyre::bail!("configuration stream closed before the first configuration"),
        };
        let config: ClusterConfig = match decode_message(&sample.value) {
            Ok(config) => config,
            Err(err) => {
                log::warn!("skipping undecodable cluster configuration: {:?}", err);
                continue;
            }
        };
        if config.contains_server(server_id) {
            return Ok(config);
        }
        if !wait_for_promotion {
            return Err(eyre::eyre!(crate::HeddleError::NotInMembership(server_id)));
        }
        log::info!(
            "server {} waiting for promotion (configuration version {})",
            server_id,
            config.version
        );
    }
}
