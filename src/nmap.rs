//! Client interface to the external name-mapper service.
//!
//! The name mapper stores the handle-to-shard mapping for every graph
//! element. The timestamper only consumes it: lookups when resolving
//! transactions and node programs, inserts when a transaction creates
//! fresh handles.

use crate::{topics::NameMapService, NodeHandle, ShardId, ZenohValueAsString};
use eyre::Context;
use futures::{future::BoxFuture, StreamExt};
use std::{
    collections::{BTreeSet, HashMap},
    sync::{Arc, Mutex},
};

/// Client-side interface of the name-mapper service.
pub trait NameMapper: Send + Sync {
    /// Resolves each handle to the shard storing it.
    ///
    /// Handles the mapper does not know are absent from the result; the
    /// caller decides whether that is an error.
    fn lookup(
        &self,
        handles: BTreeSet<NodeHandle>,
    ) -> BoxFuture<'_, eyre::Result<HashMap<NodeHandle, ShardId>>>;

    /// Records the placement of freshly created handles.
    fn insert(&self, mappings: HashMap<NodeHandle, ShardId>) -> BoxFuture<'_, eyre::Result<()>>;
}

/// Name mapper backed by the deployed mapper service, queried over zenoh.
pub struct ZenohNameMapper {
    zenoh: Arc<zenoh::Session>,
    zenoh_prefix: String,
}

impl ZenohNameMapper {
    /// Creates a mapper client talking to the service under the given
    /// prefix.
    pub fn new(zenoh: Arc<zenoh::Session>, zenoh_prefix: String) -> Self {
        Self {
            zenoh,
            zenoh_prefix,
        }
    }
}

impl NameMapper for ZenohNameMapper {
    fn lookup(
        &self,
        handles: BTreeSet<NodeHandle>,
    ) -> BoxFuture<'_, eyre::Result<HashMap<NodeHandle, ShardId>>> {
        Box::pin(async move {
            let handle_list = handles
                .iter()
                .map(|handle| handle.to_string())
                .collect::<Vec<_>>()
                .join(",");
            let selector = format!(
                "{}?handles={}",
                NameMapService::lookup_topic(&self.zenoh_prefix),
                handle_list
            );
            let replies = self
                .zenoh
                .get(&selector)
                .await
                .map_err(|e| eyre::eyre!(e))
                .context("failed to query name mapper")?;
            let mut replies = replies.collect::<Vec<_>>().await;
            match replies.as_mut_slice() {
                [reply] => serde_json::from_str(&reply.sample.value.as_string()?)
                    .context("failed to deserialize name-mapper reply"),
                [] => eyre::bail!("no reply received from name mapper"),
                _ => eyre::bail!("multiple replies received from name mapper"),
            }
        })
    }

    fn insert(&self, mappings: HashMap<NodeHandle, ShardId>) -> BoxFuture<'_, eyre::Result<()>> {
        Box::pin(async move {
            let serialized = serde_json::to_string(&mappings)
                .context("failed to serialize name-mapper insert")?;
            self.zenoh
                .put(&NameMapService::insert_topic(&self.zenoh_prefix), serialized)
                .await
                .map_err(|e| eyre::eyre!(e))
                .context("failed to record handle placements")
        })
    }
}

/// In-memory name mapper used by tests and single-process setups.
#[derive(Debug, Default)]
pub struct StaticNameMapper {
    mappings: Mutex<HashMap<NodeHandle, ShardId>>,
}

impl StaticNameMapper {
    /// An empty mapper.
    pub fn new() -> Self {
        Self::default()
    }

    /// A mapper pre-populated with the given placements.
    pub fn with_mappings(mappings: impl IntoIterator<Item = (NodeHandle, ShardId)>) -> Self {
        Self {
            mappings: Mutex::new(mappings.into_iter().collect()),
        }
    }
}

impl NameMapper for StaticNameMapper {
    fn lookup(
        &self,
        handles: BTreeSet<NodeHandle>,
    ) -> BoxFuture<'_, eyre::Result<HashMap<NodeHandle, ShardId>>> {
        let known = self.mappings.lock().unwrap();
        let resolved = handles
            .into_iter()
            .filter_map(|handle| known.get(&handle).map(|&shard| (handle, shard)))
            .collect();
        Box::pin(futures::future::ready(Ok(resolved)))
    }

    fn insert(&self, mappings: HashMap<NodeHandle, ShardId>) -> BoxFuture<'_, eyre::Result<()>> {
        self.mappings.lock().unwrap().extend(mappings);
        Box::pin(futures::future::ready(Ok(())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_mapper_resolves_known_handles() {
        let mapper = StaticNameMapper::with_mappings(vec![(1, 0), (2, 1)]);
        let resolved = smol::block_on(mapper.lookup([1, 2, 3].iter().copied().collect())).unwrap();
        assert_eq!(resolved.get(&1), Some(&0));
        assert_eq!(resolved.get(&2), Some(&1));
        assert_eq!(resolved.get(&3), None);
    }

    #[test]
    fn static_mapper_records_inserts() {
        let mapper = StaticNameMapper::new();
        let mut fresh = HashMap::new();
        fresh.insert(7, 1);
        smol::block_on(mapper.insert(fresh)).unwrap();
        let resolved = smol::block_on(mapper.lookup(std::iter::once(7).collect())).unwrap();
        assert_eq!(resolved.get(&7), Some(&1));
    }
}
