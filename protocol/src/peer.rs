use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::NodeId;

/// Rejected identity/partition input
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectoryError {
    #[error("partition count {0} leaves no peers (need at least 2)")]
    TooFewPartitions(u32),
    #[error("local id {local_id} is outside the partition set [0, {partition_count})")]
    LocalIdOutOfRange { local_id: NodeId, partition_count: u32 },
}

/// Who this process is inside the partition set. Fixed for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeIdentity {
    pub local_id: NodeId,
    pub partition_count: u32,
}

impl NodeIdentity {
    pub fn new(local_id: NodeId, partition_count: u32) -> Result<Self, DirectoryError> {
        if partition_count < 2 {
            return Err(DirectoryError::TooFewPartitions(partition_count));
        }
        if local_id >= partition_count {
            return Err(DirectoryError::LocalIdOutOfRange { local_id, partition_count });
        }
        Ok(Self { local_id, partition_count })
    }
}

/// Every other member of the partition set, in ascending id order.
///
/// Never contains the local id. Members are computed from the identity on
/// demand, so the directory stays two words wide whatever the partition count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerDirectory {
    local_id: NodeId,
    partition_count: u32,
}

impl PeerDirectory {
    pub fn build(local_id: NodeId, partition_count: u32) -> Result<Self, DirectoryError> {
        let identity = NodeIdentity::new(local_id, partition_count)?;
        Ok(Self::for_identity(&identity))
    }

    pub fn for_identity(identity: &NodeIdentity) -> Self {
        Self { local_id: identity.local_id, partition_count: identity.partition_count }
    }

    pub fn local_id(&self) -> NodeId {
        self.local_id
    }

    fn excludes_local(&self) -> bool {
        self.local_id < self.partition_count
    }

    pub fn len(&self) -> usize {
        self.partition_count as usize - usize::from(self.excludes_local())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: NodeId) -> bool {
        id < self.partition_count && id != self.local_id
    }

    pub fn iter(&self) -> impl Iterator<Item = NodeId> {
        let local = self.local_id;
        (0..self.partition_count).filter(move |id| *id != local)
    }

    /// Pick one peer uniformly at random; `None` when there is nobody to talk to
    pub fn choose<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<NodeId> {
        if self.is_empty() {
            return None;
        }
        let slot = rng.gen_range(0..self.len() as u32);
        // skip over our own id
        if self.excludes_local() && slot >= self.local_id {
            Some(slot + 1)
        } else {
            Some(slot)
        }
    }
}
