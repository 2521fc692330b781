//! Command-line options of the timestamper binary.
//!
//! The cluster layout itself (replica and shard counts, timer periods) is
//! fixed at compile time; see the constants in the crate root.

use crate::{VtId, NUM_SHARDS, NUM_VTS};
use argh::FromArgs;
use eyre::bail;

/// Command-line options of the `vt` binary.
///
/// The primary form (`vt <vt_id>`) starts the primary process for a
/// timestamper slot. The backup form (`vt <vt_id> <backup_index>`) starts a
/// standby process that takes over the slot once the server manager
/// promotes it; backup server ids repeat the primary layout, so the index
/// must be the slot's id plus a multiple of the cluster size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromArgs)]
#[argh(description = "heddle vector timestamper")]
pub struct Options {
    /// id of the vector timestamper slot to serve
    #[argh(positional)]
    pub vt_id: VtId,

    /// server id of this process when it is a backup for the slot
    #[argh(positional)]
    pub backup_index: Option<usize>,
}

impl Options {
    /// The server id this process registers under.
    pub fn server_id(&self) -> u64 {
        self.backup_index.unwrap_or(self.vt_id) as u64
    }

    /// Returns whether this process starts as a standby.
    pub fn is_backup(&self) -> bool {
        matches!(self.backup_index, Some(index) if index != self.vt_id)
    }

    /// Validates the id ranges and the backup-slot alignment constraint.
    pub fn validate(&self) -> eyre::Result<()> {
        if self.vt_id >= NUM_VTS {
            bail!(
                "vector timestamper id {} out of range (NUM_VTS = {})",
                self.vt_id,
                NUM_VTS
            );
        }
        if let Some(backup_index) = self.backup_index {
            if backup_index < self.vt_id
                || (backup_index - self.vt_id) % (NUM_VTS + NUM_SHARDS) != 0
            {
                bail!(
                    "backup index {} does not map onto timestamper slot {}",
                    backup_index,
                    self.vt_id
                );
            }
        }
        Ok(())
    }
}
