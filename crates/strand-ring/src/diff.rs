//! Placement moves implied by a ring transition.

use strand_types::BlockRef;

use crate::error::RingError;
use crate::ring::Ring;

/// A block copy that must move from one peer to another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    /// The block that must move.
    pub key: BlockRef,
    /// A peer that holds it under the old ring.
    pub from: String,
    /// The peer that should hold it under the new ring.
    pub to: String,
}

/// Compute which copies must move between two ring states.
///
/// For each key, compares the primary sets of `old` and `new`. Every peer that
/// gains a copy produces a migration, sourced from a peer that lost its copy
/// or, when the placement set only grew, from the first old primary.
pub fn diff(old: &dyn Ring, new: &dyn Ring, keys: &[BlockRef]) -> Result<Vec<Migration>, RingError> {
    let mut migrations = Vec::new();

    for key in keys {
        let old_perm = old.get_peers(key)?;
        let new_perm = new.get_peers(key)?;
        let old_owners = old_perm.primaries();
        let new_owners = new_perm.primaries();

        for new_owner in new_owners {
            if old_owners.contains(new_owner) {
                continue;
            }
            let from = old_owners
                .iter()
                .find(|o| !new_owners.contains(*o))
                .or_else(|| old_owners.first());
            if let Some(from) = from {
                migrations.push(Migration {
                    key: *key,
                    from: from.clone(),
                    to: new_owner.clone(),
                });
            }
        }
    }

    Ok(migrations)
}
