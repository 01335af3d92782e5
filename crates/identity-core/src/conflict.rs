//! Cluster merge: the oldest primary absorbs every other primary touched by
//! an observation.

use tracing::{info, instrument};

use crate::errors::ResolveError;
use crate::expand::{self, Cluster};
use crate::store::ContactTx;
use crate::types::{Contact, ContactId};

/// Result of merging several clusters into one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Merge {
    pub cluster: Cluster,
    pub surviving: ContactId,
    pub demoted: Vec<ContactId>,
}

/// Oldest primary wins; equal creation times fall back to the smallest id.
pub fn surviving_primary<'a>(
    primaries: impl IntoIterator<Item = &'a Contact>,
) -> Option<&'a Contact> {
    primaries
        .into_iter()
        .min_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)))
}

/// Demote every primary of `cluster` except the survivor and flatten their
/// secondaries onto it.
///
/// Must run inside the same atomic unit as the reads that produced
/// `cluster`; a failure part-way leaves the unit to be rolled back.
#[instrument(skip_all, fields(members = cluster.members().len()))]
pub fn resolve(tx: &dyn ContactTx, cluster: &Cluster) -> Result<Merge, ResolveError> {
    let surviving = surviving_primary(cluster.primaries())
        .ok_or_else(|| ResolveError::invariant("merge requested for a cluster without primaries"))?
        .id;

    let demoted: Vec<ContactId> = cluster
        .primaries()
        .map(|p| p.id)
        .filter(|id| *id != surviving)
        .collect();

    for &old in &demoted {
        tx.reassign_to_secondary(old, surviving)?;
        tx.relink_secondaries(old, surviving)?;
    }

    let merged = expand::expand_from(tx, surviving)?;
    info!(%surviving, ?demoted, members = merged.members().len(), "clusters merged");

    Ok(Merge {
        cluster: merged,
        surviving,
        demoted,
    })
}
