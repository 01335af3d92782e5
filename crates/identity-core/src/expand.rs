//! One-hop cluster expansion and structural invariant checks.

use std::collections::{BTreeSet, HashSet};

use tracing::{debug, error, instrument};

use crate::errors::ResolveError;
use crate::store::ContactTx;
use crate::types::{Contact, ContactId};

/// All records of one or more clusters, oldest first.
///
/// Construction verifies that primaries carry no link and that every
/// secondary links to a primary present in the same set, so holders of a
/// `Cluster` can rely on a flat primary/secondary shape.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cluster {
    members: Vec<Contact>,
}

impl Cluster {
    pub fn from_members(members: Vec<Contact>) -> Result<Self, ResolveError> {
        let primary_ids: HashSet<ContactId> = members
            .iter()
            .filter(|c| c.is_primary())
            .map(|c| c.id)
            .collect();

        if primary_ids.is_empty() {
            return Err(violation(format!(
                "cluster of {} record(s) has no primary",
                members.len()
            )));
        }

        for contact in &members {
            match (contact.is_primary(), contact.linked_id) {
                (true, Some(linked)) => {
                    return Err(violation(format!(
                        "primary {} carries link to {linked}",
                        contact.id
                    )));
                }
                (false, None) => {
                    return Err(violation(format!("secondary {} has no link", contact.id)));
                }
                (false, Some(linked)) if !primary_ids.contains(&linked) => {
                    return Err(violation(format!(
                        "secondary {} links to {linked}, which is not a primary",
                        contact.id
                    )));
                }
                _ => {}
            }
        }

        Ok(Self { members })
    }

    pub fn members(&self) -> &[Contact] {
        &self.members
    }

    pub fn primaries(&self) -> impl Iterator<Item = &Contact> {
        self.members.iter().filter(|c| c.is_primary())
    }

    pub fn secondaries(&self) -> impl Iterator<Item = &Contact> {
        self.members.iter().filter(|c| !c.is_primary())
    }

    pub fn primary_count(&self) -> usize {
        self.primaries().count()
    }

    /// The only primary. Fails when the set spans several clusters.
    pub fn sole_primary(&self) -> Result<&Contact, ResolveError> {
        let mut primaries = self.primaries();
        match (primaries.next(), primaries.next()) {
            (Some(primary), None) => Ok(primary),
            _ => Err(ResolveError::invariant(format!(
                "expected a single primary, found {}",
                self.primary_count()
            ))),
        }
    }

    pub fn has_email(&self, email: &str) -> bool {
        self.members.iter().any(|c| c.email.as_deref() == Some(email))
    }

    pub fn has_phone(&self, phone: &str) -> bool {
        self.members
            .iter()
            .any(|c| c.phone_number.as_deref() == Some(phone))
    }
}

fn violation(detail: String) -> ResolveError {
    error!(%detail, "contact graph invariant violated");
    ResolveError::InvariantViolation(detail)
}

/// Expand `candidates` to every cluster they touch.
///
/// Chains are forbidden, so one hop from the referenced primaries reaches
/// every member.
#[instrument(skip_all, fields(candidates = candidates.len()))]
pub fn expand(tx: &dyn ContactTx, candidates: &[Contact]) -> Result<Cluster, ResolveError> {
    let mut primary_ids = BTreeSet::new();
    for candidate in candidates {
        let id = candidate
            .primary_id()
            .ok_or_else(|| violation(format!("secondary {} has no link", candidate.id)))?;
        primary_ids.insert(id);
    }
    expand_ids(tx, &primary_ids)
}

/// Fetch the cluster rooted at a single primary.
pub fn expand_from(tx: &dyn ContactTx, primary_id: ContactId) -> Result<Cluster, ResolveError> {
    expand_ids(tx, &BTreeSet::from([primary_id]))
}

fn expand_ids(
    tx: &dyn ContactTx,
    primary_ids: &BTreeSet<ContactId>,
) -> Result<Cluster, ResolveError> {
    let members = tx.find_by_ids_or_linked_ids(primary_ids)?;
    debug!(primaries = primary_ids.len(), members = members.len(), "cluster expanded");
    Cluster::from_members(members)
}
