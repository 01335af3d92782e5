//! Resolution pipeline: candidates, expansion, classification, then create,
//! merge or no-op, and finally the consolidated response.

use tracing::{error, info, instrument};

use crate::candidates::find_candidates;
use crate::classify::{classify, Action};
use crate::errors::ResolveError;
use crate::expand;
use crate::locks::KeyedLocks;
use crate::response;
use crate::store::{ContactStore, ContactTx};
use crate::types::{Observation, Outcome, Resolution};

/// Resolves observations against an injected contact store.
///
/// INVARIANT: resolutions sharing a normalized email or phone are
/// serialized through `KeyedLocks`, and every resolution runs as a single
/// atomic unit of the store. Together they keep a never-seen value from
/// producing two primaries and keep a merge cascade all-or-nothing.
pub struct Resolver<S> {
    store: S,
    locks: KeyedLocks,
}

impl<S: ContactStore> Resolver<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            locks: KeyedLocks::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    #[instrument(skip_all, fields(email = ?observation.email, phone = ?observation.phone_number))]
    pub fn resolve(&self, observation: &Observation) -> Result<Resolution, ResolveError> {
        observation.validate()?;

        let result = self.locks.with_locked(&observation.lock_keys(), || {
            self.store.atomically(&mut |tx| resolve_in(tx, observation))
        });

        match &result {
            Ok(resolution) => info!(
                primary_id = %resolution.identity.primary_id,
                outcome = resolution.outcome.label(),
                "observation resolved"
            ),
            Err(e) if e.is_fatal() => {
                error!(error = %e, "resolution aborted on corrupt contact graph")
            }
            Err(e) => info!(error = %e, kind = e.error_kind(), "resolution failed"),
        }
        result
    }
}

/// The read and write phases of one resolution, inside one atomic unit.
fn resolve_in(tx: &dyn ContactTx, observation: &Observation) -> Result<Resolution, ResolveError> {
    let email = observation.email();
    let phone = observation.phone_number();

    let candidates = find_candidates(tx, observation)?;
    if candidates.is_empty() {
        let created = tx.create_primary(email, phone)?;
        let cluster = expand::expand_from(tx, created.id)?;
        return Ok(Resolution {
            identity: response::build(&cluster)?,
            outcome: Outcome::CreatedPrimary,
        });
    }

    let cluster = expand::expand(tx, &candidates)?;
    match classify(&cluster, observation) {
        Action::NoAction => Ok(Resolution {
            identity: response::build(&cluster)?,
            outcome: Outcome::Unchanged,
        }),
        Action::NewSecondary => {
            let primary_id = cluster.sole_primary()?.id;
            tx.create_secondary(email, phone, primary_id)?;
            let extended = expand::expand_from(tx, primary_id)?;
            Ok(Resolution {
                identity: response::build(&extended)?,
                outcome: Outcome::CreatedSecondary,
            })
        }
        Action::PotentialConflict => {
            let merge = crate::conflict::resolve(tx, &cluster)?;
            Ok(Resolution {
                identity: response::build(&merge.cluster)?,
                outcome: Outcome::Merged {
                    demoted: merge.demoted,
                },
            })
        }
    }
}
