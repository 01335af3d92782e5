use crate::expand::Cluster;
use crate::types::Observation;

/// What a resolution must do with an observation against its expanded cluster.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    /// The observation is already represented; write nothing.
    NoAction,
    /// The observation adds an unseen email or phone to a single cluster.
    NewSecondary,
    /// The observation bridges clusters with distinct primaries.
    PotentialConflict,
}

/// Decide the action for `observation`.
///
/// More than one primary always means a merge, since the cluster cannot be
/// answered with a single identity otherwise. With one primary, an exact
/// (email, phone) pair on file wins over new-value detection.
pub fn classify(cluster: &Cluster, observation: &Observation) -> Action {
    if cluster.primary_count() > 1 {
        return Action::PotentialConflict;
    }

    if cluster.members().iter().any(|c| observation.same_pair_as(c)) {
        return Action::NoAction;
    }

    let new_email = observation.email().is_some_and(|e| !cluster.has_email(e));
    let new_phone = observation.phone_number().is_some_and(|p| !cluster.has_phone(p));
    if new_email || new_phone {
        Action::NewSecondary
    } else {
        Action::NoAction
    }
}
