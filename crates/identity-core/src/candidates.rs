use tracing::{debug, instrument};

use crate::errors::ResolveError;
use crate::store::ContactTx;
use crate::types::{Contact, Observation};

/// Every existing record sharing the observation's email or phone,
/// oldest first. Empty when the observation carries neither value.
#[instrument(skip_all)]
pub fn find_candidates(
    tx: &dyn ContactTx,
    observation: &Observation,
) -> Result<Vec<Contact>, ResolveError> {
    if observation.email().is_none() && observation.phone_number().is_none() {
        return Ok(Vec::new());
    }
    let candidates = tx.find_by_email_or_phone(observation.email(), observation.phone_number())?;
    debug!(count = candidates.len(), "candidates found");
    Ok(candidates)
}
