//! Persistence interface consumed by the resolver.

use std::collections::BTreeSet;

use crate::errors::ResolveError;
use crate::types::{Contact, ContactId};

/// Store operations available inside one atomic unit.
///
/// Every sequence-returning read is ordered by `created_at` ascending, ties
/// broken by id.
pub trait ContactTx {
    /// Records whose email equals `email` or whose phone equals `phone`.
    /// An absent argument matches nothing.
    fn find_by_email_or_phone(
        &self,
        email: Option<&str>,
        phone: Option<&str>,
    ) -> Result<Vec<Contact>, ResolveError>;

    /// Records whose id or `linked_id` is in `ids`.
    fn find_by_ids_or_linked_ids(
        &self,
        ids: &BTreeSet<ContactId>,
    ) -> Result<Vec<Contact>, ResolveError>;

    fn create_primary(
        &self,
        email: Option<&str>,
        phone: Option<&str>,
    ) -> Result<Contact, ResolveError>;

    fn create_secondary(
        &self,
        email: Option<&str>,
        phone: Option<&str>,
        linked_id: ContactId,
    ) -> Result<Contact, ResolveError>;

    /// Demote primary `id` to a secondary of `new_linked_id`.
    fn reassign_to_secondary(
        &self,
        id: ContactId,
        new_linked_id: ContactId,
    ) -> Result<(), ResolveError>;

    /// Point every secondary of `old_primary_id` at `new_primary_id`.
    fn relink_secondaries(
        &self,
        old_primary_id: ContactId,
        new_primary_id: ContactId,
    ) -> Result<(), ResolveError>;
}

/// A contact store that can run a closure as one atomic, serializable unit.
///
/// Implementations commit every write made through the `ContactTx` when the
/// closure returns `Ok` and discard all of them when it returns `Err`. The
/// closure may be invoked more than once if the store retries a contended
/// unit, so it must not have side effects outside the transaction.
pub trait ContactStore: Send + Sync {
    fn atomically<T>(
        &self,
        f: &mut dyn FnMut(&dyn ContactTx) -> Result<T, ResolveError>,
    ) -> Result<T, ResolveError>;
}
