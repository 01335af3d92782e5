//! In-memory `ContactStore` for tests and embedding.
//!
//! Each atomic unit works on a copy of the state and publishes it only when
//! the closure succeeds, so a failed unit leaves no trace.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use crate::errors::ResolveError;
use crate::store::{ContactStore, ContactTx};
use crate::types::{Contact, ContactId, LinkPrecedence};

/// Store operation that can be made to fail once.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemoryOp {
    FindByEmailOrPhone,
    FindByIdsOrLinkedIds,
    CreatePrimary,
    CreateSecondary,
    ReassignToSecondary,
    RelinkSecondaries,
}

#[derive(Clone, Debug, Default)]
struct MemoryState {
    contacts: BTreeMap<ContactId, Contact>,
    next_id: i64,
    last_timestamp: Option<DateTime<Utc>>,
}

impl MemoryState {
    /// Strictly increasing timestamps so creation order is observable.
    fn tick(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let ts = match self.last_timestamp {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.last_timestamp = Some(ts);
        ts
    }

    fn insert(
        &mut self,
        email: Option<&str>,
        phone: Option<&str>,
        linked_id: Option<ContactId>,
        link_precedence: LinkPrecedence,
    ) -> Contact {
        self.next_id += 1;
        let now = self.tick();
        let contact = Contact {
            id: ContactId::new(self.next_id),
            email: email.map(str::to_owned),
            phone_number: phone.map(str::to_owned),
            linked_id,
            link_precedence,
            created_at: now,
            updated_at: now,
        };
        self.contacts.insert(contact.id, contact.clone());
        contact
    }

    fn sorted(&self, keep: impl Fn(&Contact) -> bool) -> Vec<Contact> {
        let mut out: Vec<Contact> = self.contacts.values().filter(|c| keep(c)).cloned().collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        out
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    pending_failure: Mutex<Option<MemoryOp>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next call of `op` fail with a store error.
    pub fn fail_once(&self, op: MemoryOp) {
        *self.pending_failure.lock() = Some(op);
    }

    pub fn seed_primary(&self, email: Option<&str>, phone: Option<&str>) -> Contact {
        self.state
            .lock()
            .insert(email, phone, None, LinkPrecedence::Primary)
    }

    pub fn seed_secondary(
        &self,
        email: Option<&str>,
        phone: Option<&str>,
        linked_id: ContactId,
    ) -> Contact {
        self.state
            .lock()
            .insert(email, phone, Some(linked_id), LinkPrecedence::Secondary)
    }

    /// Overwrite or insert a record verbatim, bypassing every check.
    pub fn put_raw(&self, contact: Contact) {
        let mut state = self.state.lock();
        state.next_id = state.next_id.max(contact.id.get());
        state.contacts.insert(contact.id, contact);
    }

    pub fn get(&self, id: ContactId) -> Option<Contact> {
        self.state.lock().contacts.get(&id).cloned()
    }

    /// All records, oldest first.
    pub fn all(&self) -> Vec<Contact> {
        self.state.lock().sorted(|_| true)
    }

    pub fn len(&self) -> usize {
        self.state.lock().contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ContactStore for MemoryStore {
    fn atomically<T>(
        &self,
        f: &mut dyn FnMut(&dyn ContactTx) -> Result<T, ResolveError>,
    ) -> Result<T, ResolveError> {
        let mut state = self.state.lock();
        let tx = MemoryTx {
            working: RefCell::new(state.clone()),
            failure: Cell::new(self.pending_failure.lock().take()),
        };
        let out = f(&tx)?;
        *state = tx.working.into_inner();
        Ok(out)
    }
}

struct MemoryTx {
    working: RefCell<MemoryState>,
    failure: Cell<Option<MemoryOp>>,
}

impl MemoryTx {
    fn check(&self, op: MemoryOp) -> Result<(), ResolveError> {
        if self.failure.get() == Some(op) {
            self.failure.set(None);
            return Err(ResolveError::store(format!("injected failure in {op:?}")));
        }
        Ok(())
    }
}

impl ContactTx for MemoryTx {
    fn find_by_email_or_phone(
        &self,
        email: Option<&str>,
        phone: Option<&str>,
    ) -> Result<Vec<Contact>, ResolveError> {
        self.check(MemoryOp::FindByEmailOrPhone)?;
        Ok(self.working.borrow().sorted(|c| {
            (email.is_some() && c.email.as_deref() == email)
                || (phone.is_some() && c.phone_number.as_deref() == phone)
        }))
    }

    fn find_by_ids_or_linked_ids(
        &self,
        ids: &BTreeSet<ContactId>,
    ) -> Result<Vec<Contact>, ResolveError> {
        self.check(MemoryOp::FindByIdsOrLinkedIds)?;
        Ok(self.working.borrow().sorted(|c| {
            ids.contains(&c.id) || c.linked_id.is_some_and(|l| ids.contains(&l))
        }))
    }

    fn create_primary(
        &self,
        email: Option<&str>,
        phone: Option<&str>,
    ) -> Result<Contact, ResolveError> {
        self.check(MemoryOp::CreatePrimary)?;
        Ok(self
            .working
            .borrow_mut()
            .insert(email, phone, None, LinkPrecedence::Primary))
    }

    fn create_secondary(
        &self,
        email: Option<&str>,
        phone: Option<&str>,
        linked_id: ContactId,
    ) -> Result<Contact, ResolveError> {
        self.check(MemoryOp::CreateSecondary)?;
        Ok(self
            .working
            .borrow_mut()
            .insert(email, phone, Some(linked_id), LinkPrecedence::Secondary))
    }

    fn reassign_to_secondary(
        &self,
        id: ContactId,
        new_linked_id: ContactId,
    ) -> Result<(), ResolveError> {
        self.check(MemoryOp::ReassignToSecondary)?;
        let mut state = self.working.borrow_mut();
        let now = state.tick();
        let contact = state
            .contacts
            .get_mut(&id)
            .ok_or_else(|| ResolveError::store(format!("contact {id} not found")))?;
        contact.link_precedence = LinkPrecedence::Secondary;
        contact.linked_id = Some(new_linked_id);
        contact.updated_at = now;
        Ok(())
    }

    fn relink_secondaries(
        &self,
        old_primary_id: ContactId,
        new_primary_id: ContactId,
    ) -> Result<(), ResolveError> {
        self.check(MemoryOp::RelinkSecondaries)?;
        let mut state = self.working.borrow_mut();
        let now = state.tick();
        for contact in state.contacts.values_mut() {
            if contact.linked_id == Some(old_primary_id) {
                contact.linked_id = Some(new_primary_id);
                contact.updated_at = now;
            }
        }
        Ok(())
    }
}
