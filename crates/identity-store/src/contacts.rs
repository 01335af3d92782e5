use std::collections::BTreeSet;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::{debug, instrument, warn};

use identity_core::{Contact, ContactId, ContactStore, ContactTx, LinkPrecedence, ResolveError};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

const COLUMNS: &str =
    "id, email, phone_number, linked_id, link_precedence, created_at, updated_at";

/// Contact persistence over SQLite.
///
/// Each atomic unit is an IMMEDIATE transaction: the write lock is taken
/// before the first read, so a resolution's reads and writes cannot
/// interleave with another writer, even one in a different process.
pub struct ContactRepo {
    db: Database,
}

impl ContactRepo {
    const BUSY_MAX_RETRIES: u32 = 16;

    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Get a contact by ID.
    #[instrument(skip(self), fields(contact_id = %id))]
    pub fn get(&self, id: ContactId) -> Result<Contact, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM contacts WHERE id = ?1"))?;
            let mut rows = stmt.query([id.get()])?;
            match rows.next()? {
                Some(row) => row_to_contact(row),
                None => Err(StoreError::NotFound(format!("contact {id}"))),
            }
        })
    }

    /// All contacts, oldest first.
    pub fn list(&self) -> Result<Vec<Contact>, StoreError> {
        self.db.with_conn(|conn| {
            query_contacts(
                conn,
                &format!("SELECT {COLUMNS} FROM contacts ORDER BY created_at, id"),
                &[],
            )
        })
    }

    pub fn count(&self) -> Result<i64, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM contacts", [], |row| row.get(0))
                .map_err(StoreError::from)
        })
    }

    /// Run one unit, retrying with linear backoff + jitter while SQLite
    /// reports the database busy or locked.
    fn retry_on_busy<T>(
        &self,
        mut f: impl FnMut() -> Result<T, ResolveError>,
    ) -> Result<T, ResolveError> {
        let mut attempts = 0;
        loop {
            match f() {
                Err(err) if err.is_contended() && attempts < Self::BUSY_MAX_RETRIES => {
                    attempts += 1;
                    let base_ms = u64::from(attempts).saturating_mul(10).min(500);
                    let jitter_ms = rand::thread_rng().gen_range(0..=base_ms / 4);
                    warn!(attempts, error = %err, "contact store busy, retrying");
                    std::thread::sleep(Duration::from_millis(base_ms + jitter_ms));
                }
                other => return other,
            }
        }
    }
}

impl ContactStore for ContactRepo {
    fn atomically<T>(
        &self,
        f: &mut dyn FnMut(&dyn ContactTx) -> Result<T, ResolveError>,
    ) -> Result<T, ResolveError> {
        self.retry_on_busy(|| {
            self.db.with_conn(|conn| {
                let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)
                    .map_err(StoreError::from)?;
                // Dropping `tx` on the error path rolls every write back.
                let out = f(&SqliteContactTx { conn: &tx })?;
                tx.commit().map_err(StoreError::from)?;
                Ok(out)
            })
        })
    }
}

/// `ContactTx` bound to an open transaction.
struct SqliteContactTx<'a> {
    conn: &'a Connection,
}

impl SqliteContactTx<'_> {
    fn insert(
        &self,
        email: Option<&str>,
        phone: Option<&str>,
        linked_id: Option<ContactId>,
        link_precedence: LinkPrecedence,
    ) -> Result<Contact, StoreError> {
        let now = Utc::now();
        let stamp = row_helpers::format_timestamp(now);
        self.conn.execute(
            "INSERT INTO contacts
                 (email, phone_number, linked_id, link_precedence, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                email,
                phone,
                linked_id.map(ContactId::get),
                link_precedence.to_string(),
                stamp,
                stamp,
            ],
        )?;

        // Round-trip through the stored text so callers see exactly what a
        // later read would return.
        let created_at = row_helpers::parse_timestamp(&stamp, "contacts", "created_at")?;
        Ok(Contact {
            id: ContactId::new(self.conn.last_insert_rowid()),
            email: email.map(str::to_owned),
            phone_number: phone.map(str::to_owned),
            linked_id,
            link_precedence,
            created_at,
            updated_at: created_at,
        })
    }
}

impl ContactTx for SqliteContactTx<'_> {
    #[instrument(skip(self))]
    fn find_by_email_or_phone(
        &self,
        email: Option<&str>,
        phone: Option<&str>,
    ) -> Result<Vec<Contact>, ResolveError> {
        Ok(query_contacts(
            self.conn,
            &format!(
                "SELECT {COLUMNS} FROM contacts
                 WHERE (?1 IS NOT NULL AND email = ?1) OR (?2 IS NOT NULL AND phone_number = ?2)
                 ORDER BY created_at, id"
            ),
            &[&email, &phone],
        )?)
    }

    #[instrument(skip(self, ids), fields(ids = ids.len()))]
    fn find_by_ids_or_linked_ids(
        &self,
        ids: &BTreeSet<ContactId>,
    ) -> Result<Vec<Contact>, ResolveError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = (1..=ids.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {COLUMNS} FROM contacts
             WHERE id IN ({placeholders}) OR linked_id IN ({placeholders})
             ORDER BY created_at, id"
        );
        let raw: Vec<i64> = ids.iter().map(|id| id.get()).collect();
        let params: Vec<&dyn rusqlite::types::ToSql> =
            raw.iter().map(|id| id as &dyn rusqlite::types::ToSql).collect();
        Ok(query_contacts(self.conn, &sql, &params)?)
    }

    #[instrument(skip(self))]
    fn create_primary(
        &self,
        email: Option<&str>,
        phone: Option<&str>,
    ) -> Result<Contact, ResolveError> {
        let contact = self.insert(email, phone, None, LinkPrecedence::Primary)?;
        debug!(contact_id = %contact.id, "primary contact created");
        Ok(contact)
    }

    #[instrument(skip(self))]
    fn create_secondary(
        &self,
        email: Option<&str>,
        phone: Option<&str>,
        linked_id: ContactId,
    ) -> Result<Contact, ResolveError> {
        let contact = self.insert(email, phone, Some(linked_id), LinkPrecedence::Secondary)?;
        debug!(contact_id = %contact.id, "secondary contact created");
        Ok(contact)
    }

    #[instrument(skip(self))]
    fn reassign_to_secondary(
        &self,
        id: ContactId,
        new_linked_id: ContactId,
    ) -> Result<(), ResolveError> {
        let now = row_helpers::format_timestamp(Utc::now());
        let changed = self
            .conn
            .execute(
                "UPDATE contacts SET link_precedence = 'secondary', linked_id = ?1, updated_at = ?2
                 WHERE id = ?3",
                rusqlite::params![new_linked_id.get(), now, id.get()],
            )
            .map_err(StoreError::from)?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("contact {id}")).into());
        }
        Ok(())
    }

    #[instrument(skip(self))]
    fn relink_secondaries(
        &self,
        old_primary_id: ContactId,
        new_primary_id: ContactId,
    ) -> Result<(), ResolveError> {
        let now = row_helpers::format_timestamp(Utc::now());
        let moved = self
            .conn
            .execute(
                "UPDATE contacts SET linked_id = ?1, updated_at = ?2 WHERE linked_id = ?3",
                rusqlite::params![new_primary_id.get(), now, old_primary_id.get()],
            )
            .map_err(StoreError::from)?;
        debug!(moved, "secondaries relinked");
        Ok(())
    }
}

fn query_contacts(
    conn: &Connection,
    sql: &str,
    params: &[&dyn rusqlite::types::ToSql],
) -> Result<Vec<Contact>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    let mut results = Vec::new();
    while let Some(row) = rows.next()? {
        results.push(row_to_contact(row)?);
    }
    Ok(results)
}

fn row_to_contact(row: &rusqlite::Row<'_>) -> Result<Contact, StoreError> {
    const T: &str = "contacts";
    let precedence: String = row_helpers::get(row, 4, T, "link_precedence")?;
    let created_at: String = row_helpers::get(row, 5, T, "created_at")?;
    let updated_at: String = row_helpers::get(row, 6, T, "updated_at")?;

    Ok(Contact {
        id: ContactId::new(row_helpers::get(row, 0, T, "id")?),
        email: row_helpers::get_opt(row, 1, T, "email")?,
        phone_number: row_helpers::get_opt(row, 2, T, "phone_number")?,
        linked_id: row_helpers::get_opt::<i64>(row, 3, T, "linked_id")?.map(ContactId::new),
        link_precedence: row_helpers::parse_enum(&precedence, T, "link_precedence")?,
        created_at: row_helpers::parse_timestamp(&created_at, T, "created_at")?,
        updated_at: row_helpers::parse_timestamp(&updated_at, T, "updated_at")?,
    })
}
