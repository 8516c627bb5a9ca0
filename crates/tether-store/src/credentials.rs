use chrono::Utc;
use rusqlite::Connection;
use tracing::{debug, instrument};

use tether_core::{CredentialDelta, CredentialSet};

use crate::database::Database;
use crate::error::StoreError;

/// Local mirror of the credential set: one row per slot.
///
/// The protocol library reads this side; every write is a single
/// transaction so a slot set is never half-applied.
#[derive(Clone)]
pub struct CredentialCache {
    db: Database,
}

impl CredentialCache {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub fn load(&self) -> Result<CredentialSet, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT slot, payload FROM credential_slots")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?)))?
                .collect::<Result<CredentialSet, _>>()?;
            Ok(rows)
        })
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.slot_count()? == 0)
    }

    pub fn slot_count(&self) -> Result<usize, StoreError> {
        self.db.with_conn(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM credential_slots", [], |row| row.get(0))?;
            Ok(n as usize)
        })
    }

    /// Replace the whole cache with `set`, all or nothing.
    #[instrument(skip(self, set), fields(slots = set.len()))]
    pub fn replace_all(&self, set: &CredentialSet) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute("DELETE FROM credential_slots", [])?;
            upsert_slots(&tx, set)?;
            tx.commit()?;
            Ok(())
        })
    }

    /// Apply a library mutation in one transaction.
    #[instrument(skip(self, delta), fields(upserts = delta.upserts.len(), removed = delta.removed.len()))]
    pub fn apply(&self, delta: &CredentialDelta) -> Result<(), StoreError> {
        if delta.is_empty() {
            return Ok(());
        }
        self.db.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            upsert_slots(&tx, &delta.upserts)?;
            for slot in &delta.removed {
                tx.execute("DELETE FROM credential_slots WHERE slot = ?1", [slot])?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    #[instrument(skip(self))]
    pub fn clear(&self) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let removed = conn.execute("DELETE FROM credential_slots", [])?;
            debug!(removed, "local credential cache cleared");
            Ok(())
        })
    }
}

fn upsert_slots(conn: &Connection, set: &CredentialSet) -> Result<(), StoreError> {
    let now = Utc::now().to_rfc3339();
    let mut stmt = conn.prepare_cached(
        "INSERT INTO credential_slots (slot, payload, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(slot) DO UPDATE SET payload = excluded.payload, updated_at = excluded.updated_at",
    )?;
    for (slot, payload) in set.iter() {
        stmt.execute(rusqlite::params![slot, payload, now])?;
    }
    Ok(())
}
