//! Database-level restore lock.
//!
//! The engine's restore slot only excludes sessions of one engine. This row
//! excludes sessions of every engine and process opened on the same file. A
//! holder that died without releasing it leaves a row that lapses at
//! `expires_at`.

use chrono::{DateTime, Utc};
use loopin_core::artifact::ArtifactId;
use rusqlite::{Connection, OptionalExtension as _, TransactionBehavior, params};
use tracing::warn;
use uuid::Uuid;

use crate::{
  Error, Result,
  encode::{decode_dt, encode_dt},
  schema::RESTORE_LOCK,
};

#[derive(Debug)]
struct Held {
  session_id:  String,
  artifact_id: ArtifactId,
  expires_at:  DateTime<Utc>,
}

fn read(conn: &Connection) -> Result<Option<Held>> {
  let row = conn
    .query_row(
      &format!("SELECT session_id, artifact_id, expires_at FROM {RESTORE_LOCK} WHERE id = 1"),
      [],
      |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?, r.get::<_, String>(2)?)),
    )
    .optional()?;
  row
    .map(|(session_id, artifact_id, expires_at)| {
      Ok(Held {
        session_id,
        artifact_id: ArtifactId::from(artifact_id),
        expires_at: decode_dt(&expires_at)?,
      })
    })
    .transpose()
}

/// Take the lock for `session_id`, or fail with
/// [`Error::RestoreInProgress`] naming the live holder's target.
pub(crate) fn claim(
  conn: &mut Connection,
  session_id: Uuid,
  artifact_id: &ArtifactId,
  ttl: chrono::Duration,
) -> Result<()> {
  let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
  let now = Utc::now();
  if let Some(held) = read(&tx)? {
    if held.expires_at > now {
      return Err(Error::RestoreInProgress(held.artifact_id));
    }
    warn!(
      session_id = %held.session_id,
      artifact_id = %held.artifact_id,
      "restore lock expired; taking it over",
    );
  }
  tx.execute(
    &format!(
      "INSERT OR REPLACE INTO {RESTORE_LOCK}
         (id, session_id, artifact_id, acquired_at, expires_at)
       VALUES (1, ?1, ?2, ?3, ?4)"
    ),
    params![
      session_id.to_string(),
      artifact_id.as_str(),
      encode_dt(now),
      encode_dt(now + ttl)
    ],
  )?;
  tx.commit()?;
  Ok(())
}

/// Drop the lock if `session_id` still holds it.
pub(crate) fn release(conn: &Connection, session_id: Uuid) -> Result<bool> {
  let removed = conn.execute(
    &format!("DELETE FROM {RESTORE_LOCK} WHERE id = 1 AND session_id = ?1"),
    params![session_id.to_string()],
  )?;
  Ok(removed > 0)
}

/// Target of the restore currently holding the lock, if it has not lapsed.
pub(crate) fn holder(conn: &Connection) -> Result<Option<ArtifactId>> {
  Ok(read(conn)?.filter(|h| h.expires_at > Utc::now()).map(|h| h.artifact_id))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::schema::BOOKKEEPING;

  fn conn() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch(BOOKKEEPING).unwrap();
    conn
  }

  #[test]
  fn second_claim_is_rejected_until_release() {
    let mut conn = conn();
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let target = ArtifactId::from("loopin_backup_manual_a");
    let ttl = chrono::Duration::minutes(5);

    claim(&mut conn, a, &target, ttl).unwrap();
    assert_eq!(holder(&conn).unwrap(), Some(target.clone()));

    let err = claim(&mut conn, b, &ArtifactId::from("loopin_backup_manual_b"), ttl).unwrap_err();
    assert!(matches!(err, Error::RestoreInProgress(ref held) if held == &target), "{err:?}");

    assert!(!release(&conn, b).unwrap());
    assert!(release(&conn, a).unwrap());
    assert_eq!(holder(&conn).unwrap(), None);
    claim(&mut conn, b, &target, ttl).unwrap();
  }

  #[test]
  fn lapsed_lock_is_taken_over() {
    let mut conn = conn();
    let target = ArtifactId::from("loopin_backup_manual_a");
    claim(&mut conn, Uuid::new_v4(), &target, chrono::Duration::seconds(-1)).unwrap();
    assert_eq!(holder(&conn).unwrap(), None);

    let fresh = Uuid::new_v4();
    claim(&mut conn, fresh, &target, chrono::Duration::minutes(5)).unwrap();
    assert!(release(&conn, fresh).unwrap());
  }
}
