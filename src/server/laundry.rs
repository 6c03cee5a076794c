//! Timed-exclusive reservation engine for the two shared appliances.
//!
//! One row per appliance, states Idle/Active. Expiry is lazy: a slot past
//! its end time stays "active" in storage until some reader observes it.

use std::sync::Arc;

use log::info;
use sqlx::Row;

use crate::common::error::HouseError;
use crate::common::models::{Appliance, ResourceSlot};
use crate::server::database::Database;

/// Durations offered by the clients. Any positive value is accepted here.
pub const DURATION_MENU: [i64; 4] = [30, 45, 60, 90];

fn slot_from_row(appliance: Appliance, row: &sqlx::sqlite::SqliteRow) -> ResourceSlot {
    ResourceSlot {
        appliance,
        occupant_id: row.get("occupant_id"),
        start_time: row.get("start_time"),
        end_time: row.get("end_time"),
        active: row.get::<i64, _>("active") != 0,
    }
}

async fn fetch(db: &Database, appliance: Appliance) -> Result<ResourceSlot, HouseError> {
    let row = sqlx::query(
        "SELECT occupant_id, start_time, end_time, active FROM resource_slots WHERE appliance = ?",
    )
    .bind(appliance.as_str())
    .fetch_optional(&db.pool)
    .await?;
    match row {
        Some(row) => Ok(slot_from_row(appliance, &row)),
        // Seeded at migration; a missing row means the database was not migrated
        None => Err(HouseError::NotFound("appliance slot")),
    }
}

async fn reset(db: &Database, appliance: Appliance) -> Result<(), HouseError> {
    sqlx::query(
        "UPDATE resource_slots SET occupant_id = NULL, start_time = NULL, end_time = NULL, active = 0 WHERE appliance = ?",
    )
    .bind(appliance.as_str())
    .execute(&db.pool)
    .await?;
    Ok(())
}

/// Fetches the slot, closing it first if the reservation has run out
/// (lazy expiry).
pub async fn read(db: Arc<Database>, appliance: Appliance) -> Result<ResourceSlot, HouseError> {
    let slot = fetch(&db, appliance).await?;
    if slot.active {
        let now = chrono::Utc::now().timestamp();
        if let Some(end) = slot.end_time {
            if now > end {
                info!("[LAUNDRY] Reservation on {} expired, releasing", appliance);
                reset(&db, appliance).await?;
                return Ok(ResourceSlot::idle(appliance));
            }
        }
    }
    Ok(slot)
}

/// Claims the appliance for `duration_minutes` starting now.
///
/// The write is conditional on the row still being idle, so two concurrent
/// claimants cannot silently overwrite each other: the loser gets
/// `SlotTaken` and must re-fetch.
pub async fn claim(
    db: Arc<Database>,
    appliance: Appliance,
    member_id: &str,
    duration_minutes: i64,
) -> Result<ResourceSlot, HouseError> {
    if duration_minutes <= 0 {
        return Err(HouseError::Validation(
            "duration must be a positive number of minutes".to_string(),
        ));
    }

    // Read first so an expired reservation does not block the claim
    let current = read(db.clone(), appliance).await?;
    if current.active {
        return Err(HouseError::SlotTaken);
    }

    let now = chrono::Utc::now().timestamp();
    let end = now + duration_minutes * 60;
    let res = sqlx::query(
        "UPDATE resource_slots SET occupant_id = ?, start_time = ?, end_time = ?, active = 1 WHERE appliance = ? AND active = 0",
    )
    .bind(member_id)
    .bind(now)
    .bind(end)
    .bind(appliance.as_str())
    .execute(&db.pool)
    .await?;
    if res.rows_affected() == 0 {
        // Someone else claimed between our read and our write
        return Err(HouseError::SlotTaken);
    }

    info!(
        "[LAUNDRY] {} claimed by {} for {} minutes",
        appliance, member_id, duration_minutes
    );
    Ok(ResourceSlot {
        appliance,
        occupant_id: Some(member_id.to_string()),
        start_time: Some(now),
        end_time: Some(end),
        active: true,
    })
}

/// Early release by the current occupant. Releasing an idle slot is a
/// no-op; releasing someone else's reservation is a policy violation.
pub async fn release(
    db: Arc<Database>,
    appliance: Appliance,
    caller: &str,
) -> Result<ResourceSlot, HouseError> {
    let slot = read(db.clone(), appliance).await?;
    if !slot.active {
        return Ok(slot);
    }
    if slot.occupant_id.as_deref() != Some(caller) {
        return Err(HouseError::NotOccupant);
    }

    reset(&db, appliance).await?;
    info!("[LAUNDRY] {} released by {}", appliance, caller);
    Ok(ResourceSlot::idle(appliance))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup() -> Arc<Database> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let db = Database { pool };
        db.migrate().await.unwrap();
        Arc::new(db)
    }

    // Forces the stored end time into the past so expiry can be observed
    // without sleeping through a reservation.
    async fn backdate_end(db: &Database, appliance: Appliance, seconds_ago: i64) {
        let past = chrono::Utc::now().timestamp() - seconds_ago;
        sqlx::query("UPDATE resource_slots SET end_time = ? WHERE appliance = ?")
            .bind(past)
            .bind(appliance.as_str())
            .execute(&db.pool)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn fields_are_null_or_set_as_a_unit() {
        let db = setup().await;

        let idle = read(db.clone(), Appliance::Washer).await.unwrap();
        assert!(!idle.active);
        assert!(idle.occupant_id.is_none() && idle.start_time.is_none() && idle.end_time.is_none());

        let active = claim(db.clone(), Appliance::Washer, "m1", 30).await.unwrap();
        assert!(active.active);
        assert!(active.occupant_id.is_some() && active.start_time.is_some() && active.end_time.is_some());
        assert!(active.end_time.unwrap() > active.start_time.unwrap());

        let released = release(db, Appliance::Washer, "m1").await.unwrap();
        assert!(!released.active);
        assert!(released.occupant_id.is_none() && released.start_time.is_none() && released.end_time.is_none());
    }

    #[tokio::test]
    async fn claim_rejects_non_positive_duration() {
        let db = setup().await;
        let err = claim(db.clone(), Appliance::Washer, "m1", 0).await.unwrap_err();
        assert!(matches!(err, HouseError::Validation(_)));
        let err = claim(db, Appliance::Washer, "m1", -30).await.unwrap_err();
        assert!(matches!(err, HouseError::Validation(_)));
    }

    #[tokio::test]
    async fn second_claim_on_active_slot_fails() {
        let db = setup().await;
        claim(db.clone(), Appliance::Dryer, "m1", 45).await.unwrap();
        let err = claim(db, Appliance::Dryer, "m2", 30).await.unwrap_err();
        assert!(matches!(err, HouseError::SlotTaken));
    }

    #[tokio::test]
    async fn appliances_are_independent() {
        let db = setup().await;
        claim(db.clone(), Appliance::Washer, "m1", 30).await.unwrap();

        let dryer = read(db.clone(), Appliance::Dryer).await.unwrap();
        assert!(!dryer.active);
        claim(db, Appliance::Dryer, "m2", 60).await.unwrap();
    }

    #[tokio::test]
    async fn read_closes_an_expired_reservation() {
        let db = setup().await;
        claim(db.clone(), Appliance::Washer, "m1", 30).await.unwrap();
        backdate_end(&db, Appliance::Washer, 60).await;

        let slot = read(db.clone(), Appliance::Washer).await.unwrap();
        assert!(!slot.active);
        assert!(slot.occupant_id.is_none());

        // The release was persisted, not just reported
        let again = read(db, Appliance::Washer).await.unwrap();
        assert!(!again.active);
    }

    #[tokio::test]
    async fn claim_succeeds_over_an_expired_reservation() {
        let db = setup().await;
        claim(db.clone(), Appliance::Washer, "m1", 30).await.unwrap();
        backdate_end(&db, Appliance::Washer, 60).await;

        let slot = claim(db, Appliance::Washer, "m2", 45).await.unwrap();
        assert_eq!(slot.occupant_id.as_deref(), Some("m2"));
    }

    #[tokio::test]
    async fn reservation_active_until_end_then_idle() {
        let db = setup().await;
        let slot = claim(db.clone(), Appliance::Washer, "m1", 30).await.unwrap();

        // Just before the end time the slot is still active
        let before = read(db.clone(), Appliance::Washer).await.unwrap();
        assert!(before.active);
        let remaining = slot.end_time.unwrap() - chrono::Utc::now().timestamp();
        assert!(remaining > 0 && remaining <= 30 * 60);

        // Just past the end time a read returns an idle slot
        backdate_end(&db, Appliance::Washer, 1).await;
        let after = read(db, Appliance::Washer).await.unwrap();
        assert!(!after.active);
    }

    #[tokio::test]
    async fn only_the_occupant_may_release() {
        let db = setup().await;
        claim(db.clone(), Appliance::Washer, "m1", 30).await.unwrap();

        let err = release(db.clone(), Appliance::Washer, "m2").await.unwrap_err();
        assert!(matches!(err, HouseError::NotOccupant));

        // Still held by the original occupant
        let slot = read(db, Appliance::Washer).await.unwrap();
        assert_eq!(slot.occupant_id.as_deref(), Some("m1"));
    }

    #[tokio::test]
    async fn releasing_an_idle_slot_is_a_no_op() {
        let db = setup().await;
        let slot = release(db, Appliance::Dryer, "m1").await.unwrap();
        assert!(!slot.active);
    }
}
