//! Untimed exclusive-claim engine over the four fixed parking spots.
//! Occupancy is indefinite until an explicit release, no expiry.

use std::sync::Arc;

use log::info;
use sqlx::Row;

use crate::common::error::HouseError;
use crate::common::models::ParkingSpot;
use crate::server::database::Database;

pub const SPOT_COUNT: i64 = 4;

fn spot_from_row(row: &sqlx::sqlite::SqliteRow) -> ParkingSpot {
    ParkingSpot {
        spot_number: row.get("spot_number"),
        occupant_id: row.get("occupant_id"),
        vehicle_info: row.get("vehicle_info"),
        occupied: row.get::<i64, _>("occupied") != 0,
    }
}

pub async fn list(db: Arc<Database>) -> Result<Vec<ParkingSpot>, HouseError> {
    let rows = sqlx::query(
        "SELECT spot_number, occupant_id, vehicle_info, occupied FROM parking_spots ORDER BY spot_number",
    )
    .fetch_all(&db.pool)
    .await?;
    Ok(rows.iter().map(spot_from_row).collect())
}

pub async fn spot(db: Arc<Database>, spot_number: i64) -> Result<ParkingSpot, HouseError> {
    let row = sqlx::query(
        "SELECT spot_number, occupant_id, vehicle_info, occupied FROM parking_spots WHERE spot_number = ?",
    )
    .bind(spot_number)
    .fetch_optional(&db.pool)
    .await?;
    row.map(|r| spot_from_row(&r)).ok_or(HouseError::NotFound("parking spot"))
}

/// Claims a free spot. One spot per housemate; the write is conditional on
/// the spot still being free so concurrent claimants cannot overwrite each
/// other.
pub async fn claim(
    db: Arc<Database>,
    spot_number: i64,
    member_id: &str,
    vehicle_info: Option<&str>,
) -> Result<ParkingSpot, HouseError> {
    if !(1..=SPOT_COUNT).contains(&spot_number) {
        return Err(HouseError::Validation(format!(
            "spot number must be between 1 and {}",
            SPOT_COUNT
        )));
    }

    let already = sqlx::query("SELECT 1 FROM parking_spots WHERE occupant_id = ?")
        .bind(member_id)
        .fetch_optional(&db.pool)
        .await?;
    if already.is_some() {
        return Err(HouseError::AlreadyParked);
    }

    let res = sqlx::query(
        "UPDATE parking_spots SET occupant_id = ?, vehicle_info = ?, occupied = 1 WHERE spot_number = ? AND occupied = 0",
    )
    .bind(member_id)
    .bind(vehicle_info)
    .bind(spot_number)
    .execute(&db.pool)
    .await?;
    if res.rows_affected() == 0 {
        return Err(HouseError::SpotTaken);
    }

    info!("[PARKING] Spot {} claimed by {}", spot_number, member_id);
    spot(db, spot_number).await
}

/// Releases a spot held by the caller. Releasing a free spot is a no-op.
pub async fn release(
    db: Arc<Database>,
    spot_number: i64,
    caller: &str,
) -> Result<ParkingSpot, HouseError> {
    let current = spot(db.clone(), spot_number).await?;
    if !current.occupied {
        return Ok(current);
    }
    if current.occupant_id.as_deref() != Some(caller) {
        return Err(HouseError::NotOccupant);
    }

    sqlx::query(
        "UPDATE parking_spots SET occupant_id = NULL, vehicle_info = NULL, occupied = 0 WHERE spot_number = ?",
    )
    .bind(spot_number)
    .execute(&db.pool)
    .await?;

    info!("[PARKING] Spot {} released by {}", spot_number, caller);
    spot(db, spot_number).await
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

    #[tokio::test]
    async fn four_spots_are_seeded_free() {
        let db = setup().await;
        let spots = list(db).await.unwrap();
        assert_eq!(spots.len(), 4);
        assert_eq!(spots.iter().map(|s| s.spot_number).collect::<Vec<_>>(), vec![1, 2, 3, 4]);
        assert!(spots.iter().all(|s| !s.occupied && s.occupant_id.is_none()));
    }

    #[tokio::test]
    async fn claim_on_a_free_spot_succeeds() {
        let db = setup().await;
        let spot = claim(db, 3, "m1", Some("blue Swift, KA-01")).await.unwrap();
        assert!(spot.occupied);
        assert_eq!(spot.occupant_id.as_deref(), Some("m1"));
        assert_eq!(spot.vehicle_info.as_deref(), Some("blue Swift, KA-01"));
    }

    #[tokio::test]
    async fn second_claim_on_the_same_spot_fails() {
        let db = setup().await;
        claim(db.clone(), 3, "m1", None).await.unwrap();

        // The conditional write makes the loser fail instead of silently
        // overwriting the first claimant
        let err = claim(db.clone(), 3, "m2", None).await.unwrap_err();
        assert!(matches!(err, HouseError::SpotTaken));

        let spot = spot(db, 3).await.unwrap();
        assert_eq!(spot.occupant_id.as_deref(), Some("m1"));
    }

    #[tokio::test]
    async fn one_spot_per_member() {
        let db = setup().await;
        claim(db.clone(), 1, "m1", None).await.unwrap();
        let err = claim(db, 2, "m1", None).await.unwrap_err();
        assert!(matches!(err, HouseError::AlreadyParked));
    }

    #[tokio::test]
    async fn release_requires_the_occupant() {
        let db = setup().await;
        claim(db.clone(), 2, "m1", None).await.unwrap();

        let err = release(db.clone(), 2, "m2").await.unwrap_err();
        assert!(matches!(err, HouseError::NotOccupant));

        let spot = release(db, 2, "m1").await.unwrap();
        assert!(!spot.occupied);
        assert!(spot.occupant_id.is_none() && spot.vehicle_info.is_none());
    }

    #[tokio::test]
    async fn release_then_reclaim_by_someone_else() {
        let db = setup().await;
        claim(db.clone(), 4, "m1", None).await.unwrap();
        release(db.clone(), 4, "m1").await.unwrap();

        let spot = claim(db, 4, "m2", None).await.unwrap();
        assert_eq!(spot.occupant_id.as_deref(), Some("m2"));
    }

    #[tokio::test]
    async fn out_of_range_spot_is_rejected() {
        let db = setup().await;
        let err = claim(db, 5, "m1", None).await.unwrap_err();
        assert!(matches!(err, HouseError::Validation(_)));
    }
}
