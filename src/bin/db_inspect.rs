use coinquilini::server::database::Database;
use coinquilini::server::identity;
use sqlx::Row;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let db_path = std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:data/coinquilini.db".to_string());
    println!("Connecting to {}", db_path);
    let db = Arc::new(Database::connect(&db_path).await?);

    // Administrative recovery path: `db_inspect --unbind <role>` frees a
    // role whose housemate lost access to their account
    let args: Vec<String> = std::env::args().collect();
    if args.len() == 3 && args[1] == "--unbind" {
        identity::unbind(db.clone(), &args[2]).await?;
        println!("Unbound role {}", args[2]);
        return Ok(());
    }

    println!("\n-- members --");
    let rows = sqlx::query("SELECT id, external_id, role_name, created_at FROM members")
        .fetch_all(&db.pool)
        .await?;
    for r in rows.iter() {
        let id: String = r.try_get("id").unwrap_or_default();
        let external_id: String = r.try_get("external_id").unwrap_or_default();
        let role_name: String = r.try_get("role_name").unwrap_or_default();
        let created_at: i64 = r.try_get("created_at").unwrap_or(0);
        println!("id={} external_id={} role={} created_at={}", id, external_id, role_name, created_at);
    }

    println!("\n-- resource_slots --");
    let rows = sqlx::query("SELECT appliance, occupant_id, start_time, end_time, active FROM resource_slots")
        .fetch_all(&db.pool)
        .await?;
    for r in rows.iter() {
        let appliance: String = r.try_get("appliance").unwrap_or_default();
        let occupant: Option<String> = r.try_get("occupant_id").unwrap_or(None);
        let start: Option<i64> = r.try_get("start_time").unwrap_or(None);
        let end: Option<i64> = r.try_get("end_time").unwrap_or(None);
        let active: i64 = r.try_get("active").unwrap_or(0);
        println!(
            "appliance={} occupant={:?} start={:?} end={:?} active={}",
            appliance, occupant, start, end, active
        );
    }

    println!("\n-- parking_spots --");
    let rows = sqlx::query("SELECT spot_number, occupant_id, vehicle_info, occupied FROM parking_spots ORDER BY spot_number")
        .fetch_all(&db.pool)
        .await?;
    for r in rows.iter() {
        let spot: i64 = r.try_get("spot_number").unwrap_or(0);
        let occupant: Option<String> = r.try_get("occupant_id").unwrap_or(None);
        let vehicle: Option<String> = r.try_get("vehicle_info").unwrap_or(None);
        let occupied: i64 = r.try_get("occupied").unwrap_or(0);
        println!("spot={} occupant={:?} vehicle={:?} occupied={}", spot, occupant, vehicle, occupied);
    }

    println!("\n-- expenses --");
    let rows = sqlx::query("SELECT id, description, amount, category, payer_id, status, created_at FROM expenses ORDER BY created_at DESC")
        .fetch_all(&db.pool)
        .await?;
    for r in rows.iter() {
        let id: String = r.try_get("id").unwrap_or_default();
        let description: String = r.try_get("description").unwrap_or_default();
        let amount: f64 = r.try_get("amount").unwrap_or(0.0);
        let category: String = r.try_get("category").unwrap_or_default();
        let payer_id: String = r.try_get("payer_id").unwrap_or_default();
        let status: String = r.try_get("status").unwrap_or_default();
        let created_at: i64 = r.try_get("created_at").unwrap_or(0);
        println!(
            "id={} [{}] amount={:.2} category={} payer={} description={} created_at={}",
            id, status, amount, category, payer_id, description, created_at
        );
    }

    println!("\n-- expense_votes --");
    let rows = sqlx::query("SELECT expense_id, voter_id, kind, created_at FROM expense_votes")
        .fetch_all(&db.pool)
        .await?;
    for r in rows.iter() {
        let expense_id: String = r.try_get("expense_id").unwrap_or_default();
        let voter_id: String = r.try_get("voter_id").unwrap_or_default();
        let kind: String = r.try_get("kind").unwrap_or_default();
        let created_at: i64 = r.try_get("created_at").unwrap_or(0);
        println!("expense={} voter={} kind={} created_at={}", expense_id, voter_id, kind, created_at);
    }

    println!("\n-- chat_messages (last 10) --");
    let rows = sqlx::query("SELECT id, author_id, text, image_ref, created_at, edited FROM chat_messages ORDER BY created_at DESC LIMIT 10")
        .fetch_all(&db.pool)
        .await?;
    for r in rows.iter() {
        let id: String = r.try_get("id").unwrap_or_default();
        let author_id: String = r.try_get("author_id").unwrap_or_default();
        let text: Option<String> = r.try_get("text").unwrap_or(None);
        let image_ref: Option<String> = r.try_get("image_ref").unwrap_or(None);
        let created_at: i64 = r.try_get("created_at").unwrap_or(0);
        let edited: i64 = r.try_get("edited").unwrap_or(0);
        println!(
            "id={} author={} text_len={} image={:?} created_at={} edited={}",
            id,
            author_id,
            text.map(|t| t.len()).unwrap_or(0),
            image_ref,
            created_at,
            edited
        );
    }

    Ok(())
}
