use std::sync::Arc;

use log::info;
use sqlx::Row;

use crate::common::error::HouseError;
use crate::common::models::Member;
use crate::server::database::Database;

/// The four fixed household roles. Nobody else lives here.
pub const HOUSEHOLD: [&str; 4] = ["Ram", "Munna", "Suriya", "Kaushik"];
pub const HOUSEHOLD_SIZE: usize = HOUSEHOLD.len();

struct SecurityQuestion {
    role: &'static str,
    question: &'static str,
    answer: &'static str,
}

// Shared-secret gate per role. Answers are compared case-insensitively
// after trimming.
const SECURITY_QUESTIONS: [SecurityQuestion; 4] = [
    SecurityQuestion {
        role: "Ram",
        question: "What is your favorite meme?",
        answer: "67",
    },
    SecurityQuestion {
        role: "Munna",
        question: "What is \"golgappa\" or \"phuchka\" in english? Type the answer with no spaces.",
        answer: "panipuri",
    },
    SecurityQuestion {
        role: "Suriya",
        question: "What is ചായ in english?",
        answer: "tea",
    },
    SecurityQuestion {
        role: "Kaushik",
        question: "What is the first name of the lead actor of the movie \"Hey Ram!\"? (It is a single word starts with 'K')",
        answer: "kamal",
    },
];

pub fn security_question(role: &str) -> Option<&'static str> {
    SECURITY_QUESTIONS
        .iter()
        .find(|q| q.role == role)
        .map(|q| q.question)
}

fn member_from_row(row: &sqlx::sqlite::SqliteRow) -> Member {
    Member {
        id: row.get("id"),
        external_id: row.get("external_id"),
        role_name: row.get("role_name"),
        created_at: row.get("created_at"),
    }
}

/// Looks up a prior binding for an authenticated external identity.
pub async fn resolve(db: Arc<Database>, external_id: &str) -> Result<Option<Member>, HouseError> {
    let row = sqlx::query("SELECT id, external_id, role_name, created_at FROM members WHERE external_id = ?")
        .bind(external_id)
        .fetch_optional(&db.pool)
        .await?;
    Ok(row.map(|r| member_from_row(&r)))
}

/// Like [`resolve`] but an unbound identity is an error. Used by every
/// mutating command.
pub async fn require_member(db: Arc<Database>, external_id: &str) -> Result<Member, HouseError> {
    resolve(db, external_id).await?.ok_or(HouseError::UnknownMember)
}

pub async fn member_by_id(db: Arc<Database>, member_id: &str) -> Result<Option<Member>, HouseError> {
    let row = sqlx::query("SELECT id, external_id, role_name, created_at FROM members WHERE id = ?")
        .bind(member_id)
        .fetch_optional(&db.pool)
        .await?;
    Ok(row.map(|r| member_from_row(&r)))
}

pub async fn list_members(db: Arc<Database>) -> Result<Vec<Member>, HouseError> {
    let rows = sqlx::query("SELECT id, external_id, role_name, created_at FROM members ORDER BY created_at ASC")
        .fetch_all(&db.pool)
        .await?;
    Ok(rows.iter().map(member_from_row).collect())
}

/// Roles still open for claiming: all four minus the already-bound ones.
pub async fn available_roles(db: Arc<Database>) -> Result<Vec<String>, HouseError> {
    let rows = sqlx::query("SELECT role_name FROM members")
        .fetch_all(&db.pool)
        .await?;
    let bound: Vec<String> = rows.iter().map(|r| r.get::<String, _>("role_name")).collect();
    Ok(HOUSEHOLD
        .iter()
        .filter(|role| !bound.iter().any(|b| b == *role))
        .map(|role| role.to_string())
        .collect())
}

/// Binds an external identity to a role, gated by the role's security
/// question. Binding is permanent; `unbind` is the only recovery path.
pub async fn bind(
    db: Arc<Database>,
    external_id: &str,
    role: &str,
    answer: &str,
) -> Result<Member, HouseError> {
    if resolve(db.clone(), external_id).await?.is_some() {
        return Err(HouseError::AlreadyBound);
    }

    let question = SECURITY_QUESTIONS
        .iter()
        .find(|q| q.role == role)
        .ok_or_else(|| HouseError::UnknownRole(role.to_string()))?;

    let open = available_roles(db.clone()).await?;
    if open.is_empty() {
        // Access-denied terminal state: nothing left to offer this identity
        return Err(HouseError::NoRolesAvailable);
    }
    if !open.iter().any(|r| r == role) {
        return Err(HouseError::RoleTaken);
    }

    // No retry limit on wrong answers; the caller just asks again
    if answer.trim().to_lowercase() != question.answer.to_lowercase() {
        return Err(HouseError::WrongAnswer);
    }

    let member = Member {
        id: uuid::Uuid::new_v4().to_string(),
        external_id: external_id.to_string(),
        role_name: role.to_string(),
        created_at: chrono::Utc::now().timestamp(),
    };
    sqlx::query("INSERT INTO members (id, external_id, role_name, created_at) VALUES (?, ?, ?, ?)")
        .bind(&member.id)
        .bind(&member.external_id)
        .bind(&member.role_name)
        .bind(member.created_at)
        .execute(&db.pool)
        .await?;

    info!("[IDENTITY] Bound external identity to role {}", member.role_name);
    Ok(member)
}

/// Administrative unbind for account-recovery situations. Exposed through
/// the db_inspect tool only, never through the command protocol.
pub async fn unbind(db: Arc<Database>, role: &str) -> Result<(), HouseError> {
    let res = sqlx::query("DELETE FROM members WHERE role_name = ?")
        .bind(role)
        .execute(&db.pool)
        .await?;
    if res.rows_affected() == 0 {
        return Err(HouseError::NotFound("role binding"));
    }
    info!("[IDENTITY] Unbound role {}", role);
    Ok(())
}
