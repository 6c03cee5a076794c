//! Expense ledger with multi-party ratification.
//!
//! An expense starts pending; the three non-payer housemates vote
//! independently and the status is a pure function of the two vote sets.
//! Approval needs all non-payer members; rejection deliberately needs only
//! two votes, so a bad charge is easier to strike down than to ratify.

use std::sync::Arc;

use log::info;
use sqlx::Row;

use crate::common::error::HouseError;
use crate::common::models::{Expense, ExpenseStatus, MemberBalance};
use crate::server::database::Database;
use crate::server::identity::{self, HOUSEHOLD_SIZE};

pub const CATEGORIES: [&str; 8] = [
    "Groceries",
    "Utilities",
    "Rent",
    "Internet",
    "Cleaning",
    "Food Delivery",
    "Entertainment",
    "Other",
];

/// Every non-payer housemate must approve.
pub const APPROVAL_QUORUM: usize = HOUSEHOLD_SIZE - 1;
/// Two rejections strike an expense down.
pub const REJECTION_THRESHOLD: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VoteKind {
    Approve,
    Reject,
}

impl VoteKind {
    fn as_str(&self) -> &'static str {
        match self {
            VoteKind::Approve => "approve",
            VoteKind::Reject => "reject",
        }
    }
}

async fn load_votes(db: &Database, expense_id: &str) -> Result<(Vec<String>, Vec<String>), HouseError> {
    let rows = sqlx::query("SELECT voter_id, kind FROM expense_votes WHERE expense_id = ? ORDER BY created_at ASC")
        .bind(expense_id)
        .fetch_all(&db.pool)
        .await?;
    let mut approvals = Vec::new();
    let mut rejections = Vec::new();
    for row in rows.iter() {
        let voter: String = row.get("voter_id");
        match row.get::<String, _>("kind").as_str() {
            "approve" => approvals.push(voter),
            _ => rejections.push(voter),
        }
    }
    Ok((approvals, rejections))
}

async fn expense_from_row(db: &Database, row: &sqlx::sqlite::SqliteRow) -> Result<Expense, HouseError> {
    let id: String = row.get("id");
    let (approvals, rejections) = load_votes(db, &id).await?;
    Ok(Expense {
        id,
        description: row.get("description"),
        amount: row.get("amount"),
        category: row.get("category"),
        payer_id: row.get("payer_id"),
        receipt_ref: row.get("receipt_ref"),
        created_at: row.get("created_at"),
        status: ExpenseStatus::parse(&row.get::<String, _>("status")),
        approvals,
        rejections,
    })
}

pub async fn get(db: Arc<Database>, expense_id: &str) -> Result<Expense, HouseError> {
    let row = sqlx::query(
        "SELECT id, description, amount, category, payer_id, receipt_ref, created_at, status FROM expenses WHERE id = ?",
    )
    .bind(expense_id)
    .fetch_optional(&db.pool)
    .await?
    .ok_or(HouseError::NotFound("expense"))?;
    expense_from_row(&db, &row).await
}

pub async fn list(db: Arc<Database>) -> Result<Vec<Expense>, HouseError> {
    let rows = sqlx::query(
        "SELECT id, description, amount, category, payer_id, receipt_ref, created_at, status FROM expenses ORDER BY created_at DESC",
    )
    .fetch_all(&db.pool)
    .await?;
    let mut expenses = Vec::with_capacity(rows.len());
    for row in rows.iter() {
        expenses.push(expense_from_row(&db, row).await?);
    }
    Ok(expenses)
}

/// Records a new expense in the pending state with empty vote sets.
/// Description and amount are immutable after this point.
pub async fn submit(
    db: Arc<Database>,
    payer_id: &str,
    description: &str,
    amount: f64,
    category: &str,
    receipt_ref: Option<&str>,
) -> Result<Expense, HouseError> {
    if description.trim().is_empty() {
        return Err(HouseError::Validation("description must not be empty".to_string()));
    }
    if !amount.is_finite() || amount <= 0.0 {
        return Err(HouseError::Validation("amount must be a positive number".to_string()));
    }
    if !CATEGORIES.contains(&category) {
        return Err(HouseError::Validation(format!(
            "unknown category: {} (expected one of {})",
            category,
            CATEGORIES.join(", ")
        )));
    }

    let expense = Expense {
        id: uuid::Uuid::new_v4().to_string(),
        description: description.trim().to_string(),
        amount,
        category: category.to_string(),
        payer_id: payer_id.to_string(),
        receipt_ref: receipt_ref.map(|r| r.to_string()),
        created_at: chrono::Utc::now().timestamp(),
        status: ExpenseStatus::Pending,
        approvals: Vec::new(),
        rejections: Vec::new(),
    };
    sqlx::query(
        "INSERT INTO expenses (id, description, amount, category, payer_id, receipt_ref, created_at, status) VALUES (?, ?, ?, ?, ?, ?, ?, 'pending')",
    )
    .bind(&expense.id)
    .bind(&expense.description)
    .bind(expense.amount)
    .bind(&expense.category)
    .bind(&expense.payer_id)
    .bind(&expense.receipt_ref)
    .bind(expense.created_at)
    .execute(&db.pool)
    .await?;

    info!("[EXPENSES] {} submitted {:.2} ({})", payer_id, amount, category);
    Ok(expense)
}

async fn cast_vote(
    db: Arc<Database>,
    expense_id: &str,
    voter_id: &str,
    kind: VoteKind,
) -> Result<Expense, HouseError> {
    let expense = get(db.clone(), expense_id).await?;

    if expense.status != ExpenseStatus::Pending {
        return Err(HouseError::TerminalExpense);
    }
    if expense.payer_id == voter_id {
        return Err(HouseError::SelfVote);
    }
    if expense.approvals.iter().any(|v| v == voter_id)
        || expense.rejections.iter().any(|v| v == voter_id)
    {
        return Err(HouseError::DuplicateVote);
    }

    // The (expense_id, voter_id) primary key backs the duplicate check
    // under concurrency: the second insert of a racing pair fails here.
    let res = sqlx::query(
        "INSERT INTO expense_votes (expense_id, voter_id, kind, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(expense_id)
    .bind(voter_id)
    .bind(kind.as_str())
    .bind(chrono::Utc::now().timestamp())
    .execute(&db.pool)
    .await;
    if let Err(e) = res {
        if e.to_string().to_lowercase().contains("unique") {
            return Err(HouseError::DuplicateVote);
        }
        return Err(HouseError::Transport(e));
    }

    let (approvals, rejections) = load_votes(&db, expense_id).await?;
    let new_status = if approvals.len() >= APPROVAL_QUORUM {
        Some(ExpenseStatus::Approved)
    } else if rejections.len() >= REJECTION_THRESHOLD {
        Some(ExpenseStatus::Rejected)
    } else {
        None
    };
    if let Some(status) = new_status {
        // Conditional on still-pending: once terminal, the status never moves
        sqlx::query("UPDATE expenses SET status = ? WHERE id = ? AND status = 'pending'")
            .bind(status.as_str())
            .bind(expense_id)
            .execute(&db.pool)
            .await?;
        info!("[EXPENSES] Expense {} is now {}", expense_id, status.as_str());
    }

    get(db, expense_id).await
}

pub async fn approve(db: Arc<Database>, expense_id: &str, voter_id: &str) -> Result<Expense, HouseError> {
    cast_vote(db, expense_id, voter_id, VoteKind::Approve).await
}

pub async fn reject(db: Arc<Database>, expense_id: &str, voter_id: &str) -> Result<Expense, HouseError> {
    cast_vote(db, expense_id, voter_id, VoteKind::Reject).await
}

/// Equal-split balances over approved expenses only. Recomputed on demand,
/// never stored; no debt-netting between members is attempted.
pub async fn balances(db: Arc<Database>) -> Result<Vec<MemberBalance>, HouseError> {
    let total: f64 = sqlx::query("SELECT COALESCE(SUM(amount), 0.0) AS total FROM expenses WHERE status = 'approved'")
        .fetch_one(&db.pool)
        .await?
        .get("total");
    let share = total / HOUSEHOLD_SIZE as f64;

    let members = identity::list_members(db.clone()).await?;
    let mut balances = Vec::with_capacity(members.len());
    for member in members {
        let paid: f64 = sqlx::query(
            "SELECT COALESCE(SUM(amount), 0.0) AS paid FROM expenses WHERE status = 'approved' AND payer_id = ?",
        )
        .bind(&member.id)
        .fetch_one(&db.pool)
        .await?
        .get("paid");
        balances.push(MemberBalance {
            member_id: member.id,
            role_name: member.role_name,
            paid,
            share,
            balance: paid - share,
        });
    }
    Ok(balances)
}
