// Common models shared between the engines and the wire layer
use serde::{Deserialize, Serialize};

use crate::common::error::HouseError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Member {
    pub id: String,
    pub external_id: String,
    pub role_name: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Appliance {
    Washer,
    Dryer,
}

impl Appliance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Appliance::Washer => "washer",
            Appliance::Dryer => "dryer",
        }
    }

    pub const ALL: [Appliance; 2] = [Appliance::Washer, Appliance::Dryer];
}

impl std::str::FromStr for Appliance {
    type Err = HouseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "washer" => Ok(Appliance::Washer),
            "dryer" => Ok(Appliance::Dryer),
            other => Err(HouseError::Validation(format!(
                "unknown appliance: {} (expected washer or dryer)",
                other
            ))),
        }
    }
}

impl std::fmt::Display for Appliance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Time-boxed exclusive occupancy of one appliance. Occupant and both
/// timestamps are null or non-null as a unit; `active` is true iff all
/// three are set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceSlot {
    pub appliance: Appliance,
    pub occupant_id: Option<String>,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub active: bool,
}

impl ResourceSlot {
    pub fn idle(appliance: Appliance) -> Self {
        Self {
            appliance,
            occupant_id: None,
            start_time: None,
            end_time: None,
            active: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParkingSpot {
    pub spot_number: i64,
    pub occupant_id: Option<String>,
    pub vehicle_info: Option<String>,
    pub occupied: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExpenseStatus {
    Pending,
    Approved,
    Rejected,
}

impl ExpenseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpenseStatus::Pending => "pending",
            ExpenseStatus::Approved => "approved",
            ExpenseStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "approved" => ExpenseStatus::Approved,
            "rejected" => ExpenseStatus::Rejected,
            _ => ExpenseStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Expense {
    pub id: String,
    pub description: String,
    pub amount: f64,
    pub category: String,
    pub payer_id: String,
    pub receipt_ref: Option<String>,
    pub created_at: i64,
    pub status: ExpenseStatus,
    pub approvals: Vec<String>,
    pub rejections: Vec<String>,
}

/// Equal-split ledger line for one housemate, derived from approved
/// expenses only. Positive balance = owed money back.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemberBalance {
    pub member_id: String,
    pub role_name: String,
    pub paid: f64,
    pub share: f64,
    pub balance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub id: String,
    pub author_id: String,
    pub text: Option<String>,
    pub image_ref: Option<String>,
    pub created_at: i64,
    pub edited: bool,
}

/// One committed change to the chat log, fanned out to every subscriber.
/// `Deleted` carries the message's last-known field values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum ChatEvent {
    Inserted { message: ChatMessage },
    Updated { message: ChatMessage },
    Deleted { message: ChatMessage },
}
