use std::str::FromStr;
use std::sync::Arc;

use log::{debug, info};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::{TcpListener, TcpStream};

use crate::common::error::HouseError;
use crate::common::models::{Appliance, Expense, ExpenseStatus, Member, ResourceSlot};
use crate::server::chat::ChatFeed;
use crate::server::config::ServerConfig;
use crate::server::database::Database;
use crate::server::{chat, expenses, identity, laundry, parking};

pub struct Server {
    pub db: Arc<Database>,
    pub config: ServerConfig,
    pub feed: Arc<ChatFeed>,
}

impl Server {
    pub async fn run(&self, addr: &str) -> anyhow::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        info!("[SERVER] Listening on {}", addr);

        loop {
            let (stream, peer) = listener.accept().await?;
            info!("[SERVER] New connection from {}", peer);
            let db = self.db.clone();
            let config = self.config.clone();
            let feed = self.feed.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_client(db, config, feed, stream, peer).await {
                    info!("[SERVER] Client error ({}): {}", peer, e);
                }
            });
        }
    }

    pub async fn handle_command(&self, cmd: &str, args: &[&str]) -> String {
        debug!("[SERVER] Received command: {} ({} args)", cmd, args.len());
        match cmd {
            // IDENTITY
            "/whoami" if args.len() == 1 => match identity::resolve(self.db.clone(), args[0]).await {
                Ok(Some(member)) => format!("OK: You are {}", member.role_name),
                Ok(None) => self.unresolved_hint().await,
                Err(e) => err(e),
            },
            "/roles" => match identity::available_roles(self.db.clone()).await {
                Ok(open) if open.is_empty() => "OK: No roles available".to_string(),
                Ok(open) => {
                    let lines: Vec<String> = open
                        .iter()
                        .map(|role| {
                            format!("{}: {}", role, identity::security_question(role).unwrap_or(""))
                        })
                        .collect();
                    format!("OK: Available roles:\n{}", lines.join("\n"))
                }
                Err(e) => err(e),
            },
            "/bind" if args.len() >= 3 => {
                let external_id = args[0];
                let role = args[1];
                let answer = args[2..].join(" ");
                match identity::bind(self.db.clone(), external_id, role, &answer).await {
                    Ok(member) => format!("OK: Bound to {}", member.role_name),
                    Err(e) => err(e),
                }
            }

            // LAUNDRY
            "/slot_status" if args.len() == 1 => match Appliance::from_str(args[0]) {
                Ok(appliance) => match laundry::read(self.db.clone(), appliance).await {
                    Ok(slot) => self.format_slot(&slot).await,
                    Err(e) => err(e),
                },
                Err(e) => err(e),
            },
            "/slot_claim" if args.len() == 3 => {
                let member = match self.require_member(args[0]).await {
                    Ok(m) => m,
                    Err(msg) => return msg,
                };
                let appliance = match Appliance::from_str(args[1]) {
                    Ok(a) => a,
                    Err(e) => return err(e),
                };
                let minutes = match args[2].parse::<i64>() {
                    Ok(m) => m,
                    Err(_) => return "ERR: invalid input: duration must be a whole number of minutes".to_string(),
                };
                match laundry::claim(self.db.clone(), appliance, &member.id, minutes).await {
                    Ok(slot) => self.format_slot(&slot).await,
                    Err(e) => err(e),
                }
            }
            "/slot_release" if args.len() == 2 => {
                let member = match self.require_member(args[0]).await {
                    Ok(m) => m,
                    Err(msg) => return msg,
                };
                let appliance = match Appliance::from_str(args[1]) {
                    Ok(a) => a,
                    Err(e) => return err(e),
                };
                match laundry::release(self.db.clone(), appliance, &member.id).await {
                    Ok(slot) => self.format_slot(&slot).await,
                    Err(e) => err(e),
                }
            }

            // PARKING
            "/parking_list" => match parking::list(self.db.clone()).await {
                Ok(spots) => {
                    let mut lines = Vec::with_capacity(spots.len());
                    for spot in &spots {
                        if spot.occupied {
                            let who = self.role_label(spot.occupant_id.as_deref()).await;
                            let vehicle = spot
                                .vehicle_info
                                .as_deref()
                                .map(|v| format!(" ({})", v))
                                .unwrap_or_default();
                            lines.push(format!("Spot {}: {}{}", spot.spot_number, who, vehicle));
                        } else {
                            lines.push(format!("Spot {}: free", spot.spot_number));
                        }
                    }
                    format!("OK: Parking:\n{}", lines.join("\n"))
                }
                Err(e) => err(e),
            },
            "/parking_claim" if args.len() >= 2 => {
                let member = match self.require_member(args[0]).await {
                    Ok(m) => m,
                    Err(msg) => return msg,
                };
                let spot_number = match args[1].parse::<i64>() {
                    Ok(n) => n,
                    Err(_) => return "ERR: invalid input: spot number must be a number".to_string(),
                };
                let vehicle = if args.len() > 2 { Some(args[2..].join(" ")) } else { None };
                match parking::claim(self.db.clone(), spot_number, &member.id, vehicle.as_deref()).await {
                    Ok(spot) => format!("OK: Spot {} claimed", spot.spot_number),
                    Err(e) => err(e),
                }
            }
            "/parking_release" if args.len() == 2 => {
                let member = match self.require_member(args[0]).await {
                    Ok(m) => m,
                    Err(msg) => return msg,
                };
                let spot_number = match args[1].parse::<i64>() {
                    Ok(n) => n,
                    Err(_) => return "ERR: invalid input: spot number must be a number".to_string(),
                };
                match parking::release(self.db.clone(), spot_number, &member.id).await {
                    Ok(spot) => format!("OK: Spot {} released", spot.spot_number),
                    Err(e) => err(e),
                }
            }

            // EXPENSES
            "/expense_add" if args.len() >= 4 => {
                let member = match self.require_member(args[0]).await {
                    Ok(m) => m,
                    Err(msg) => return msg,
                };
                let amount = match args[1].parse::<f64>() {
                    Ok(a) => a,
                    Err(_) => return "ERR: invalid input: amount must be a number".to_string(),
                };
                let category = args[2];
                let description = args[3..].join(" ");
                match expenses::submit(self.db.clone(), &member.id, &description, amount, category, None).await {
                    Ok(expense) => format!("OK: Expense recorded: {}", expense.id),
                    Err(e) => err(e),
                }
            }
            "/expense_list" => match expenses::list(self.db.clone()).await {
                Ok(list) if list.is_empty() => "OK: No expenses".to_string(),
                Ok(list) => {
                    let mut lines = Vec::with_capacity(list.len());
                    for expense in &list {
                        lines.push(self.format_expense(expense).await);
                    }
                    format!("OK: Expenses:\n{}", lines.join("\n"))
                }
                Err(e) => err(e),
            },
            "/expense_approve" if args.len() == 2 => {
                let member = match self.require_member(args[0]).await {
                    Ok(m) => m,
                    Err(msg) => return msg,
                };
                match expenses::approve(self.db.clone(), args[1], &member.id).await {
                    Ok(expense) => format!("OK: Vote recorded, expense is {}", expense.status.as_str()),
                    Err(e) => err(e),
                }
            }
            "/expense_reject" if args.len() == 2 => {
                let member = match self.require_member(args[0]).await {
                    Ok(m) => m,
                    Err(msg) => return msg,
                };
                match expenses::reject(self.db.clone(), args[1], &member.id).await {
                    Ok(expense) => format!("OK: Vote recorded, expense is {}", expense.status.as_str()),
                    Err(e) => err(e),
                }
            }
            "/balances" => match expenses::balances(self.db.clone()).await {
                Ok(balances) if balances.is_empty() => "OK: No members bound yet".to_string(),
                Ok(balances) => {
                    let lines: Vec<String> = balances
                        .iter()
                        .map(|b| {
                            format!(
                                "{}: paid {:.2}, share {:.2}, balance {:+.2}",
                                b.role_name, b.paid, b.share, b.balance
                            )
                        })
                        .collect();
                    format!("OK: Balances:\n{}", lines.join("\n"))
                }
                Err(e) => err(e),
            },

            // CHAT
            "/chat_send" if args.len() >= 2 => {
                let member = match self.require_member(args[0]).await {
                    Ok(m) => m,
                    Err(msg) => return msg,
                };
                let text = args[1..].join(" ");
                match chat::post(self.db.clone(), &self.feed, &self.config, &member.id, Some(&text), None).await {
                    Ok(message) => format!("OK: Sent {}", message.id),
                    Err(e) => err(e),
                }
            }
            "/chat_history" => match chat::history(self.db.clone()).await {
                Ok(messages) if messages.is_empty() => "OK: No messages".to_string(),
                Ok(messages) => {
                    let mut lines = Vec::with_capacity(messages.len());
                    for message in &messages {
                        let author = self.role_label(Some(&message.author_id)).await;
                        let body = match (&message.text, &message.image_ref) {
                            (Some(text), _) => text.clone(),
                            (None, Some(image)) => format!("[image: {}]", image),
                            (None, None) => String::new(),
                        };
                        let edited = if message.edited { " (edited)" } else { "" };
                        lines.push(format!("[{}] {}: {}{}", message.created_at, author, body, edited));
                    }
                    format!("OK: Messages:\n{}", lines.join("\n"))
                }
                Err(e) => err(e),
            },
            "/chat_edit" if args.len() >= 3 => {
                let member = match self.require_member(args[0]).await {
                    Ok(m) => m,
                    Err(msg) => return msg,
                };
                let text = args[2..].join(" ");
                match chat::edit(self.db.clone(), &self.feed, &self.config, args[1], &member.id, &text).await {
                    Ok(_) => "OK: Message edited".to_string(),
                    Err(e) => err(e),
                }
            }
            "/chat_delete" if args.len() == 2 => {
                let member = match self.require_member(args[0]).await {
                    Ok(m) => m,
                    Err(msg) => return msg,
                };
                match chat::delete(self.db.clone(), &self.feed, args[1], &member.id).await {
                    Ok(_) => "OK: Message deleted".to_string(),
                    Err(e) => err(e),
                }
            }

            "/help" => help(),
            "/quit" => "OK: Bye".to_string(),
            _ => "ERR: Unknown command or wrong arguments. Try /help".to_string(),
        }
    }

    async fn require_member(&self, external_id: &str) -> Result<Member, String> {
        match identity::require_member(self.db.clone(), external_id).await {
            Ok(member) => Ok(member),
            Err(HouseError::UnknownMember) => Err(self.unresolved_hint().await),
            Err(e) => Err(err(e)),
        }
    }

    // Unresolved identities get told which roles are still open
    async fn unresolved_hint(&self) -> String {
        match identity::available_roles(self.db.clone()).await {
            Ok(open) if open.is_empty() => format!("ERR: {}", HouseError::NoRolesAvailable),
            Ok(open) => format!(
                "ERR: {}. Available roles: {}",
                HouseError::UnknownMember,
                open.join(", ")
            ),
            Err(e) => err(e),
        }
    }

    async fn role_label(&self, member_id: Option<&str>) -> String {
        match member_id {
            Some(id) => match identity::member_by_id(self.db.clone(), id).await {
                Ok(Some(member)) => member.role_name,
                _ => id.to_string(),
            },
            None => "nobody".to_string(),
        }
    }

    async fn format_slot(&self, slot: &ResourceSlot) -> String {
        if !slot.active {
            return format!("OK: {} free", slot.appliance);
        }
        let who = self.role_label(slot.occupant_id.as_deref()).await;
        let end = slot.end_time.unwrap_or(0);
        let remaining = (end - chrono::Utc::now().timestamp()).max(0);
        format!(
            "OK: {} in use by {} until {} ({} min left)",
            slot.appliance,
            who,
            end,
            // Count a started minute as a whole one
            (remaining + 59) / 60
        )
    }

    async fn format_expense(&self, expense: &Expense) -> String {
        let payer = self.role_label(Some(&expense.payer_id)).await;
        let votes = match expense.status {
            ExpenseStatus::Pending => format!(
                " ({}/{} approvals, {}/{} rejections)",
                expense.approvals.len(),
                expenses::APPROVAL_QUORUM,
                expense.rejections.len(),
                expenses::REJECTION_THRESHOLD
            ),
            _ => String::new(),
        };
        format!(
            "{} | [{}] {:.2} {} \"{}\" by {}{}",
            expense.id,
            expense.status.as_str(),
            expense.amount,
            expense.category,
            expense.description,
            payer,
            votes
        )
    }
}

fn err(e: HouseError) -> String {
    format!("ERR: {}", e)
}

fn help() -> String {
    "Available commands:\n\
    /whoami <external_id>\n\
    /roles\n\
    /bind <external_id> <role> <answer>\n\
    /slot_status <washer|dryer>\n\
    /slot_claim <external_id> <washer|dryer> <minutes>\n\
    /slot_release <external_id> <washer|dryer>\n\
    /parking_list\n\
    /parking_claim <external_id> <spot> [vehicle info]\n\
    /parking_release <external_id> <spot>\n\
    /expense_add <external_id> <amount> <category> <description>\n\
    /expense_list\n\
    /expense_approve <external_id> <expense_id>\n\
    /expense_reject <external_id> <expense_id>\n\
    /balances\n\
    /chat_send <external_id> <text>\n\
    /chat_history\n\
    /chat_edit <external_id> <message_id> <text>\n\
    /chat_delete <external_id> <message_id>\n\
    /help\n\
    /quit\n"
        .to_string()
}

async fn handle_client(
    db: Arc<Database>,
    config: ServerConfig,
    feed: Arc<ChatFeed>,
    stream: TcpStream,
    peer: std::net::SocketAddr,
) -> anyhow::Result<()> {
    let (reader, writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut writer = BufWriter::new(writer);
    let mut line = String::new();

    loop {
        line.clear();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            info!("[SERVER] Client disconnected: {}", peer);
            break;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let mut parts = trimmed.split_whitespace();
        let cmd = parts.next().unwrap_or("");
        let args: Vec<&str> = parts.collect();
        debug!("[CONN] [{}] Cmd='{}' Args={:?}", peer, cmd, args);

        let server = Server {
            db: db.clone(),
            config: config.clone(),
            feed: feed.clone(),
        };
        let response = server.handle_command(cmd, &args).await;

        writer.write_all(response.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;

        if cmd == "/quit" {
            info!("[SERVER] Client quit: {}", peer);
            break;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup() -> Server {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let db = Database { pool };
        db.migrate().await.unwrap();
        Server {
            db: Arc::new(db),
            config: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
                database_url: "sqlite::memory:".to_string(),
                max_clients: 4,
                log_level: "info".to_string(),
                max_message_length: 2048,
                feed_channel_capacity: 16,
            },
            feed: Arc::new(ChatFeed::new(16)),
        }
    }

    #[tokio::test]
    async fn unknown_identity_gets_the_open_roles() {
        let server = setup().await;
        let response = server.handle_command("/whoami", &["ext-1"]).await;
        assert!(response.starts_with("ERR:"), "{}", response);
        assert!(response.contains("Ram") && response.contains("Kaushik"), "{}", response);
    }

    #[tokio::test]
    async fn bind_and_claim_flow_over_the_protocol() {
        let server = setup().await;

        let response = server.handle_command("/bind", &["ext-1", "Ram", "67"]).await;
        assert_eq!(response, "OK: Bound to Ram");

        let response = server.handle_command("/whoami", &["ext-1"]).await;
        assert_eq!(response, "OK: You are Ram");

        let response = server.handle_command("/slot_status", &["washer"]).await;
        assert_eq!(response, "OK: washer free");

        let response = server.handle_command("/slot_claim", &["ext-1", "washer", "30"]).await;
        assert!(response.contains("in use by Ram"), "{}", response);

        let response = server.handle_command("/slot_release", &["ext-1", "washer"]).await;
        assert_eq!(response, "OK: washer free");
    }

    #[tokio::test]
    async fn engine_errors_are_rendered_as_err_lines() {
        let server = setup().await;
        server.handle_command("/bind", &["ext-1", "Ram", "67"]).await;
        server.handle_command("/bind", &["ext-2", "Munna", "panipuri"]).await;

        server.handle_command("/parking_claim", &["ext-1", "2"]).await;
        let response = server.handle_command("/parking_claim", &["ext-2", "2", "red", "Vespa"]).await;
        assert_eq!(response, "ERR: parking spot is already taken");

        let response = server.handle_command("/nonsense", &[]).await;
        assert!(response.starts_with("ERR:"));
    }

    #[tokio::test]
    async fn chat_round_trip_over_the_protocol() {
        let server = setup().await;
        server.handle_command("/bind", &["ext-1", "Suriya", "tea"]).await;

        let response = server.handle_command("/chat_send", &["ext-1", "hello", "house"]).await;
        assert!(response.starts_with("OK: Sent "), "{}", response);

        let response = server.handle_command("/chat_history", &[]).await;
        assert!(response.contains("Suriya: hello house"), "{}", response);
    }
}
