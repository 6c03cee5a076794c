pub mod chat;
pub mod config;
pub mod connection;
pub mod database;
pub mod expenses;
pub mod feed;
pub mod identity;
pub mod laundry;
pub mod parking;
