pub mod config;
pub mod consumer;
pub mod contracts;
pub mod db;
pub mod health;
pub mod models;
pub mod repos;
pub mod routes;
pub mod services;

pub use consumer::{start_command_consumers, start_reply_consumer};
