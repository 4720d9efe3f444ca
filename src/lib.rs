pub mod config;
pub mod db;
pub mod error;
pub mod imap;
pub mod models;
pub mod routes;
pub mod services;
pub mod smtp;
pub mod telemetry;

pub use error::{Error, Result};
