//! Campus portal real-time hub library.
//! This crate exposes internal modules for integration testing.
//! The binary entry point is in main.rs.

pub mod chat;
pub mod config;
pub mod db;
pub mod error;
pub mod hub;
pub mod poll;
pub mod routes;
pub mod signaling;
pub mod state;
pub mod ws;
