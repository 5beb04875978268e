//! Duet presence and relay server library.
//! This crate exposes internal modules for integration testing.
//! The binary entry point is in main.rs.

pub mod auth;
pub mod calls;
pub mod config;
pub mod db;
pub mod error;
pub mod messages;
pub mod routes;
pub mod state;
pub mod users;
pub mod ws;
