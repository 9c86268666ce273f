//! Storefront backend library.
//! This crate exposes internal modules for integration testing.
//! The binary entry point is in main.rs.

pub mod admin;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod health;
pub mod presence;
pub mod products;
pub mod routes;
pub mod state;
pub mod ws;
