//! Provenance vault server library.
//! This crate exposes internal modules for integration testing.
//! The binary entry point is in main.rs.

pub mod config;
pub mod db;
pub mod keys;
pub mod routes;
pub mod state;
pub mod storage;
pub mod vault;
