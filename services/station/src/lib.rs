//! Detector station service
//!
//! Wires a configured conversion pipeline to a record source, attaches the
//! diagnostic event builder and log consumer, and exposes the pieces the
//! `station` binary assembles.

pub mod builder;
pub mod config;
pub mod synthetic;
