//! Infrastructure layer for chunkflow.
//!
//! Contains implementations of the storage port defined in `chunkflow-core`
//! (SQLite session store), the `config.toml` loader and data-directory
//! resolution.

pub mod config;
pub mod data_dir;
pub mod sqlite;
