#![forbid(unsafe_code)]

//! Account and session backend for NewTube.
//!
//! The `backend` binary wires these modules into an axum server; tests and
//! tools can build the same [`api::router`] against any database path.

pub mod account;
pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod gate;
pub mod like;
pub mod password;
pub mod session;
pub mod subscription;
pub mod token;
pub mod video;
