//! Authentication and session core shared by the `shopcli` front-end.

pub mod auth;
pub mod config;
