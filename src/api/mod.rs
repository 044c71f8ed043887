pub mod chat;
pub(crate) mod common;
pub(crate) mod engine;
pub mod health;
pub mod models;
