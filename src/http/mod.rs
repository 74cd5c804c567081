//! HTTP front-end.

pub mod server;

pub use server::{AppState, HttpServer};
