// src/auth/mod.rs
// Identity & Session (C2).

pub mod jwt;
pub mod models;
pub mod service;
pub mod session;

pub use models::*;
pub use service::AuthService;
pub use session::{SESSION_COOKIE_NAME, session_cookie};
