pub mod auth;
pub mod health;
pub mod security;
pub mod types;
