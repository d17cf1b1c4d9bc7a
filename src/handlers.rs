// src/handlers.rs

pub mod auth;
pub mod chat;
pub mod documents;
pub mod inventory;
pub mod logistics;
pub mod orders;
pub mod sales;
pub mod stream;
pub mod tenancy;
