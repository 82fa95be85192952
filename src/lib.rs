//! Credential issuance and verification: user registration with optional
//! identity-document photos, and password login.

pub mod app;
pub mod attachments;
pub mod auth;
pub mod config;
pub mod db;
pub mod state;
pub mod storage;
