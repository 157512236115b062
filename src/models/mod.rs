// Data models for the auth API wire format

pub mod auth;
