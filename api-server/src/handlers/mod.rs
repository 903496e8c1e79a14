//! HTTP handlers

pub mod admin;
pub mod health;
pub mod image;
pub mod registry;
pub mod tabular;
