//! Core building blocks shared by every stage: error types and the
//! presentation value model.

pub mod data;
pub mod error;
