//! Core data model: raw fetched messages, normalized records and addresses.

pub mod address;
pub mod email;
