//! Output files: statement CSV reports and quarantined raw messages.

pub mod csv;
pub mod quarantine;
pub mod statement;
