//! Message parsing: charset decoding, header handling, MIME normalization
//! and `.eml` files on disk.

pub mod charset;
pub mod eml;
pub mod header;
pub mod mime;
