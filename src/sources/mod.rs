//! Data sources
//!
//! One module per source, each a self-contained pipeline: build a search
//! URL from the CLI criteria, fetch, run the extraction table over each
//! detail page, and add entries to a [`crate::TellicoDoc`]. Zero results
//! still prints a valid (empty) collection.

pub mod allocine;
pub mod bedetheque;
pub mod dark_horse;
pub mod griffith;
pub mod ministerio;
