//! Read-aloud narration for paged document text.
//!
//! A [`narration::NarrationController`] walks a [`document::Document`] unit by
//! unit, splits each unit into bounded chunks and hands them one at a time to
//! a [`backend::NarrationBackend`].

pub mod app;
pub mod backend;
pub mod cache;
pub mod cancellation;
pub mod chunker;
pub mod config;
pub mod cursor;
pub mod document;
pub mod error;
pub mod narration;

pub use error::NarrationError;
