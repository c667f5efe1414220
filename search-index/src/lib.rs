#![allow(clippy::missing_docs_in_private_items)]

pub mod adapter;
pub mod client;
pub mod documents;
pub mod settings;

pub use adapter::{MeiliIndex, SearchIndex, DOCUMENT_INDEX, PARAGRAPH_INDEX};
pub use client::MeiliClient;
pub use documents::{SearchDocument, SearchParagraph};
