//! Langbase pipe client used by [`crate::analyzers::PipeAnalyzer`].

mod client;
mod types;

pub use client::LangbaseClient;
pub use types::{Message, MessageRole, PipeRequest, PipeResponse, RawResponse, Usage};
