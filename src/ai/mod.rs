//! Remote completion providers
//!
//! A single OpenAI-compatible chat-completions client covers both supported
//! providers (OpenAI and Groq); callers depend on the `CompletionClient` trait.

mod client;

pub use client::{ChatCompletionClient, CompletionClient, CompletionOutcome};
