mod client;

pub use client::ClaudeClient;
