//! Sifra is a streaming chat client and relay for the Gemini
//! generative-language API.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core`] owns the chat session state machine, the model gateway
//!   abstraction with its Gemini and relay implementations, streaming
//!   orchestration, and configuration.
//! - [`server`] exposes a gateway over HTTP as a plain-text streaming
//!   endpoint.
//! - [`api`] defines the wire payloads exchanged with Gemini and with the
//!   relay endpoint.
//! - [`utils`] holds URL helpers and logging setup.
//!
//! Runtime entrypoints live in the binary crate (`src/main.rs`) and route
//! through [`crate::cli::main`], which dispatches to the `serve`, `say`, and
//! `chat` commands.

pub mod api;
pub mod cli;
pub mod core;
pub mod server;
pub mod utils;
