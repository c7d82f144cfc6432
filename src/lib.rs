#![forbid(unsafe_code)]

//! Grok sidecar: a line-delimited JSON bridge between a host process and
//! the xAI Grok API, with streaming chat and a tool-call rendezvous.

pub mod backend;
pub mod chat;
pub mod config;
pub mod engine;
pub mod errors;
pub mod protocol;
pub mod service;

pub use config::SidecarConfig;
pub use errors::{AppError, Result};
