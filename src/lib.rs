//! # Agent Exchange
//!
//! An A2A-compatible agent server: autonomous agents exchange tasks and
//! messages over HTTP, with three delivery modes for results.
//!
//! This library provides:
//! - A task lifecycle engine (status state machine + per-task message log)
//! - Outbound webhook notifications on lifecycle events
//! - SSE streaming of incremental generation output
//! - Capability discovery via a static agent card
//!
//! ## Architecture
//!
//! A client creates a task (`submitted`), then posts a message, which drives
//! the task to `working` and invokes the generation backend. The backend
//! either returns one complete reply (polling/webhook path) or pushes a chunk
//! sequence to an SSE subscriber (streaming path). Either way the task
//! settles through the state machine (`completed`, `failed`, or `canceled`),
//! and every lifecycle event is offered to the webhook dispatcher.
//!
//! ## Example
//!
//! ```rust,ignore
//! use agent_exchange::{api, Config};
//!
//! let config = Config::from_env()?;
//! api::serve(config).await?;
//! ```

pub mod api;
pub mod backend;
pub mod card;
pub mod config;
pub mod error;
pub mod notify;
pub mod stream;
pub mod task;

pub use config::Config;
