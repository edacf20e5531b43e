#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::unused_async)]

//! # Coordinator Server
//!
//! HTTP, MCP, and WebSocket front-end for the hybrid AI coordination plane.
//!
//! The server wires the core substrate together behind an explicit service
//! container ([`state::AppState`]): query routing with semantic-cache probes
//! and model-loading awareness, multi-turn sessions, feedback and learning
//! control, the Ralph task surface, progressive capability discovery, and a
//! Prometheus metrics endpoint.

pub mod actions;
pub mod http;
pub mod mcp;
pub mod state;
pub mod ws;

pub use http::router;
pub use state::AppState;
