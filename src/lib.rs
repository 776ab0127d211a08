//! # LLM Gateway
//!
//! A chat-completion gateway in front of upstream language-model
//! providers.
//!
//! ## Overview
//!
//! Every request flows through the same pipeline:
//! - **Admission control** - per-client-key rolling-window throttling
//! - **Idempotency** - cached replays for non-streamed requests
//! - **Provider dispatch** - model-prefix routing with retry and
//!   per-provider circuit breaking
//! - **Streaming** - SSE transcoding under a global deadline with a
//!   guaranteed terminal sentinel
//! - **Persistence & billing** - best-effort conversation history and
//!   fire-and-forget usage reporting after the response completes
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use llm_gateway::config::GatewayConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load configuration from the environment (needs OPENAI_API_KEY)
//! let config = GatewayConfig::from_env()?;
//! config.validate()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`config`] - Configuration loading and validation
//! - [`error`] - Error types and handling
//! - [`models`] - Canonical and OpenAI-compatible wire shapes
//! - [`gateway`] - The composed request pipeline
//! - [`stream`] - Chunk-to-SSE transcoding state machine
//! - [`resilience`] - Retry and circuit-breaker stages
//! - [`store`] - Conversation persistence

pub mod admission;
pub mod billing;
pub mod client;
pub mod config;
pub mod error;
pub mod gateway;
pub mod handler;
pub mod history;
pub mod idempotency;
pub mod models;
pub mod provider;
pub mod resilience;
pub mod store;
pub mod stream;
pub mod util;

pub use config::GatewayConfig;
pub use error::{GatewayError, Result};
pub use gateway::{Gateway, RequestContext};
