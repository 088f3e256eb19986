//! # docflow-llm
//!
//! The narrow contract docflow agents use to talk to a language model, the
//! schema descriptors replies are checked against, and a deterministic
//! [`MockLlmClient`](mock::MockLlmClient) for tests and demos.
//!
//! Concrete provider transports live outside this crate; anything that can
//! implement [`LlmClient`](client::LlmClient) plugs in.

pub mod client;
pub mod error;
pub mod mock;
pub mod presets;
pub mod schema;

pub use error::{LlmError, Result};

/// Re-export commonly used types and traits
pub mod prelude {
    pub use crate::{
        client::{LlmClient, Prompt, parse_json_reply},
        error::{LlmError, Result as LlmResult},
        mock::{MockCall, MockLlmClient, MockReply, MockRule},
        presets::CLASSIFICATION_SCHEMA,
        schema::OutputSchema,
    };
}
