//! Protocol translation (§4.4): Anthropic Messages <-> OpenAI Chat
//! Completions <-> the Kiro-native wire format the upstream actually speaks.
//! Each direction is its own submodule; this file only re-exports the public
//! entry points callers (the service's route handlers) need.

pub mod anthropic_openai;
pub mod kiro;

pub use anthropic_openai::{
    convert_anthropic_to_openai, convert_openai_to_anthropic, openai_request_to_canonical,
    OpenAiChatRequest, OpenAiChatResponse,
};
pub use kiro::{convert_anthropic_to_kiro, convert_kiro_response_to_anthropic, KiroRequest, KiroResponse};
