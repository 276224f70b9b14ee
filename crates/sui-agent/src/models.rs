//! These models represent the objects passed around by the agent
//!
//! There are several related formats we need to interact with:
//! - chat requests and streamed chunks, exchanged with callers of the service
//! - openai-compatible messages/tools, sent from the agent to the LLM
//! - MCP tool listings and results, exchanged with the tool subprocess
//! - session turns, kept in the in-memory transcript
//!
//! We always immediately convert those data models into the internal structs
//! using to/from helpers, so the internal models are not an exact match to any
//! of these formats.
pub mod content;
pub mod message;
pub mod role;
pub mod tool;
