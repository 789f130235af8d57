//! Translation between the OpenAI chat format and the Kimi web-chat format.
//!
//! [`prepare`] collapses an OpenAI conversation into the single prompt the
//! upstream accepts; [`kimi_to_openai`] turns the upstream event stream back
//! into an OpenAI response, buffered or chunk by chunk. Neither does I/O
//! beyond consuming the byte stream it is handed.

pub mod kimi_to_openai;
pub mod prepare;

pub use kimi_to_openai::{create_trans_stream, receive_stream};
pub use prepare::{prepare_messages, wrap_urls};
