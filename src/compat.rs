//! Thin translators between [`Provider`](crate::provider::Provider) and
//! common client conventions. They only call public provider operations and
//! reshape inputs and outputs.

pub mod byte_stream;
pub mod openai;

pub use byte_stream::{TokenByteStream, into_byte_stream};
pub use openai::{
    ChatChoice, ChatCompletionRequest, ChatCompletionResponse, ChoiceMessage, UsageReport,
    chat_completion,
};
