//! Domain model module declarations.

pub mod chat_id;
pub mod conversation;
pub mod message;
pub mod session;
pub mod task;
pub mod tool_request;

pub use chat_id::ChatId;
pub use conversation::Conversation;
pub use message::{ChatMetadata, Message};
pub use session::Session;
pub use task::Task;
pub use tool_request::{Operation, ToolRequest, ToolResponse};
