pub mod openai;
pub mod provider;
pub mod types;

pub use self::openai::OpenAiChatProvider;
pub use self::provider::ChatProvider;
pub use self::types::{ChatMessage, ChatRequest};
