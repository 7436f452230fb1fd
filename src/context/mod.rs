// src/context/mod.rs
// Context-window management: token accounting, compression, and the
// conversation / task-history stores

pub mod compression;
pub mod conversation;
pub mod task_history;
pub mod token_counter;

pub use compression::{
    CompressionLevel, CompressionStats, ContextCompressor, ContextError,
    DUPLICATE_FILE_READ_NOTICE,
};
pub use conversation::{
    epoch_seconds, ConversationHistoryManager, ConversationMessage, ConversationStats,
    ToolCallRecord,
};
pub use task_history::{HistoryItem, TaskHistoryManager, TaskSort};
pub use token_counter::{CompressionInfo, TokenCounter, TokenUsage};
