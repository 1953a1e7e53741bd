pub mod conversation;
pub mod message;

pub use conversation::{Conversation, ConversationSummary, ConversationType, UserSummary};
pub use message::{
    Message, MessagePage, MessageType, NewMessage, Reaction, ReadReceipt, ReplyPreview,
};
