pub mod conversation_service;
pub mod identity;
pub mod message_service;
pub mod notifier;
pub mod work_queue;

pub use conversation_service::ConversationService;
pub use identity::{Identity, IdentityProvider, JwtIdentityProvider};
pub use message_service::{MessageDraft, MessageService};
pub use notifier::{LogNotificationSink, NewMessageNotification, OfflineNotifier};
pub use work_queue::{EnqueueError, JobHandler, WorkQueue, WorkerPool};
