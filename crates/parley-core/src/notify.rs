use tracing::debug;
use uuid::Uuid;

use parley_types::models::MessageView;

/// Boundary to the external push-notification service. Invoked only for
/// members with no live session; delivery to connected sessions goes
/// through the gateway instead.
pub trait Notifier: Send + Sync {
    fn message_created(&self, user_id: Uuid, message: &MessageView);

    /// Mention-specific routing; defaults to the plain notification.
    fn mentioned(&self, user_id: Uuid, message: &MessageView) {
        self.message_created(user_id, message);
    }
}

/// Stand-in dispatcher that only logs. The real service is wired in at
/// deployment time.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn message_created(&self, user_id: Uuid, message: &MessageView) {
        debug!(
            "push: user {} message {} in {}",
            user_id, message.id, message.conversation_id
        );
    }

    fn mentioned(&self, user_id: Uuid, message: &MessageView) {
        debug!(
            "push: user {} mentioned by message {} in {}",
            user_id, message.id, message.conversation_id
        );
    }
}
