pub mod notifier;
pub mod payload;
pub mod sink;

pub use notifier::Notifier;
pub use payload::{build_payload, AlertPayload, Excerpt};
pub use sink::{AlertSink, LogSink, NotifyError, WebhookSink};
