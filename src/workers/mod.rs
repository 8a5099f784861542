pub mod outbox_publisher;
pub mod overdue_monitor;

pub use outbox_publisher::{OutboxPublisher, OutboxPublisherConfig};
pub use overdue_monitor::{OverdueMonitorConfig, OverdueMonitorWorker};
