//! # Subscribe: the hook for runtime events.
//!
//! A subscriber sees every [`Event`] emitted by supervisors, worker sessions
//! and the coordinator, delivered from its own queue inside the
//! [`SubscriberSet`](crate::SubscriberSet). A slow or panicking subscriber
//! never stalls an execution or a dispatch round; it only loses its own events
//! when its queue is full.

use async_trait::async_trait;

use crate::events::Event;

/// Receives runtime events.
///
/// `on_event` runs on the subscriber's dedicated task, one event at a time.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Handles one event.
    async fn on_event(&self, event: &Event);

    /// Name used in overflow/panic reports.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Bound of this subscriber's queue.
    fn queue_capacity(&self) -> usize {
        1024
    }
}
