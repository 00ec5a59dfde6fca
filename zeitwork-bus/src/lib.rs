//! Pub/sub transport for CDC-derived events (spec §4.5, §6).
//!
//! At-least-once delivery; every subscriber must re-read the row it was
//! notified about rather than trusting the event payload (spec §9). Queue
//! groups (`builder-workers`, `reconciler`) give exactly-once-per-group
//! delivery so a fleet of workers load-balances instead of each handling
//! every event.

use async_trait::async_trait;
use futures::StreamExt;
use zeitwork_common::{Error, ErrorKind, Result};
use zeitwork_proto::RowChangeEvent;

/// Queue group used by the builder pool (spec §6).
pub const QUEUE_GROUP_BUILDERS: &str = "builder-workers";
/// Queue group used by reconciler replicas (spec §6).
pub const QUEUE_GROUP_RECONCILER: &str = "reconciler";

#[async_trait]
pub trait Bus: Send + Sync {
    async fn publish(&self, event: &RowChangeEvent) -> Result<()>;

    /// Subscribes to `subject` (may contain NATS wildcards, e.g.
    /// `deployments.*`) within `queue_group`, returning a handle whose
    /// `recv` yields decoded events.
    async fn subscribe(&self, subject: &str, queue_group: &str) -> Result<Box<dyn Subscription>>;
}

#[async_trait]
pub trait Subscription: Send {
    async fn recv(&mut self) -> Option<RowChangeEvent>;
}

/// NATS-backed [`Bus`], the implementation used in every deployed
/// environment (spec §6: `NATS_URLS`).
pub struct NatsBus {
    client: async_nats::Client,
}

impl NatsBus {
    pub async fn connect(urls: &str) -> Result<Self> {
        let client = async_nats::connect(urls)
            .await
            .map_err(|e| Error::source(ErrorKind::External, e))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Bus for NatsBus {
    async fn publish(&self, event: &RowChangeEvent) -> Result<()> {
        self.client
            .publish(event.subject(), event.encode_to_vec().into())
            .await
            .map_err(|e| Error::source(ErrorKind::External, e))?;
        self.client
            .flush()
            .await
            .map_err(|e| Error::source(ErrorKind::External, e))?;
        Ok(())
    }

    async fn subscribe(&self, subject: &str, queue_group: &str) -> Result<Box<dyn Subscription>> {
        let subscriber = self
            .client
            .queue_subscribe(subject.to_string(), queue_group.to_string())
            .await
            .map_err(|e| Error::source(ErrorKind::External, e))?;
        Ok(Box::new(NatsSubscription { subscriber }))
    }
}

struct NatsSubscription {
    subscriber: async_nats::Subscriber,
}

#[async_trait]
impl Subscription for NatsSubscription {
    async fn recv(&mut self) -> Option<RowChangeEvent> {
        loop {
            let message = self.subscriber.next().await?;
            match RowChangeEvent::decode_from_slice(&message.payload) {
                Ok(event) => return Some(event),
                Err(err) => {
                    tracing::warn!(%err, "dropping undecodable bus message");
                    continue;
                }
            }
        }
    }
}

/// In-memory [`Bus`] used by component unit tests so reconciler/CDC logic
/// can be exercised without a NATS broker (mirrors the teacher's
/// channel-based `Worker` tests in `gateway::worker::tests`).
#[cfg(feature = "test-util")]
pub mod test_util {
    use super::*;
    use tokio::sync::broadcast;

    pub struct InMemoryBus {
        sender: broadcast::Sender<RowChangeEvent>,
    }

    impl InMemoryBus {
        pub fn new() -> Self {
            let (sender, _) = broadcast::channel(256);
            Self { sender }
        }
    }

    impl Default for InMemoryBus {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl Bus for InMemoryBus {
        async fn publish(&self, event: &RowChangeEvent) -> Result<()> {
            let _ = self.sender.send(event.clone());
            Ok(())
        }

        async fn subscribe(
            &self,
            subject: &str,
            _queue_group: &str,
        ) -> Result<Box<dyn Subscription>> {
            Ok(Box::new(InMemorySubscription {
                subject: subject.to_string(),
                receiver: self.sender.subscribe(),
            }))
        }
    }

    struct InMemorySubscription {
        subject: String,
        receiver: broadcast::Receiver<RowChangeEvent>,
    }

    #[async_trait]
    impl Subscription for InMemorySubscription {
        async fn recv(&mut self) -> Option<RowChangeEvent> {
            loop {
                match self.receiver.recv().await {
                    Ok(event) if subject_matches(&self.subject, &event.subject()) => {
                        return Some(event)
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        }
    }

    fn subject_matches(pattern: &str, subject: &str) -> bool {
        if let Some(prefix) = pattern.strip_suffix(".*") {
            subject.starts_with(prefix) && subject[prefix.len()..].starts_with('.')
        } else {
            pattern == subject
        }
    }
}
