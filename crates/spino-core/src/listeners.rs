//! Per-service change listeners.
//!
//! Listeners are invoked synchronously on the thread that committed the
//! change, after the routing table has released its own lock. A listener
//! that fails or panics is logged and skipped; delivery to the others
//! continues and nothing is retried.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// Receives the name of a service whose enabled addresses changed.
///
/// The listener is expected to re-read the addresses it cares about; the
/// notification itself carries no address data.
pub trait ServiceListener: Send + Sync {
    fn on_service_change(&self, service: &str) -> anyhow::Result<()>;
}

impl<F> ServiceListener for F
where
    F: Fn(&str) -> anyhow::Result<()> + Send + Sync,
{
    fn on_service_change(&self, service: &str) -> anyhow::Result<()> {
        self(service)
    }
}

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// A change delivered through a channel subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceChange {
    pub service: String,
}

/// Result of one notification round.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NotifyStats {
    pub delivered: usize,
    pub failed: usize,
}

type Subscribers = Vec<(ListenerId, Arc<dyn ServiceListener>)>;

/// Service name → subscribers.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: RwLock<HashMap<String, Subscribers>>,
    next_id: AtomicU64,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, service: &str, listener: Arc<dyn ServiceListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .entry(service.to_string())
            .or_default()
            .push((id, listener));
        debug!(service, ?id, "listener subscribed");
        id
    }

    /// Forward changes of `service` into a bounded channel.
    ///
    /// When the channel is full the change is dropped with a warning; the
    /// receiver will still see the next one. Once the receiver is dropped
    /// every delivery counts as a failed notification until unsubscribed.
    pub fn subscribe_channel(
        &self,
        service: &str,
        capacity: usize,
    ) -> (ListenerId, mpsc::Receiver<ServiceChange>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let id = self.subscribe(service, Arc::new(ChannelListener { tx }));
        (id, rx)
    }

    /// Returns whether the listener was registered.
    pub fn unsubscribe(&self, service: &str, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let Some(subscribers) = listeners.get_mut(service) else {
            return false;
        };

        let before = subscribers.len();
        subscribers.retain(|(existing, _)| *existing != id);
        let removed = subscribers.len() != before;
        if subscribers.is_empty() {
            listeners.remove(service);
        }
        if removed {
            debug!(service, ?id, "listener unsubscribed");
        }
        removed
    }

    pub fn subscriber_count(&self, service: &str) -> usize {
        self.listeners.read().get(service).map_or(0, Vec::len)
    }

    /// Invoke every listener of every named service once.
    ///
    /// The subscriber lists are copied out before invoking, so listeners may
    /// subscribe or unsubscribe from inside a callback.
    pub fn notify<'a, I>(&self, services: I) -> NotifyStats
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut stats = NotifyStats::default();

        for service in services {
            let subscribers: Subscribers = match self.listeners.read().get(service) {
                Some(subscribers) => subscribers.clone(),
                None => continue,
            };

            for (id, listener) in subscribers {
                let outcome =
                    panic::catch_unwind(AssertUnwindSafe(|| listener.on_service_change(service)));
                match outcome {
                    Ok(Ok(())) => stats.delivered += 1,
                    Ok(Err(e)) => {
                        stats.failed += 1;
                        error!(service, ?id, error = %e, "service listener failed");
                    }
                    Err(payload) => {
                        stats.failed += 1;
                        error!(
                            service,
                            ?id,
                            panic = panic_message(payload.as_ref()),
                            "service listener panicked"
                        );
                    }
                }
            }
        }

        stats
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let listeners = self.listeners.read();
        f.debug_struct("ListenerRegistry")
            .field("services", &listeners.len())
            .field(
                "subscribers",
                &listeners.values().map(Vec::len).sum::<usize>(),
            )
            .finish()
    }
}

struct ChannelListener {
    tx: mpsc::Sender<ServiceChange>,
}

impl ServiceListener for ChannelListener {
    fn on_service_change(&self, service: &str) -> anyhow::Result<()> {
        let change = ServiceChange {
            service: service.to_string(),
        };
        match self.tx.try_send(change) {
            Ok(()) => Ok(()),
            // Every queued change names this service, so a full queue
            // already holds one the receiver has not seen.
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(service, "change channel full, dropping notification");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                anyhow::bail!("change channel receiver dropped")
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, Arc<dyn ServiceListener>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let listener: Arc<dyn ServiceListener> = Arc::new(move |service: &str| -> anyhow::Result<()> {
            sink.lock().unwrap().push(service.to_string());
            Ok(())
        });
        (seen, listener)
    }

    #[test]
    fn notifies_only_subscribed_services() {
        let registry = ListenerRegistry::new();
        let (api_seen, api) = recorder();
        let (web_seen, web) = recorder();
        registry.subscribe("api", api);
        registry.subscribe("web", web);

        let stats = registry.notify(["api"]);

        assert_eq!(stats.delivered, 1);
        assert_eq!(*api_seen.lock().unwrap(), vec!["api"]);
        assert!(web_seen.lock().unwrap().is_empty());
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let registry = ListenerRegistry::new();
        let (seen, listener) = recorder();
        let id = registry.subscribe("api", listener);

        assert!(registry.unsubscribe("api", id));
        assert!(!registry.unsubscribe("api", id));
        assert_eq!(registry.subscriber_count("api"), 0);

        registry.notify(["api"]);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn failing_listener_does_not_block_others() {
        let registry = ListenerRegistry::new();
        let (seen, good) = recorder();
        registry.subscribe(
            "api",
            Arc::new(|_: &str| -> anyhow::Result<()> { anyhow::bail!("boom") }),
        );
        registry.subscribe(
            "api",
            Arc::new(|_: &str| -> anyhow::Result<()> { panic!("listener panic") }),
        );
        registry.subscribe("api", good);

        let stats = registry.notify(["api"]);

        assert_eq!(stats, NotifyStats { delivered: 1, failed: 2 });
        assert_eq!(*seen.lock().unwrap(), vec!["api"]);
    }

    #[test]
    fn listener_can_unsubscribe_itself() {
        let registry = Arc::new(ListenerRegistry::new());
        let slot: Arc<Mutex<Option<ListenerId>>> = Arc::new(Mutex::new(None));

        let reg = registry.clone();
        let my_id = slot.clone();
        let id = registry.subscribe(
            "api",
            Arc::new(move |service: &str| -> anyhow::Result<()> {
                if let Some(id) = *my_id.lock().unwrap() {
                    reg.unsubscribe(service, id);
                }
                Ok(())
            }),
        );
        *slot.lock().unwrap() = Some(id);

        assert_eq!(registry.notify(["api"]).delivered, 1);
        assert_eq!(registry.notify(["api"]).delivered, 0);
    }

    #[test]
    fn channel_subscription_drops_when_full() {
        let registry = ListenerRegistry::new();
        let (_, mut rx) = registry.subscribe_channel("api", 1);

        registry.notify(["api"]);
        let stats = registry.notify(["api"]);
        assert_eq!(stats.failed, 0);

        assert_eq!(
            rx.try_recv().unwrap(),
            ServiceChange {
                service: "api".to_string()
            }
        );
        assert!(rx.try_recv().is_err());

        registry.notify(["api"]);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn closed_channel_counts_as_failure() {
        let registry = ListenerRegistry::new();
        let (id, rx) = registry.subscribe_channel("api", 4);
        drop(rx);

        assert_eq!(registry.notify(["api"]).failed, 1);
        assert!(registry.unsubscribe("api", id));
    }
}
