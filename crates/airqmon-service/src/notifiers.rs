//! Notifier selection and the store-backed subscription registry.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use airqmon_core::{
    Error as CoreError, LogNotifier, Notifier, NtfyNotifier, PushSubscription, Subscriptions,
    WebhookNotifier,
};

use crate::config::{NotifyBackend, NotifyConfig};
use crate::state::SharedStore;

/// [`Subscriptions`] backed by the `push_subscriptions` table.
#[derive(Clone)]
pub struct StoreSubscriptions {
    store: SharedStore,
}

impl StoreSubscriptions {
    /// Wrap a shared store.
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }
}

fn registry_error(e: airqmon_store::Error) -> CoreError {
    CoreError::Subscriptions(e.to_string())
}

#[async_trait]
impl Subscriptions for StoreSubscriptions {
    async fn subscribe(&self, subscription: PushSubscription) -> airqmon_core::Result<()> {
        let store = self.store.lock().await;
        store.add_subscription(&subscription).map_err(registry_error)?;
        Ok(())
    }

    async fn unsubscribe(&self, endpoint: &str) -> airqmon_core::Result<bool> {
        let store = self.store.lock().await;
        store.remove_subscription(endpoint).map_err(registry_error)
    }

    async fn list(&self) -> airqmon_core::Result<Vec<PushSubscription>> {
        let store = self.store.lock().await;
        store.list_subscriptions().map_err(registry_error)
    }
}

/// Build the notifier selected by `config`.
///
/// # Errors
///
/// Fails if an HTTP client cannot be built.
pub fn build_notifier(
    config: &NotifyConfig,
    store: SharedStore,
) -> airqmon_core::Result<Arc<dyn Notifier>> {
    let notifier: Arc<dyn Notifier> = match config.backend {
        NotifyBackend::Log => Arc::new(LogNotifier),
        NotifyBackend::Ntfy => Arc::new(NtfyNotifier::new(&config.ntfy_server, config.timeout())?),
        NotifyBackend::Webhook => Arc::new(WebhookNotifier::new(
            StoreSubscriptions::new(store),
            config.timeout(),
        )?),
    };
    info!("Using {} notifier", notifier.name());
    Ok(notifier)
}
