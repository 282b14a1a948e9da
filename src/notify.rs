//! Emits `<collection>:changed` out-of-band notifications after mutations.

use async_trait::async_trait;
use tracing::debug;

/// A sink for out-of-band change events. Fire-and-forget from the orchestrator's perspective: a
/// notification failure never fails the request it followed.
#[async_trait]
pub trait ChangeNotifier: Send + Sync {
    /// Emit `event` to every interested listener.
    async fn emit(&self, event: &str);
}

/// Emit `<collection>:changed` via `notifier`, if `enabled`. Swallows nothing but its own
/// no-op-ness: the caller decides whether notifications are wired up at all, via
/// [`crate::config::CollectionSettings::notifications_enabled`].
pub async fn notify_changed(
    notifier: Option<&(dyn ChangeNotifier)>,
    collection_name: &str,
    enabled: bool,
) {
    if !enabled {
        return;
    }
    let Some(notifier) = notifier else {
        debug!(collection = collection_name, "no notifier configured, skipping emit");
        return;
    };
    let event = format!("{collection_name}:changed");
    debug!(event = %event, "emitting change notification");
    notifier.emit(&event).await;
}
