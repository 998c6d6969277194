use async_trait::async_trait;
use serde_json::Value;

/// Long-lived listener registered on a routing key
///
/// Listeners stay in the registry until explicitly unregistered and are
/// invoked for every envelope on their key. A returned error is surfaced to
/// the caller of `dispatch` as a callback failure; it never removes the entry.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle one envelope, given its message name and payload
    async fn handle(&self, name: &str, payload: &Value) -> anyhow::Result<()>;

    /// Get handler name for identification in logs
    fn handler_name(&self) -> &str {
        "unnamed_handler"
    }
}
