//! Discriminator-keyed handler dispatch (§4.4, §9 DESIGN NOTES "Handler
//! registry"), replacing the original's runtime lookup of a handler method
//! by class name with an explicit table of boxed closures.

// Layer 1: Standard library imports
use std::collections::HashMap;
use std::sync::Arc;

// Layer 2: Third-party crate imports
use futures::future::BoxFuture;
use thiserror::Error;
use tracing::debug;

// Layer 3: Internal module imports
use crate::broker::BrokerError;
use crate::message::{CodecError, Envelope, MessageType};

/// Errors a registered handler may raise while processing an envelope
/// (§7).
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The envelope body did not decode into the shape the handler
    /// expected.
    #[error(transparent)]
    WrongMessageFormat(#[from] CodecError),
    /// The handler failed to send a reply or otherwise use the broker.
    #[error(transparent)]
    Broker(#[from] BrokerError),
    /// A user-defined dispatch handler raised an application-level error.
    #[error("handler for '{message_type}' failed: {source}")]
    HandlerException {
        /// The message type being dispatched when the failure occurred.
        message_type: String,
        /// The underlying failure.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// A boxed, cloneable async handler: `(context, envelope) -> Result<(),
/// HandlerError>`.
pub type HandlerFn<Ctx> =
    Arc<dyn for<'a> Fn(&'a Ctx, &'a Envelope) -> BoxFuture<'a, Result<(), HandlerError>> + Send + Sync>;

/// A table mapping [`MessageType`] to the handler that processes it,
/// falling back to a default handler (by default, a no-op that logs and
/// drops the message) for unregistered types.
pub struct HandlerRegistry<Ctx> {
    handlers: HashMap<String, HandlerFn<Ctx>>,
    default: HandlerFn<Ctx>,
}

impl<Ctx: Send + Sync + 'static> Default for HandlerRegistry<Ctx> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Ctx: Send + Sync + 'static> HandlerRegistry<Ctx> {
    /// Creates an empty registry whose default handler logs and drops
    /// unmatched messages.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            default: Arc::new(|_ctx, envelope| {
                Box::pin(async move {
                    debug!(message_type = %envelope.message_type, "no handler registered; dropping");
                    Ok(())
                })
            }),
        }
    }

    /// Registers `handler` for `message_type`, replacing any previous
    /// registration.
    pub fn register(&mut self, message_type: impl Into<String>, handler: HandlerFn<Ctx>) {
        self.handlers.insert(message_type.into(), handler);
    }

    /// Returns the handler registered for `message_type`, or the default
    /// handler.
    pub fn resolve(&self, message_type: &MessageType) -> HandlerFn<Ctx> {
        self.handlers
            .get(message_type.as_str())
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.default))
    }

    /// Dispatches `envelope` to whichever handler its message type
    /// resolves to.
    pub async fn dispatch(&self, ctx: &Ctx, envelope: &Envelope) -> Result<(), HandlerError> {
        let handler = self.resolve(&envelope.message_type);
        handler(ctx, envelope).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn unregistered_type_falls_back_to_default() {
        let registry: HandlerRegistry<()> = HandlerRegistry::new();
        let clock = SystemClock::new();
        let envelope = Envelope::new("a", MessageType::Control, b"{}".to_vec(), &clock);
        assert!(registry.dispatch(&(), &envelope).await.is_ok());
    }

    #[tokio::test]
    async fn registered_handler_is_invoked() {
        let mut registry: HandlerRegistry<()> = HandlerRegistry::new();
        let called = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&called);
        registry.register(
            "RPC",
            Arc::new(move |_ctx, _env| {
                let flag = Arc::clone(&flag);
                Box::pin(async move {
                    flag.store(true, Ordering::SeqCst);
                    Ok(())
                })
            }),
        );
        let clock = SystemClock::new();
        let envelope = Envelope::new("a", MessageType::Rpc, b"{}".to_vec(), &clock);
        registry.dispatch(&(), &envelope).await.unwrap();
        assert!(called.load(Ordering::SeqCst));
    }
}
