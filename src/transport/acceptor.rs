// Transport Acceptors - the discovery side of each transport kind
// Acceptors discover raw devices/sockets and reclaim them when an endpoint
// releases its handle. Discovery itself lives outside the core; this module
// defines the interface the core consumes and the registry that routes a
// release back to the right acceptor.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::{debug, warn};

use super::handle::{ReleaseToken, TransportKind};

/// Capability the core requires from a transport acceptor.
pub trait Acceptor: Send + Sync {
    /// Hand a released handle back so the device may be rediscovered.
    fn free_endpoint(&self, token: &ReleaseToken);

    /// Temporarily stop discovering new devices of this transport kind.
    fn pause(&self, paused: bool);
}

/// Process-wide directory of acceptors, one per transport kind.
pub struct AcceptorRegistry {
    acceptors: Mutex<HashMap<TransportKind, std::sync::Arc<dyn Acceptor>>>,
}

impl AcceptorRegistry {
    pub fn new() -> Self {
        Self {
            acceptors: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&self, kind: TransportKind, acceptor: std::sync::Arc<dyn Acceptor>) {
        self.acceptors.lock().unwrap().insert(kind, acceptor);
    }

    /// Pause or resume discovery for one transport kind.
    pub fn pause(&self, kind: TransportKind, paused: bool) {
        let acceptor = self.acceptors.lock().unwrap().get(&kind).cloned();
        match acceptor {
            Some(a) => a.pause(paused),
            None => warn!(%kind, "pause requested but no acceptor registered"),
        }
    }

    /// Release a transport handle back to its owning acceptor.
    ///
    /// Posted to the runtime rather than executed inline: the caller may be
    /// a timer or destructor whose endpoint is already gone, so the task
    /// captures only the token data.
    pub fn release(&self, token: ReleaseToken) {
        let acceptor = self.acceptors.lock().unwrap().get(&token.kind).cloned();
        let Some(acceptor) = acceptor else {
            warn!(%token, "release requested but no acceptor registered");
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    debug!(%token, "releasing transport to acceptor");
                    acceptor.free_endpoint(&token);
                });
            }
            // No runtime (e.g. drop after shutdown): release directly.
            Err(_) => acceptor.free_endpoint(&token),
        }
    }
}

impl Default for AcceptorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingAcceptor {
        freed: AtomicUsize,
        paused: AtomicUsize,
    }

    impl CountingAcceptor {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                freed: AtomicUsize::new(0),
                paused: AtomicUsize::new(0),
            })
        }
    }

    impl Acceptor for CountingAcceptor {
        fn free_endpoint(&self, _token: &ReleaseToken) {
            self.freed.fetch_add(1, Ordering::SeqCst);
        }

        fn pause(&self, _paused: bool) {
            self.paused.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_release_routes_to_registered_acceptor() {
        let registry = AcceptorRegistry::new();
        let acceptor = CountingAcceptor::new();
        registry.register(TransportKind::Serial, acceptor.clone());

        registry.release(ReleaseToken {
            kind: TransportKind::Serial,
            target: "/dev/ttyACM0".to_string(),
        });
        tokio::task::yield_now().await;

        assert_eq!(acceptor.freed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_release_unknown_kind_is_ignored() {
        let registry = AcceptorRegistry::new();
        // No acceptor registered; must not panic.
        registry.release(ReleaseToken {
            kind: TransportKind::Usb,
            target: "1-1.4".to_string(),
        });
    }

    #[test]
    fn test_pause_forwards() {
        let registry = AcceptorRegistry::new();
        let acceptor = CountingAcceptor::new();
        registry.register(TransportKind::Tcp, acceptor.clone());

        registry.pause(TransportKind::Tcp, true);
        registry.pause(TransportKind::Tcp, false);

        assert_eq!(acceptor.paused.load(Ordering::SeqCst), 2);
    }
}
