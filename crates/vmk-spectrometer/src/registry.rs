//! Caller-owned registry of open transports.
//!
//! At most one live transport exists per [`DeviceIdentity`]. Opening an
//! identity that is already registered closes the previous transport first,
//! so a device handle is never held twice. Any spectrometer still holding
//! the old transport sees `Error::DeviceClosed` from then on.

use std::collections::HashMap;
use tracing::{debug, info, warn};
use vmk_core::{DeviceIdentity, Error, Result};
use vmk_hardware::DeviceTransport;

use crate::transport::{AnyTransport, SharedTransport};

/// Open transports keyed by identity.
///
/// # Examples
///
/// ```
/// use vmk_core::{DeviceIdentity, MockIdentity};
/// use vmk_spectrometer::TransportRegistry;
///
/// #[tokio::main]
/// async fn main() -> vmk_core::Result<()> {
///     let mut registry = TransportRegistry::new();
///     let identity = DeviceIdentity::Mock(MockIdentity::new("bench", 64));
///
///     let _transport = registry.open(&identity).await?;
///     assert!(registry.contains(&identity));
///
///     registry.close_all().await?;
///     assert!(registry.is_empty());
///     Ok(())
/// }
/// ```
#[derive(Debug, Default)]
pub struct TransportRegistry {
    entries: HashMap<DeviceIdentity, SharedTransport>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a transport for `identity`, closing any previous one first.
    ///
    /// # Errors
    ///
    /// Returns the open error of the new transport. The previous transport
    /// is closed (and unregistered) even when the new open fails.
    pub async fn open(&mut self, identity: &DeviceIdentity) -> Result<SharedTransport> {
        self.release(identity).await;

        let transport = AnyTransport::open(identity).await?.into_shared();
        self.entries.insert(identity.clone(), transport.clone());
        info!("Registered transport for {}", identity);
        Ok(transport)
    }

    /// Register an already opened transport under `identity`, closing any
    /// previous one first.
    pub async fn insert(
        &mut self,
        identity: DeviceIdentity,
        transport: AnyTransport,
    ) -> SharedTransport {
        self.release(&identity).await;

        let transport = transport.into_shared();
        debug!("Registered injected transport for {}", identity);
        self.entries.insert(identity, transport.clone());
        transport
    }

    /// Close and unregister the transport for `identity`.
    ///
    /// Returns `false` if nothing was registered under it. A transport that
    /// its spectrometer already closed is unregistered without error.
    ///
    /// # Errors
    ///
    /// Returns the transport's close error.
    pub async fn close(&mut self, identity: &DeviceIdentity) -> Result<bool> {
        let Some(transport) = self.entries.remove(identity) else {
            return Ok(false);
        };
        close_shared(&transport).await?;
        info!("Closed transport for {}", identity);
        Ok(true)
    }

    /// Close and unregister every transport.
    ///
    /// All transports are closed even if some fail; the first failure is
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns the first close error encountered.
    pub async fn close_all(&mut self) -> Result<()> {
        let mut first_error = None;
        for (identity, transport) in self.entries.drain() {
            if let Err(e) = close_shared(&transport).await {
                warn!("Failed to close transport for {}: {}", identity, e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub fn contains(&self, identity: &DeviceIdentity) -> bool {
        self.entries.contains_key(identity)
    }

    pub fn get(&self, identity: &DeviceIdentity) -> Option<SharedTransport> {
        self.entries.get(identity).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    async fn release(&mut self, identity: &DeviceIdentity) {
        if let Some(previous) = self.entries.remove(identity) {
            debug!("Closing previous transport for {}", identity);
            if let Err(e) = close_shared(&previous).await {
                warn!("Failed to close previous transport for {}: {}", identity, e);
            }
        }
    }
}

/// Close a shared transport, treating "already closed" as success.
async fn close_shared(transport: &SharedTransport) -> Result<()> {
    match transport.lock().await.close().await {
        Ok(()) | Err(Error::DeviceClosed) => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use vmk_core::MockIdentity;
    use vmk_hardware::mock::MockTransport;

    fn mock_identity(name: &str) -> DeviceIdentity {
        DeviceIdentity::Mock(MockIdentity::new(name, 16))
    }

    #[tokio::test]
    async fn test_reopen_closes_previous() {
        let mut registry = TransportRegistry::new();
        let identity = mock_identity("a");

        let first = registry.open(&identity).await.unwrap();
        let second = registry.open(&identity).await.unwrap();

        assert_eq!(registry.len(), 1);
        assert!(!first.lock().await.is_open());
        assert!(second.lock().await.is_open());
    }

    #[tokio::test]
    async fn test_insert_replaces_previous() {
        let mut registry = TransportRegistry::new();
        let identity = mock_identity("a");

        let old = MockTransport::new();
        let old_handle = old.handle();
        registry.insert(identity.clone(), old.into()).await;
        registry
            .insert(identity.clone(), MockTransport::new().into())
            .await;

        assert!(old_handle.is_closed());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_close_unknown_identity() {
        let mut registry = TransportRegistry::new();
        assert!(!registry.close(&mock_identity("missing")).await.unwrap());
    }

    #[tokio::test]
    async fn test_close_already_closed_transport() {
        let mut registry = TransportRegistry::new();
        let identity = mock_identity("a");

        let transport = registry.open(&identity).await.unwrap();
        transport.lock().await.close().await.unwrap();

        assert!(registry.close(&identity).await.unwrap());
        assert!(!registry.contains(&identity));
    }

    #[tokio::test]
    async fn test_close_all() {
        let mut registry = TransportRegistry::new();
        let a = registry.open(&mock_identity("a")).await.unwrap();
        let b = registry.open(&mock_identity("b")).await.unwrap();
        assert_eq!(registry.len(), 2);

        registry.close_all().await.unwrap();
        assert!(registry.is_empty());
        assert!(!a.lock().await.is_open());
        assert!(!b.lock().await.is_open());
    }
}
