//! Control channel to the remote agent
//!
//! A [`Connector`] knows how to obtain the channel once; the
//! [`TransportHandle`] caches it and checks liveness before every use,
//! re-importing once when the cached channel has gone away.

pub mod shm;
pub mod stream;

pub use shm::{FdChannel, HandleWidth, ShmConnector};
pub use stream::AdoptedConnector;

use crate::error::TransportError;
use std::io::{self, Read, Write};
use tracing::{debug, info, warn};

/// Bidirectional byte stream to the agent
pub trait Channel: Read + Write + Send {
    /// Check that the peer is still connected
    fn probe(&self) -> io::Result<()>;
}

/// Source of the control channel
pub trait Connector: Send {
    type Channel: Channel;

    /// Obtain a channel; called on first use and after a failed probe
    fn import(&mut self) -> io::Result<Self::Channel>;
}

/// Cached control channel plus the connector that produced it
pub struct TransportHandle<C: Connector> {
    connector: C,
    channel: Option<C::Channel>,
}

impl<C: Connector> TransportHandle<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            channel: None,
        }
    }

    /// Whether a channel has been imported and not dropped since
    pub fn is_connected(&self) -> bool {
        self.channel.is_some()
    }

    /// Drop the cached channel; the next `acquire` imports a fresh one
    ///
    /// Used after a failed exchange, when the stream may hold part of a
    /// frame and can no longer be trusted to start on a frame boundary.
    pub fn invalidate(&mut self) {
        if self.channel.take().is_some() {
            debug!("Dropped control channel");
        }
    }

    /// Return a live channel, importing it if needed
    ///
    /// A cached channel that fails its probe is dropped and replaced by one
    /// fresh import. A failure after that is reported to the caller.
    pub fn acquire(&mut self) -> Result<&mut C::Channel, TransportError> {
        let mut failure = None;

        for attempt in 0..2 {
            if self.channel.is_none() {
                match self.connector.import() {
                    Ok(channel) => {
                        info!("Imported control channel (attempt {})", attempt + 1);
                        self.channel = Some(channel);
                    }
                    Err(e) => {
                        warn!("Failed to import control channel: {}", e);
                        failure = Some(TransportError::Import(e));
                        continue;
                    }
                }
            }

            let probe = match &self.channel {
                Some(channel) => channel.probe(),
                None => continue,
            };
            match probe {
                Ok(()) => {
                    failure = None;
                    break;
                }
                Err(e) => {
                    warn!("Control channel probe failed: {}", e);
                    self.channel = None;
                    failure = Some(TransportError::Unreachable(e));
                }
            }
        }

        if let Some(e) = failure {
            return Err(e);
        }
        self.channel.as_mut().ok_or(TransportError::NotImported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedChannel {
        alive: bool,
    }

    impl Read for ScriptedChannel {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Ok(0)
        }
    }

    impl Write for ScriptedChannel {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Channel for ScriptedChannel {
        fn probe(&self) -> io::Result<()> {
            if self.alive {
                Ok(())
            } else {
                Err(io::Error::from(io::ErrorKind::NotConnected))
            }
        }
    }

    /// Hands out channels with preset liveness, counting imports
    struct ScriptedConnector {
        script: VecDeque<bool>,
        imports: Arc<AtomicUsize>,
    }

    impl ScriptedConnector {
        fn new(script: &[bool]) -> (Self, Arc<AtomicUsize>) {
            let imports = Arc::new(AtomicUsize::new(0));
            let connector = Self {
                script: script.iter().copied().collect(),
                imports: imports.clone(),
            };
            (connector, imports)
        }
    }

    impl Connector for ScriptedConnector {
        type Channel = ScriptedChannel;

        fn import(&mut self) -> io::Result<ScriptedChannel> {
            self.imports.fetch_add(1, Ordering::SeqCst);
            match self.script.pop_front() {
                Some(alive) => Ok(ScriptedChannel { alive }),
                None => Err(io::Error::from(io::ErrorKind::NotFound)),
            }
        }
    }

    #[test]
    fn test_imports_once_and_caches() {
        let (connector, imports) = ScriptedConnector::new(&[true]);
        let mut handle = TransportHandle::new(connector);

        assert!(!handle.is_connected());
        handle.acquire().unwrap();
        handle.acquire().unwrap();
        assert!(handle.is_connected());
        assert_eq!(imports.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dead_channel_is_reimported_once() {
        let (connector, imports) = ScriptedConnector::new(&[true, true]);
        let mut handle = TransportHandle::new(connector);
        handle.acquire().unwrap();

        // Simulate the peer going away
        if let Some(channel) = handle.channel.as_mut() {
            channel.alive = false;
        }
        handle.acquire().unwrap();
        assert_eq!(imports.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_invalidate_forces_reimport() {
        let (connector, imports) = ScriptedConnector::new(&[true, true]);
        let mut handle = TransportHandle::new(connector);
        handle.acquire().unwrap();

        handle.invalidate();
        assert!(!handle.is_connected());
        handle.invalidate();

        handle.acquire().unwrap();
        assert_eq!(imports.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unreachable_after_retry() {
        let (connector, imports) = ScriptedConnector::new(&[false, false, true]);
        let mut handle = TransportHandle::new(connector);

        assert!(matches!(
            handle.acquire(),
            Err(TransportError::Unreachable(_))
        ));
        assert_eq!(imports.load(Ordering::SeqCst), 2);
        assert!(!handle.is_connected());
    }

    #[test]
    fn test_import_failure() {
        let (connector, _) = ScriptedConnector::new(&[]);
        let mut handle = TransportHandle::new(connector);
        assert!(matches!(handle.acquire(), Err(TransportError::Import(_))));
    }
}
