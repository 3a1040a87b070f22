//! Channels over std streams the embedder has already connected

use super::{Channel, Connector};
use std::io;
use std::net::TcpStream;
use std::os::unix::net::UnixStream;
use tracing::debug;

impl Channel for UnixStream {
    fn probe(&self) -> io::Result<()> {
        self.peer_addr().map(|_| ())
    }
}

impl Channel for TcpStream {
    fn probe(&self) -> io::Result<()> {
        self.peer_addr().map(|_| ())
    }
}

/// Hands over one already connected stream
///
/// There is nothing to re-import: once the stream has been taken, further
/// imports fail with `NotConnected`.
#[derive(Debug)]
pub struct AdoptedConnector<S> {
    stream: Option<S>,
}

impl<S> AdoptedConnector<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream: Some(stream),
        }
    }
}

impl<S: Channel> Connector for AdoptedConnector<S> {
    type Channel = S;

    fn import(&mut self) -> io::Result<S> {
        match self.stream.take() {
            Some(stream) => {
                debug!("Adopted pre-connected control channel");
                Ok(stream)
            }
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "adopted stream was already handed over",
            )),
        }
    }
}
