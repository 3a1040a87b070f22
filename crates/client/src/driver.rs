//! Synchronous request/response over the shared control channel
//!
//! One mutex covers the transport, so at most one remote call is in flight
//! per process. Callers hold a [`Session`] for the whole exchange, and for
//! any tree update that depends on the reply.

use crate::error::{CallError, TransportError};
use crate::transport::{Connector, TransportHandle};
use protocol::{Cursor, FieldWriter, Operation, Packet, ProtocolError, read_frame, write_frame};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, warn};

/// Invoked when the control channel cannot be (re)established
pub type FatalHandler = fn(&TransportError) -> !;

/// Default fatal handler: log, tell the user, exit with status 1
pub fn exit_on_fatal(err: &TransportError) -> ! {
    error!("USB agent unreachable: {}", err);
    eprintln!("usbnet: unable to access remote USB agent: {}", err);
    std::process::exit(1)
}

pub struct CallDriver<C: Connector> {
    transport: Mutex<TransportHandle<C>>,
    fatal: FatalHandler,
}

impl<C: Connector> CallDriver<C> {
    pub fn new(connector: C) -> Self {
        Self::with_fatal_handler(connector, exit_on_fatal)
    }

    pub fn with_fatal_handler(connector: C, fatal: FatalHandler) -> Self {
        Self {
            transport: Mutex::new(TransportHandle::new(connector)),
            fatal,
        }
    }

    /// Take the call lock
    ///
    /// A poisoned lock is recovered: the guarded state is only the channel,
    /// which is re-probed on every call anyway.
    pub fn lock(&self) -> Session<'_, C> {
        Session {
            transport: self.transport.lock().unwrap_or_else(PoisonError::into_inner),
            fatal: self.fatal,
        }
    }
}

/// Exclusive use of the control channel
pub struct Session<'a, C: Connector> {
    transport: MutexGuard<'a, TransportHandle<C>>,
    fatal: FatalHandler,
}

impl<C: Connector> Session<'_, C> {
    fn channel(&mut self) -> &mut C::Channel {
        match self.transport.acquire() {
            Ok(channel) => channel,
            Err(e) => (self.fatal)(&e),
        }
    }

    /// Send a request that has no reply
    pub fn send(
        &mut self,
        op: Operation,
        build: impl FnOnce(&mut FieldWriter),
    ) -> Result<(), CallError> {
        let request = Packet::build(op, build)?;
        if let Err(e) = write_frame(self.channel(), &request) {
            warn!("{}: send failed, dropping control channel: {}", op, e);
            self.transport.invalidate();
            return Err(e.into());
        }
        debug!("{}: sent {} bytes", op, request.body.len());
        Ok(())
    }

    /// Send a request and wait for its reply
    ///
    /// The reply must carry the request's operation tag.
    pub fn call(
        &mut self,
        op: Operation,
        build: impl FnOnce(&mut FieldWriter),
    ) -> Result<Packet, CallError> {
        let request = Packet::build(op, build)?;
        let channel = self.channel();
        let exchange = write_frame(channel, &request).and_then(|()| read_frame(channel));
        let reply = match exchange {
            Ok(reply) => reply,
            // The oversized body has been drained; the stream is still aligned
            Err(e @ ProtocolError::FrameTooLarge { .. }) => return Err(e.into()),
            Err(e) => {
                warn!("{}: exchange failed, dropping control channel: {}", op, e);
                self.transport.invalidate();
                return Err(e.into());
            }
        };

        if reply.op != request.op {
            warn!("{}: reply tagged 0x{:02x}", op, reply.op);
            return Err(CallError::TagMismatch {
                expected: op,
                actual: reply.op,
            });
        }
        Ok(reply)
    }
}

/// Read the leading status field of a reply
pub fn take_status(op: Operation, cursor: &mut Cursor<'_>) -> Result<i32, CallError> {
    cursor
        .take_scalar()?
        .map(clamp_status)
        .ok_or(CallError::MissingField { op, field: "status" })
}

/// Narrow a wire integer to a libusb-style int
pub fn clamp_status(value: i64) -> i32 {
    value.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}
