//! Seams between the master and the CAN interface it runs on

use core::time::Duration;

use crate::messages::CanMessage;

/// Non-blocking transmit side of a CAN interface
///
/// The master calls this from its tick, so implementations must return immediately. When the
/// interface cannot take the frame right now, it is returned in the `Err` and the caller keeps it
/// for the next tick.
pub trait CanSender {
    /// Queue one frame for transmission
    fn send(&mut self, msg: CanMessage) -> Result<(), CanMessage>;
}

impl<T: CanSender + ?Sized> CanSender for &mut T {
    fn send(&mut self, msg: CanMessage) -> Result<(), CanMessage> {
        (**self).send(msg)
    }
}

/// Receive side of a CAN interface
pub trait CanReceiver {
    /// Failure reported by [`CanReceiver::recv`]
    type Error;
    /// Take the next buffered frame, if there is one
    fn try_recv(&mut self) -> Option<CanMessage>;
    /// Wait up to `timeout` for a frame
    fn recv(&mut self, timeout: Duration) -> Result<CanMessage, Self::Error>;

    /// Throw away everything currently buffered
    fn flush(&mut self) {
        while self.try_recv().is_some() {}
    }
}
