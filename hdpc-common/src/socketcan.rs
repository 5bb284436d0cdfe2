use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::{
    messages::{CanError, CanId, CanMessage},
    traits::{CanReceiver, CanSender},
};
use snafu::{ResultExt, Snafu};
use socketcan::{CanFrame, CanSocket, EmbeddedFrame, Frame, ShouldRetry, Socket};

fn socketcan_id_to_hdpc_id(id: socketcan::CanId) -> CanId {
    match id {
        socketcan::CanId::Standard(id) => CanId::std(id.as_raw()),
        socketcan::CanId::Extended(id) => CanId::extended(id.as_raw()),
    }
}

fn hdpc_id_to_socketcan_id(id: CanId) -> Option<socketcan::CanId> {
    match id {
        CanId::Extended(id) => socketcan::ExtendedId::new(id).map(Into::into),
        CanId::Std(id) => socketcan::StandardId::new(id).map(Into::into),
    }
}

fn socketcan_frame_to_hdpc_message(frame: CanFrame) -> Result<CanMessage, CanError> {
    let id = socketcan_id_to_hdpc_id(frame.can_id());

    match frame {
        CanFrame::Data(frame) => Ok(CanMessage::new(id, frame.data())),
        CanFrame::Remote(_) => Ok(CanMessage::new_rtr(id)),
        CanFrame::Error(frame) => Err(CanError::from_raw(frame.error_bits() as u8)),
    }
}

fn hdpc_message_to_socketcan_frame(msg: &CanMessage) -> Option<CanFrame> {
    let id = hdpc_id_to_socketcan_id(msg.id())?;

    if msg.is_rtr() {
        CanFrame::new_remote(id, 0)
    } else {
        CanFrame::new(id, msg.data())
    }
}

/// Error returned by [`SocketCanReceiver::recv`]
#[derive(Debug, Snafu)]
pub enum ReceiveError {
    /// The socket reported an IO error
    #[snafu(display("Socket IO error: {source}"))]
    Io {
        /// The underlying error
        source: socketcan::IoError,
    },
    /// The controller reported a bus error frame
    #[snafu(display("CAN bus error: {source:?}"))]
    Can {
        /// The reported bus error
        source: CanError,
    },
    /// No frame arrived before the timeout expired
    #[snafu(display("Timed out waiting for a frame"))]
    Timeout,
}

/// The receive half of a SocketCAN interface
#[derive(Debug, Clone)]
pub struct SocketCanReceiver {
    socket: Arc<CanSocket>,
}

/// Polling interval used by the blocking receive
const RECV_POLL_INTERVAL: Duration = Duration::from_micros(200);

impl CanReceiver for SocketCanReceiver {
    type Error = ReceiveError;

    fn try_recv(&mut self) -> Option<CanMessage> {
        // Error frames are logged and skipped
        while let Ok(frame) = self.socket.read_frame() {
            match socketcan_frame_to_hdpc_message(frame) {
                Ok(msg) => return Some(msg),
                Err(e) => log::warn!("CAN error frame received: {e:?}"),
            }
        }
        None
    }

    fn recv(&mut self, timeout: Duration) -> Result<CanMessage, ReceiveError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.socket.read_frame() {
                Ok(frame) => return socketcan_frame_to_hdpc_message(frame).context(CanSnafu),
                Err(e) if !e.should_retry() => return Err(e).context(IoSnafu),
                Err(_) => {}
            }
            if Instant::now() >= deadline {
                return TimeoutSnafu.fail();
            }
            std::thread::sleep(RECV_POLL_INTERVAL);
        }
    }
}

/// The transmit half of a SocketCAN interface
#[derive(Debug, Clone)]
pub struct SocketCanSender {
    socket: Arc<CanSocket>,
}

impl CanSender for SocketCanSender {
    fn send(&mut self, msg: CanMessage) -> Result<(), CanMessage> {
        let Some(frame) = hdpc_message_to_socketcan_frame(&msg) else {
            return Err(msg);
        };
        self.socket.write_frame(&frame).map_err(|e| {
            log::debug!("SocketCAN write failed for {}: {e}", msg.id());
            msg
        })
    }
}

/// Open the SocketCAN interface `interface` (e.g. `can0`) in non-blocking mode
///
/// Both halves share one socket, so the receiver never sees the sender's own frames.
#[cfg_attr(docsrs, doc(cfg(feature = "socketcan")))]
pub fn open_socketcan(
    interface: &str,
) -> Result<(SocketCanSender, SocketCanReceiver), socketcan::IoError> {
    let socket = CanSocket::open(interface)?;
    socket.set_nonblocking(true)?;
    let shared = Arc::new(socket);
    Ok((
        SocketCanSender {
            socket: Arc::clone(&shared),
        },
        SocketCanReceiver { socket: shared },
    ))
}
