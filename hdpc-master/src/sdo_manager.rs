//! Non-blocking SDO transaction engine
//!
//! An [`SdoTransaction`] is a handle shared between its owner and the [`SdoManager`]. The owner
//! submits it, then checks its state on later ticks. The manager transmits queued transactions
//! within a fixed in-flight window, matches responses by (node, index, sub) and times out
//! transactions which go unanswered.
use std::cell::Cell;
use std::collections::VecDeque;
use std::rc::Rc;

use hdpc_common::{
    messages::{cob_id, SDO_REQ_BASE, SDO_RESP_BASE},
    sdo::{AbortCode, SdoPayload, SdoRequest, SdoResponse},
    traits::CanSender,
    CanMessage, NodeId,
};
use snafu::Snafu;

/// A wrapper around the AbortCode enum to allow for unknown values
///
/// Although the library should "know" all the abort codes, it is possible to receive other values
/// and this allows those to be captured and exposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawAbortCode {
    /// A recognized abort code
    Valid(AbortCode),
    /// An unrecognized abort code
    Unknown(u32),
}

impl std::fmt::Display for RawAbortCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RawAbortCode::Valid(abort_code) => write!(f, "{abort_code:?}"),
            RawAbortCode::Unknown(code) => write!(f, "{code:X}"),
        }
    }
}

impl From<u32> for RawAbortCode {
    fn from(value: u32) -> Self {
        match AbortCode::try_from(value) {
            Ok(code) => Self::Valid(code),
            Err(_) => Self::Unknown(value),
        }
    }
}

/// Error returned by [`SdoManager::submit`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Snafu)]
pub enum SdoManagerError {
    /// The manager already holds as many transactions as its capacity allows
    #[snafu(display("SDO queue is full ({capacity} transactions pending)"))]
    CapacityExceeded {
        /// The configured capacity
        capacity: usize,
    },
    /// The transaction has been submitted before
    ///
    /// Transactions are single use. Create a new one to retry.
    #[snafu(display("SDO transaction was already submitted"))]
    AlreadySubmitted,
    /// A write transaction carries no data
    #[snafu(display("SDO write to 0x{index:04X}sub{sub} has no data"))]
    EmptyWrite {
        /// Object index
        index: u16,
        /// Object sub index
        sub: u8,
    },
}

/// The lifecycle state of an [`SdoTransaction`]
///
/// Transitions only go Queued -> Waiting -> Received or Queued -> Waiting -> TimedOut.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransactionState {
    /// Submitted and waiting for a free slot in the in-flight window
    Queued,
    /// Transmitted, awaiting a response
    Waiting,
    /// A response (possibly an abort) was received
    Received,
    /// No response arrived within the timeout
    TimedOut,
}

/// Whether a transaction reads or writes its object
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SdoDirection {
    /// Upload the object value from the node
    Read,
    /// Download a value to the node
    Write,
}

#[derive(Debug)]
struct TransactionInner {
    node: NodeId,
    index: u16,
    sub: u8,
    direction: SdoDirection,
    request_data: SdoPayload,
    timeout_us: u64,
    submitted: Cell<bool>,
    state: Cell<TransactionState>,
    sent_at_us: Cell<Option<u64>>,
    response: Cell<Option<SdoPayload>>,
    abort_code: Cell<Option<u32>>,
}

/// A single SDO read or write against one node's object dictionary
///
/// Cloning the handle does not copy the transaction; all clones observe the same state. A
/// transaction can be submitted only once. After it completes, the owner drops it and creates a
/// new one for the next access.
#[derive(Clone, Debug)]
pub struct SdoTransaction(Rc<TransactionInner>);

impl SdoTransaction {
    fn new(
        node: NodeId,
        index: u16,
        sub: u8,
        direction: SdoDirection,
        request_data: SdoPayload,
        timeout_us: u64,
    ) -> Self {
        Self(Rc::new(TransactionInner {
            node,
            index,
            sub,
            direction,
            request_data,
            timeout_us,
            submitted: Cell::new(false),
            state: Cell::new(TransactionState::Queued),
            sent_at_us: Cell::new(None),
            response: Cell::new(None),
            abort_code: Cell::new(None),
        }))
    }

    /// Create a transaction reading `index`:`sub` from `node`
    pub fn read(node: NodeId, index: u16, sub: u8, timeout_us: u64) -> Self {
        Self::new(
            node,
            index,
            sub,
            SdoDirection::Read,
            SdoPayload::default(),
            timeout_us,
        )
    }

    /// Create a transaction writing up to 4 bytes of `data` to `index`:`sub` on `node`
    pub fn write(node: NodeId, index: u16, sub: u8, data: &[u8], timeout_us: u64) -> Self {
        Self::new(
            node,
            index,
            sub,
            SdoDirection::Write,
            SdoPayload::new(data),
            timeout_us,
        )
    }

    /// The addressed node
    pub fn node(&self) -> NodeId {
        self.0.node
    }

    /// The addressed object index
    pub fn index(&self) -> u16 {
        self.0.index
    }

    /// The addressed sub index
    pub fn sub(&self) -> u8 {
        self.0.sub
    }

    /// Read or write
    pub fn direction(&self) -> SdoDirection {
        self.0.direction
    }

    /// The timeout applied once the transaction is sent
    pub fn timeout_us(&self) -> u64 {
        self.0.timeout_us
    }

    /// The current lifecycle state
    pub fn state(&self) -> TransactionState {
        self.0.state.get()
    }

    /// Submitted, but not yet transmitted
    pub fn is_queued(&self) -> bool {
        self.state() == TransactionState::Queued
    }

    /// Transmitted and awaiting a response
    pub fn is_waiting(&self) -> bool {
        self.state() == TransactionState::Waiting
    }

    /// A response arrived
    pub fn is_received(&self) -> bool {
        self.state() == TransactionState::Received
    }

    /// No response arrived in time
    pub fn has_timed_out(&self) -> bool {
        self.state() == TransactionState::TimedOut
    }

    /// The transaction has reached a final state
    pub fn is_complete(&self) -> bool {
        self.is_received() || self.has_timed_out()
    }

    /// When the request was transmitted, if it has been
    pub fn sent_at_us(&self) -> Option<u64> {
        self.0.sent_at_us.get()
    }

    /// The value uploaded by a completed read
    ///
    /// None until the transaction is received, for writes, and for aborted accesses.
    pub fn data(&self) -> Option<SdoPayload> {
        self.0.response.get()
    }

    /// The abort code, if the node aborted the access
    pub fn abort_code(&self) -> Option<RawAbortCode> {
        self.0.abort_code.get().map(RawAbortCode::from)
    }

    /// True when the node confirmed the access without aborting
    pub fn succeeded(&self) -> bool {
        self.is_received() && self.0.abort_code.get().is_none()
    }

    fn request(&self) -> SdoRequest {
        match self.0.direction {
            SdoDirection::Read => SdoRequest::initiate_upload(self.0.index, self.0.sub),
            SdoDirection::Write => SdoRequest::ExpeditedDownload {
                index: self.0.index,
                sub: self.0.sub,
                data: self.0.request_data,
            },
        }
    }

    fn request_message(&self) -> CanMessage {
        CanMessage::new(
            cob_id(SDO_REQ_BASE, self.0.node.raw()),
            &self.request().to_bytes(),
        )
    }

    fn mark_sent(&self, now_us: u64) {
        self.0.sent_at_us.set(Some(now_us));
        self.0.state.set(TransactionState::Waiting);
    }

    fn is_expired(&self, now_us: u64) -> bool {
        match self.0.sent_at_us.get() {
            Some(sent) => now_us.saturating_sub(sent) > self.0.timeout_us,
            None => false,
        }
    }

    /// Returns true if `resp` answers this transaction
    ///
    /// Logs and returns false when the object matches but the response kind does not fit the
    /// direction.
    fn accepts(&self, resp: &SdoResponse) -> bool {
        match (self.0.direction, resp) {
            (_, SdoResponse::Abort { .. }) => true,
            (SdoDirection::Read, SdoResponse::ConfirmUpload { .. }) => true,
            (SdoDirection::Write, SdoResponse::ConfirmDownload { .. }) => true,
            _ => {
                log::debug!(
                    "Dropping {:?} for {:?} of node {} 0x{:04X}sub{}",
                    resp,
                    self.0.direction,
                    self.0.node,
                    self.0.index,
                    self.0.sub
                );
                false
            }
        }
    }

    fn complete(&self, resp: SdoResponse) {
        match resp {
            SdoResponse::ConfirmUpload { data, .. } => self.0.response.set(Some(data)),
            SdoResponse::ConfirmDownload { .. } => (),
            SdoResponse::Abort { abort_code, .. } => {
                log::warn!(
                    "Node {} aborted SDO access to 0x{:04X}sub{}: {}",
                    self.0.node,
                    self.0.index,
                    self.0.sub,
                    RawAbortCode::from(abort_code)
                );
                self.0.abort_code.set(Some(abort_code));
            }
        }
        self.0.state.set(TransactionState::Received);
    }
}

/// Queues, transmits and tracks SDO transactions for every node on a bus
#[derive(Debug)]
pub struct SdoManager {
    queue: VecDeque<SdoTransaction>,
    in_flight: Vec<SdoTransaction>,
    window: usize,
    capacity: Option<usize>,
    default_timeout_us: u64,
}

impl SdoManager {
    /// Create a manager
    ///
    /// # Arguments
    /// * `window` - Maximum number of transactions in flight at once. Values below 1 are treated
    ///   as 1.
    /// * `capacity` - Optional bound on pending (queued plus in flight) transactions
    /// * `default_timeout_us` - The timeout owners should give new transactions on this bus
    pub fn new(window: usize, capacity: Option<usize>, default_timeout_us: u64) -> Self {
        Self {
            queue: VecDeque::new(),
            in_flight: Vec::new(),
            window: window.max(1),
            capacity,
            default_timeout_us,
        }
    }

    /// The default transaction timeout for this bus
    pub fn default_timeout_us(&self) -> u64 {
        self.default_timeout_us
    }

    /// The in-flight window size
    pub fn window(&self) -> usize {
        self.window
    }

    /// Number of transactions awaiting transmission
    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    /// Number of transactions transmitted and awaiting a response
    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    /// Queue a transaction for transmission on a later [`poll`](Self::poll)
    pub fn submit(&mut self, transaction: &SdoTransaction) -> Result<(), SdoManagerError> {
        if transaction.0.submitted.get() {
            return AlreadySubmittedSnafu.fail();
        }
        if transaction.direction() == SdoDirection::Write && transaction.0.request_data.is_empty() {
            return EmptyWriteSnafu {
                index: transaction.index(),
                sub: transaction.sub(),
            }
            .fail();
        }
        if let Some(capacity) = self.capacity {
            if self.queue.len() + self.in_flight.len() >= capacity {
                return CapacityExceededSnafu { capacity }.fail();
            }
        }
        transaction.0.submitted.set(true);
        self.queue.push_back(transaction.clone());
        Ok(())
    }

    /// Advance all transactions
    ///
    /// Waiting transactions older than their timeout are timed out first, then queued
    /// transactions are transmitted in submission order until the window is full. A node's SDO
    /// server handles one request at a time, so a queued transaction for a node which already has
    /// a request in flight is held back and the next node's work goes ahead of it. Each node
    /// therefore sees its transactions one at a time, in submission order. If the sender rejects
    /// a frame, transmission stops and that transaction keeps its place for the next poll.
    pub fn poll<S: CanSender + ?Sized>(&mut self, now_us: u64, sender: &mut S) {
        self.in_flight.retain(|t| {
            if t.is_expired(now_us) {
                log::warn!(
                    "SDO {:?} of node {} 0x{:04X}sub{} timed out",
                    t.direction(),
                    t.node(),
                    t.index(),
                    t.sub()
                );
                t.0.state.set(TransactionState::TimedOut);
                false
            } else {
                true
            }
        });

        let mut i = 0;
        while self.in_flight.len() < self.window && i < self.queue.len() {
            let next = &self.queue[i];
            if self.in_flight.iter().any(|t| t.node() == next.node()) {
                i += 1;
                continue;
            }
            if let Err(msg) = sender.send(next.request_message()) {
                log::warn!("Failed to send SDO request on {}", msg.id());
                break;
            }
            next.mark_sent(now_us);
            if let Some(sent) = self.queue.remove(i) {
                self.in_flight.push(sent);
            }
        }
    }

    /// Handle a frame received on an SDO response COB-ID (0x580 + node)
    ///
    /// Returns true if the frame completed a transaction. Malformed frames and responses which
    /// match no waiting transaction are dropped.
    pub fn on_response_frame(&mut self, msg: &CanMessage) -> bool {
        let node = match msg.id().function_and_node() {
            Some((SDO_RESP_BASE, node)) => node,
            _ => return false,
        };
        let resp = match SdoResponse::try_from(msg.data()) {
            Ok(resp) => resp,
            Err(e) => {
                log::warn!("Malformed SDO response on {}: {e}", msg.id());
                return false;
            }
        };
        let object = resp.object();
        let position = self.in_flight.iter().position(|t| {
            t.node().raw() == node && (t.index(), t.sub()) == object && t.accepts(&resp)
        });
        match position {
            Some(i) => {
                let transaction = self.in_flight.remove(i);
                transaction.complete(resp);
                true
            }
            None => {
                log::debug!(
                    "Unsolicited SDO response from node {node} for 0x{:04X}sub{}",
                    object.0,
                    object.1
                );
                false
            }
        }
    }
}
