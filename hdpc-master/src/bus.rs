//! The bus: single owner of the transport, the SDO engine and the PDO registry
use std::collections::BTreeMap;

use hdpc_common::{
    device_config::BusConfig,
    messages::{HEARTBEAT_BASE, SDO_RESP_BASE, SYNC_ID},
    nmt::{Heartbeat, NmtCommand, NmtCommandSpecifier, NmtState},
    traits::CanSender,
    CanMessage, NodeId,
};

use crate::{
    pdo_registry::PdoRegistry,
    sdo_manager::{SdoManager, SdoManagerError, SdoTransaction},
};

#[derive(Clone, Copy, Debug)]
struct NodeStatus {
    state: NmtState,
    last_seen_us: u64,
}

/// A CANopen bus as seen by the master
///
/// Received frames are passed in with [`Bus::on_frame`] as they are read from the transport, and
/// [`Bus::tick`] is called once per SYNC period.
#[derive(Debug)]
pub struct Bus<S: CanSender> {
    sender: S,
    sdo: SdoManager,
    pdos: PdoRegistry,
    produce_sync: bool,
    nodes: BTreeMap<NodeId, NodeStatus>,
}

impl<S: CanSender> Bus<S> {
    /// Create a bus sending through `sender`
    pub fn new(sender: S, config: &BusConfig) -> Self {
        Self {
            sender,
            sdo: SdoManager::new(
                config.sdo_window,
                config.sdo_queue_capacity,
                config.sdo_timeout_us(),
            ),
            pdos: PdoRegistry::new(),
            produce_sync: config.produce_sync,
            nodes: BTreeMap::new(),
        }
    }

    /// Route a received frame
    ///
    /// SDO responses go to the SDO manager, heartbeats update the node table, and everything else
    /// is offered to the PDO registry. Unknown and malformed frames are dropped.
    pub fn on_frame(&mut self, msg: &CanMessage, now_us: u64) {
        match msg.id().function_and_node() {
            Some((SDO_RESP_BASE, _)) => {
                self.sdo.on_response_frame(msg);
            }
            Some((HEARTBEAT_BASE, _)) => match Heartbeat::try_from(msg) {
                Ok(hb) => self.on_heartbeat(hb, now_us),
                Err(()) => log::warn!("Malformed heartbeat on {}: {:?}", msg.id(), msg.data()),
            },
            _ => {
                if let Err(e) = self.pdos.dispatch(msg, now_us) {
                    log::warn!("Dropping PDO: {e}");
                }
            }
        }
    }

    fn on_heartbeat(&mut self, hb: Heartbeat, now_us: u64) {
        let previous = self.nodes.insert(
            hb.node,
            NodeStatus {
                state: hb.state,
                last_seen_us: now_us,
            },
        );
        if previous.map(|p| p.state) != Some(hb.state) {
            log::info!("Node {} is {}", hb.node, hb.state);
        }
    }

    /// Run one bus period
    ///
    /// Sends SYNC (if enabled), then every registered transmit PDO, then lets the SDO manager
    /// time out and transmit transactions.
    pub fn tick(&mut self, now_us: u64) {
        if self.produce_sync && self.sender.send(CanMessage::new(SYNC_ID, &[])).is_err() {
            log::warn!("Failed to send SYNC");
        }
        for id in self.pdos.transmitter_ids() {
            if let Ok(msg) = self.pdos.emit(id) {
                if self.sender.send(msg).is_err() {
                    log::warn!("Failed to send PDO {id}");
                }
            }
        }
        self.sdo.poll(now_us, &mut self.sender);
    }

    /// Queue an SDO transaction
    pub fn submit(&mut self, transaction: &SdoTransaction) -> Result<(), SdoManagerError> {
        self.sdo.submit(transaction)
    }

    /// The default SDO timeout for transactions on this bus
    pub fn sdo_timeout_us(&self) -> u64 {
        self.sdo.default_timeout_us()
    }

    /// Send an NMT command to one node, or to every node when `node` is None
    pub fn send_nmt(
        &mut self,
        cs: NmtCommandSpecifier,
        node: Option<NodeId>,
    ) -> Result<(), CanMessage> {
        let cmd = NmtCommand {
            cs,
            node: node.map(|n| n.raw()).unwrap_or(0),
        };
        self.sender.send(cmd.to_can_message())
    }

    /// Send an arbitrary frame
    pub fn send(&mut self, msg: CanMessage) -> Result<(), CanMessage> {
        self.sender.send(msg)
    }

    /// The NMT state from the last heartbeat of a node
    pub fn nmt_state(&self, node: NodeId) -> Option<NmtState> {
        self.nodes.get(&node).map(|s| s.state)
    }

    /// When the last heartbeat of a node was received
    pub fn last_heartbeat_us(&self, node: NodeId) -> Option<u64> {
        self.nodes.get(&node).map(|s| s.last_seen_us)
    }

    /// The SDO manager
    pub fn sdo(&self) -> &SdoManager {
        &self.sdo
    }

    /// The PDO registry
    pub fn pdos(&self) -> &PdoRegistry {
        &self.pdos
    }

    /// The PDO registry, mutably
    pub fn pdos_mut(&mut self) -> &mut PdoRegistry {
        &mut self.pdos
    }

    /// The transport sender
    pub fn sender(&self) -> &S {
        &self.sender
    }

    /// The transport sender, mutably
    pub fn sender_mut(&mut self) -> &mut S {
        &mut self.sender
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdo_registry::PdoLayout;
    use hdpc_common::{messages::cob_id, pdo::PdoMapping, sdo::SdoResponse, CanId};

    #[derive(Default, Debug)]
    struct CaptureSender {
        sent: Vec<CanMessage>,
    }

    impl CanSender for CaptureSender {
        fn send(&mut self, msg: CanMessage) -> Result<(), CanMessage> {
            self.sent.push(msg);
            Ok(())
        }
    }

    fn node(id: u8) -> NodeId {
        NodeId::new(id).unwrap()
    }

    #[test]
    fn test_tick_order() {
        let mut bus = Bus::new(CaptureSender::default(), &BusConfig::default());
        bus.pdos_mut()
            .register_transmitter(
                CanId::std(0x201),
                PdoLayout::new(&[PdoMapping::new(0x60FF, 0, 32)]).unwrap(),
            )
            .unwrap();
        let t = SdoTransaction::read(node(1), 0x6041, 0, 1000);
        bus.submit(&t).unwrap();

        bus.tick(0);
        let ids: Vec<CanId> = bus.sender().sent.iter().map(|m| m.id()).collect();
        assert_eq!(vec![SYNC_ID, CanId::std(0x201), CanId::std(0x601)], ids);
        assert!(t.is_waiting());
    }

    #[test]
    fn test_no_sync_when_disabled() {
        let config = BusConfig {
            produce_sync: false,
            ..Default::default()
        };
        let mut bus = Bus::new(CaptureSender::default(), &config);
        bus.tick(0);
        assert!(bus.sender().sent.is_empty());
    }

    #[test]
    fn test_frame_routing() {
        let mut bus = Bus::new(CaptureSender::default(), &BusConfig::default());
        bus.pdos_mut()
            .register_receiver(
                CanId::std(0x385),
                PdoLayout::new(&[PdoMapping::new(0x6064, 0, 32)]).unwrap(),
            )
            .unwrap();
        let t = SdoTransaction::read(node(5), 0x6041, 0, 1000);
        bus.submit(&t).unwrap();
        bus.tick(0);

        bus.on_frame(
            &CanMessage::new(
                cob_id(SDO_RESP_BASE, 5),
                &SdoResponse::upload(0x6041, 0, &[0x40, 0x02]).to_bytes(),
            ),
            10,
        );
        assert!(t.is_received());

        bus.on_frame(&CanMessage::new(CanId::std(0x385), &42i32.to_le_bytes()), 20);
        let rx = bus.pdos().receiver(CanId::std(0x385)).unwrap();
        assert_eq!(Some(42), rx.signed(0x6064, 0));

        assert_eq!(None, bus.nmt_state(node(5)));
        bus.on_frame(&CanMessage::new(cob_id(HEARTBEAT_BASE, 5), &[0x7F]), 30);
        assert_eq!(Some(NmtState::PreOperational), bus.nmt_state(node(5)));
        assert_eq!(Some(30), bus.last_heartbeat_us(node(5)));

        // Malformed traffic never disturbs state
        bus.on_frame(&CanMessage::new(cob_id(HEARTBEAT_BASE, 5), &[0x33]), 40);
        bus.on_frame(&CanMessage::new(CanId::std(0x385), &[1]), 40);
        assert_eq!(Some(30), bus.last_heartbeat_us(node(5)));
        let rx = bus.pdos().receiver(CanId::std(0x385)).unwrap();
        assert_eq!(Some(20), rx.last_update_us());
    }

    #[test]
    fn test_send_nmt() {
        let mut bus = Bus::new(CaptureSender::default(), &BusConfig::default());
        bus.send_nmt(NmtCommandSpecifier::Start, Some(node(3)))
            .unwrap();
        bus.send_nmt(NmtCommandSpecifier::ResetComm, None).unwrap();
        let sent = &bus.sender().sent;
        assert_eq!(CanId::std(0), sent[0].id());
        assert_eq!(&[0x01, 0x03], sent[0].data());
        assert_eq!(&[0x82, 0x00], sent[1].data());
    }
}
