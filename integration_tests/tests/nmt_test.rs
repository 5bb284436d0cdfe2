use hdpc_common::nmt::NmtCommandSpecifier;
use integration_tests::prelude::*;
use integration_tests::utils::pump;

#[test]
fn test_nmt_commands_and_heartbeats() {
    init_logging();
    let config = fleet_config(&["driving", "steering"], 1);
    let sim = SimBus::new();
    sim.add_node(SimNode::new(1));
    sim.add_node(SimNode::new(2));
    let mut bus = Bus::new(sim.new_sender(), &config.bus);
    let mut rx = sim.new_receiver();
    let _logger = BusLogger::new(&sim);
    let n1 = NodeId::new(1).unwrap();
    let n2 = NodeId::new(2).unwrap();

    // Nothing is known before the first heartbeat
    assert_eq!(None, bus.nmt_state(n1));
    sim.emit_heartbeats();
    pump(&mut bus, &mut rx, 0);
    assert_eq!(Some(NmtState::PreOperational), bus.nmt_state(n1));
    assert_eq!(Some(NmtState::PreOperational), bus.nmt_state(n2));

    // Broadcast start
    bus.send_nmt(NmtCommandSpecifier::Start, None).unwrap();
    assert_eq!(NmtState::Operational, sim.node(1).nmt_state());
    assert_eq!(NmtState::Operational, sim.node(2).nmt_state());
    pump(&mut bus, &mut rx, 10_000);
    assert_eq!(Some(NmtState::Operational), bus.nmt_state(n1));
    assert_eq!(Some(10_000), bus.last_heartbeat_us(n2));

    // Stop only node 2
    bus.send_nmt(NmtCommandSpecifier::Stop, Some(n2)).unwrap();
    pump(&mut bus, &mut rx, 20_000);
    assert_eq!(Some(NmtState::Operational), bus.nmt_state(n1));
    assert_eq!(Some(NmtState::Stopped), bus.nmt_state(n2));

    // A silent node keeps its last known state and time
    sim.node(1).set_muted(true);
    sim.emit_heartbeats();
    pump(&mut bus, &mut rx, 30_000);
    assert_eq!(Some(10_000), bus.last_heartbeat_us(n1));
    assert_eq!(Some(30_000), bus.last_heartbeat_us(n2));

    let nmt_frames: Vec<CanMessage> = sim
        .history()
        .into_iter()
        .filter(|m| m.id() == CanId::std(0))
        .collect();
    assert_eq!(2, nmt_frames.len());
    assert_eq!(&[0x01, 0x00], nmt_frames[0].data());
    assert_eq!(&[0x02, 0x02], nmt_frames[1].data());
}

#[test]
fn test_rejected_frames_are_retried() {
    let config = fleet_config(&["driving"], 1);
    let sim = SimBus::new();
    sim.add_node(SimNode::new(1));
    let mut bus = Bus::new(sim.new_sender(), &config.bus);
    let mut rx = sim.new_receiver();

    let t = SdoTransaction::read(NodeId::new(1).unwrap(), 0x6041, 0, 100_000);
    bus.submit(&t).unwrap();

    sim.set_sender_blocked(true);
    assert!(bus
        .send_nmt(NmtCommandSpecifier::Start, None)
        .is_err());
    pump(&mut bus, &mut rx, 0);
    assert!(t.is_queued());

    sim.set_sender_blocked(false);
    pump(&mut bus, &mut rx, 10_000);
    assert!(t.is_waiting());
    pump(&mut bus, &mut rx, 20_000);
    assert!(t.is_received());
}
