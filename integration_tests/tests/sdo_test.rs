use hdpc_common::{
    constants::object_ids,
    messages::{cob_id, SDO_RESP_BASE},
    sdo::SdoResponse,
};
use hdpc_master::{RawAbortCode, SdoManagerError};
use integration_tests::prelude::*;
use integration_tests::utils::pump;

const PERIOD_US: u64 = 10_000;

fn node(id: u8) -> NodeId {
    NodeId::new(id).unwrap()
}

fn setup(window: usize) -> (SimBus, Bus<SimBusSender>, SimBusReceiver) {
    let config = fleet_config(&["driving", "steering"], window);
    let sim = SimBus::new();
    sim.add_node(SimNode::new(1));
    sim.add_node(SimNode::new(2));
    let bus = Bus::new(sim.new_sender(), &config.bus);
    let rx = sim.new_receiver();
    (sim, bus, rx)
}

fn statusword_read(id: u8) -> SdoTransaction {
    SdoTransaction::read(node(id), object_ids::STATUSWORD, 0, 100_000)
}

#[test]
fn test_window_of_one_serializes_transactions() {
    init_logging();
    let (sim, mut bus, mut rx) = setup(1);
    let _logger = BusLogger::new(&sim);

    let a = statusword_read(1);
    let b = SdoTransaction::write(node(1), object_ids::CONTROLWORD, 0, &[0x06, 0x00], 100_000);
    let c = statusword_read(1);
    for t in [&a, &b, &c] {
        bus.submit(t).unwrap();
    }

    pump(&mut bus, &mut rx, 0);
    assert!(a.is_waiting());
    assert!(b.is_queued());
    assert_eq!(1, sim.sdo_requests(1).len());

    pump(&mut bus, &mut rx, PERIOD_US);
    assert!(a.is_received());
    assert!(b.is_waiting());
    assert!(c.is_queued());

    pump(&mut bus, &mut rx, 2 * PERIOD_US);
    pump(&mut bus, &mut rx, 3 * PERIOD_US);
    assert!(b.succeeded());
    assert!(c.is_received());

    // The read before the shutdown command sees Switch on disabled, the one after sees Ready to
    // switch on
    assert_eq!(Some(0x0040), a.data().and_then(|d| d.to_u16()));
    assert_eq!(Some(0x0021), c.data().and_then(|d| d.to_u16()));
    assert_eq!(3, sim.sdo_requests(1).len());
}

#[test]
fn test_window_limits_in_flight() {
    let (sim, mut bus, mut rx) = setup(3);
    sim.add_node(SimNode::new(3));
    sim.add_node(SimNode::new(4));
    let transactions: Vec<SdoTransaction> = [1, 2, 3, 4, 1]
        .into_iter()
        .map(statusword_read)
        .collect();
    for t in &transactions {
        bus.submit(t).unwrap();
    }

    pump(&mut bus, &mut rx, 0);
    assert_eq!(3, bus.sdo().in_flight_len());
    assert_eq!(2, bus.sdo().queued_len());
    assert_eq!(1, sim.sdo_requests(1).len());
    assert_eq!(0, sim.sdo_requests(4).len());

    pump(&mut bus, &mut rx, PERIOD_US);
    assert_eq!(2, sim.sdo_requests(1).len());
    assert_eq!(1, sim.sdo_requests(4).len());
    pump(&mut bus, &mut rx, 2 * PERIOD_US);
    assert!(transactions.iter().all(|t| t.is_received()));
}

#[test]
fn test_one_request_per_node_at_a_time() {
    let (sim, mut bus, mut rx) = setup(4);
    let reads: Vec<SdoTransaction> = [
        object_ids::STATUSWORD,
        object_ids::POSITION_ACTUAL,
        object_ids::VELOCITY_ACTUAL,
    ]
    .into_iter()
    .map(|index| SdoTransaction::read(node(1), index, 0, 100_000))
    .collect();
    for t in &reads {
        bus.submit(t).unwrap();
    }

    for (i, t) in reads.iter().enumerate() {
        pump(&mut bus, &mut rx, i as u64 * PERIOD_US);
        assert_eq!(1, bus.sdo().in_flight_len());
        assert!(t.is_waiting());
        assert_eq!(i + 1, sim.sdo_requests(1).len());
    }
    pump(&mut bus, &mut rx, 3 * PERIOD_US);
    assert!(reads.iter().all(|t| t.is_received()));
}

#[test]
fn test_muted_node_times_out_and_frees_the_window() {
    init_logging();
    let (sim, mut bus, mut rx) = setup(1);
    sim.node(1).set_muted(true);

    let a = statusword_read(1);
    let b = statusword_read(2);
    bus.submit(&a).unwrap();
    bus.submit(&b).unwrap();

    // Exactly at the timeout the transaction is still waiting
    let mut now = 0;
    while now <= 100_000 {
        pump(&mut bus, &mut rx, now);
        assert!(a.is_waiting());
        assert!(b.is_queued());
        now += PERIOD_US;
    }

    pump(&mut bus, &mut rx, now);
    assert!(a.has_timed_out());
    assert!(b.is_waiting());
    assert_eq!(None, a.data());

    pump(&mut bus, &mut rx, now + PERIOD_US);
    assert!(b.is_received());

    // Transactions are single use; a retry is a new transaction
    sim.node(1).set_muted(false);
    assert!(matches!(
        bus.submit(&a),
        Err(SdoManagerError::AlreadySubmitted)
    ));
    let retry = statusword_read(1);
    bus.submit(&retry).unwrap();
    pump(&mut bus, &mut rx, now + 2 * PERIOD_US);
    pump(&mut bus, &mut rx, now + 3 * PERIOD_US);
    assert!(retry.succeeded());
    assert!(a.has_timed_out());
}

#[test]
fn test_abort_responses() {
    let (_sim, mut bus, mut rx) = setup(2);
    let missing = SdoTransaction::read(node(1), 0x5000, 0, 100_000);
    let read_only =
        SdoTransaction::write(node(2), object_ids::STATUSWORD, 0, &[0, 0], 100_000);
    bus.submit(&missing).unwrap();
    bus.submit(&read_only).unwrap();
    assert!(matches!(
        bus.submit(&missing),
        Err(SdoManagerError::AlreadySubmitted)
    ));

    pump(&mut bus, &mut rx, 0);
    pump(&mut bus, &mut rx, PERIOD_US);

    assert!(missing.is_received());
    assert!(!missing.succeeded());
    assert_eq!(
        Some(RawAbortCode::Valid(AbortCode::NoSuchObject)),
        missing.abort_code()
    );
    assert_eq!(
        Some(RawAbortCode::Valid(AbortCode::ReadOnly)),
        read_only.abort_code()
    );
}

#[test]
fn test_unsolicited_and_foreign_responses_are_dropped() {
    init_logging();
    let (sim, mut bus, mut rx) = setup(1);
    sim.node(1).set_muted(true);
    let t = statusword_read(1);
    bus.submit(&t).unwrap();
    pump(&mut bus, &mut rx, 0);

    // A response from another node, a response for another object, and garbage
    sim.inject(CanMessage::new(
        cob_id(SDO_RESP_BASE, 2),
        &SdoResponse::upload(object_ids::STATUSWORD, 0, &[0x27, 0x00]).to_bytes(),
    ));
    sim.inject(CanMessage::new(
        cob_id(SDO_RESP_BASE, 1),
        &SdoResponse::upload(object_ids::CONTROLWORD, 0, &[0x0F, 0x00]).to_bytes(),
    ));
    sim.inject(CanMessage::new(cob_id(SDO_RESP_BASE, 1), &[0xFF]));
    pump(&mut bus, &mut rx, PERIOD_US);
    assert!(t.is_waiting());

    sim.inject(CanMessage::new(
        cob_id(SDO_RESP_BASE, 1),
        &SdoResponse::upload(object_ids::STATUSWORD, 0, &[0x27, 0x00]).to_bytes(),
    ));
    pump(&mut bus, &mut rx, 2 * PERIOD_US);
    assert!(t.is_received());
    assert_eq!(Some(0x0027), t.data().and_then(|d| d.to_u16()));
}

#[test]
fn test_capacity_bound() {
    let config = FleetConfig::load_from_str(
        r#"
        [bus]
        sdo_window = 1
        sdo_queue_capacity = 2
        "#,
    )
    .unwrap();
    let sim = SimBus::new();
    sim.add_node(SimNode::new(1));
    let mut bus = Bus::new(sim.new_sender(), &config.bus);
    let mut rx = sim.new_receiver();

    let t: Vec<SdoTransaction> = (0..3).map(|_| statusword_read(1)).collect();
    bus.submit(&t[0]).unwrap();
    bus.submit(&t[1]).unwrap();
    assert!(matches!(
        bus.submit(&t[2]),
        Err(SdoManagerError::CapacityExceeded { capacity: 2 })
    ));
    assert!(t[2].is_queued());

    // Completing a transaction makes room
    pump(&mut bus, &mut rx, 0);
    pump(&mut bus, &mut rx, PERIOD_US);
    assert!(t[0].is_received());
    bus.submit(&t[2]).unwrap();
}

#[test]
fn test_command_sequence_is_serialized() {
    init_logging();
    let config = fleet_config(&["driving"], 4);
    let sim = SimBus::new();
    sim.add_node(SimNode::new(1));
    let mut bus = Bus::new(sim.new_sender(), &config.bus);
    let mut rx = sim.new_receiver();
    let _logger = BusLogger::new(&sim);
    let mut device = Device::new(config.devices[0].clone());
    device.attach(&mut bus).unwrap();

    let controlword_requests = |sim: &SimBus| {
        sim.sdo_requests(1)
            .iter()
            .filter(|req| req.object() == (object_ids::CONTROLWORD, 0))
            .count()
    };

    device.enable(&mut bus).unwrap();
    pump(&mut bus, &mut rx, 0);
    // The mode write goes first, the controlwords wait their turn
    assert_eq!(1, bus.sdo().in_flight_len());
    assert_eq!(0, controlword_requests(&sim));

    let mut now = 0;
    while bus.sdo().queued_len() + bus.sdo().in_flight_len() > 0 {
        now += PERIOD_US;
        assert!(now < 100 * PERIOD_US, "SDO traffic did not settle");
        let before = controlword_requests(&sim);
        pump(&mut bus, &mut rx, now);
        assert!(controlword_requests(&sim) - before <= 1);
    }
    // Fault reset, shutdown, switch on, enable operation
    assert_eq!(4, controlword_requests(&sim));
    assert_eq!(PowerState::OperationEnabled, sim.node(1).power_state());
}
