use integration_tests::prelude::*;

fn node(id: u8) -> NodeId {
    NodeId::new(id).unwrap()
}

#[test]
fn test_full_lifecycle() {
    init_logging();
    let config = fleet_config(&["driving", "steering", "driving"], 4);
    let mut fleet = TestFleet::new(&config);
    let _logger = BusLogger::new(&fleet.sim);

    assert_eq!(StateId::Init, fleet.state());
    fleet.run_until(StateId::Homing, 100);
    for id in 1..=3 {
        assert_eq!(Some(NmtState::Operational), fleet.bus.nmt_state(node(id)));
        assert_eq!(NmtState::Operational, fleet.sim.node(id).nmt_state());
    }
    fleet.run_until(StateId::Stop, 100);
    for id in 1..=3 {
        assert!(fleet.sim.node(id).is_homed());
    }

    // Stop waits for an operator event, with the drives disabled after homing
    fleet.run(10);
    assert_eq!(StateId::Stop, fleet.state());
    for id in 1..=3 {
        let node = fleet.sim.node(id);
        assert!(node.is_homed());
        assert_eq!(PowerState::SwitchedOn, node.power_state());
    }

    assert_eq!(
        EventResult::Transitioned(StateId::Starting),
        fleet.event(Event::Starting)
    );
    fleet.run_until(StateId::Drive, 100);
    for id in 1..=3 {
        assert_eq!(PowerState::OperationEnabled, fleet.sim.node(id).power_state());
    }
    assert_eq!(
        Some(PowerState::OperationEnabled),
        fleet.device(0).power_state()
    );

    fleet.supervisor.set_velocities(&[1.0, 0.0, -1.0]);
    fleet.run(3);
    assert_eq!(1000, fleet.sim.node(1).target_velocity());
    assert_eq!(0, fleet.sim.node(2).target_velocity());
    assert_eq!(-1000, fleet.sim.node(3).target_velocity());
    assert_eq!(Some(1.0), fleet.device(0).get_velocity(&fleet.bus));
    assert_eq!(Some(-1.0), fleet.device(2).get_velocity(&fleet.bus));

    assert_eq!(
        EventResult::Transitioned(StateId::Stopping),
        fleet.event(Event::Stopping)
    );
    fleet.run_until(StateId::Stop, 100);
    for id in 1..=3 {
        let node = fleet.sim.node(id);
        assert_eq!(PowerState::SwitchedOn, node.power_state());
        assert_eq!(0, node.target_velocity());
    }
}

#[test]
fn test_muted_device_holds_init_until_emergency_stop() {
    init_logging();
    let config = fleet_config(&["driving", "steering"], 2);
    let mut fleet = TestFleet::new(&config);
    fleet.sim.node(2).set_muted(true);

    fleet.run(60);
    assert_eq!(StateId::Init, fleet.state());
    assert_eq!(
        EventResult::Info(StateInfo {
            state: StateId::Init,
            devices_remaining: Some(1),
        }),
        fleet.event(Event::StateInfo)
    );
    assert_eq!(PowerState::ReadyToSwitchOn, fleet.sim.node(1).power_state());

    assert_eq!(
        EventResult::Transitioned(StateId::Fault),
        fleet.event(Event::EmergencyStop)
    );
    fleet.run(5);
    assert_eq!(StateId::Fault, fleet.state());
    assert_eq!(Some(0.0), fleet.device(0).commanded_velocity(&fleet.bus));

    // Once the node answers again, a reset brings the whole fleet up
    fleet.sim.node(2).set_muted(false);
    assert_eq!(
        EventResult::Transitioned(StateId::Init),
        fleet.event(Event::Reseting)
    );
    fleet.run_until(StateId::Stop, 1000);
    assert!(fleet.sim.node(2).is_homed());
}

#[test]
fn test_emergency_stop_while_driving() {
    let config = fleet_config(&["driving", "driving"], 4);
    let mut fleet = TestFleet::new(&config);
    fleet.run_until(StateId::Stop, 100);
    fleet.event(Event::Starting);
    fleet.run_until(StateId::Drive, 100);
    fleet.supervisor.set_velocities(&[2.0, 2.0]);
    fleet.run(3);
    assert_eq!(2000, fleet.sim.node(1).target_velocity());

    assert_eq!(
        EventResult::Transitioned(StateId::Fault),
        fleet.event(Event::EmergencyStop)
    );
    fleet.run(10);
    for id in 1..=2 {
        let node = fleet.sim.node(id);
        assert_eq!(0, node.target_velocity());
        assert_eq!(PowerState::SwitchedOn, node.power_state());
    }

    // Operator events other than Reseting are ignored in Fault
    assert_eq!(EventResult::Discarded, fleet.event(Event::Starting));
    assert_eq!(EventResult::Discarded, fleet.event(Event::Stopping));
    assert_eq!(StateId::Fault, fleet.state());
}

#[test]
fn test_motor_test_modes() {
    let config = fleet_config(&["driving", "steering"], 4);
    let mut fleet = TestFleet::new(&config);
    fleet.run_until(StateId::Stop, 100);

    fleet.supervisor.set_drive_mode(DriveMode::TestDrivingMotor);
    fleet.event(Event::Starting);
    fleet.run_until(StateId::DriveTestDrivingMotor, 100);
    fleet.run(2);
    assert_eq!(500, fleet.sim.node(1).target_velocity());
    assert_eq!(0, fleet.sim.node(2).target_velocity());

    fleet.event(Event::Stopping);
    fleet.run_until(StateId::Stop, 100);

    fleet.supervisor.set_drive_mode(DriveMode::TestSteeringMotor);
    fleet.event(Event::Starting);
    fleet.run_until(StateId::DriveTestSteeringMotor, 100);
    fleet.run(2);
    assert_eq!(0, fleet.sim.node(1).target_velocity());
    assert_eq!(500, fleet.sim.node(2).target_velocity());
}

#[test]
fn test_drive_fault_cleared_by_enable_then_terminate() {
    init_logging();
    let config = fleet_config(&["steering"], 1);
    let mut fleet = TestFleet::new(&config);
    fleet.run_until(StateId::Stop, 200);

    // A drive fault is cleared by the enable sequence
    fleet.sim.node(1).trip();
    fleet.event(Event::Starting);
    fleet.run_until(StateId::Drive, 200);

    fleet.event(Event::TerminateSM);
    assert!(fleet.supervisor.is_terminated());
    assert_eq!(EventResult::Discarded, fleet.event(Event::EmergencyStop));
    assert_eq!(StateId::Drive, fleet.state());
}
