mod sim;

use core::time::Duration;
use std::sync::Arc;
use etherdrive::{
	Master, Drive, DriveParam, AlState, AlError, EthercatError, SdoAbortCode,
	sdo::cia402,
	};
use sim::{SimBus, config, drive_config, init_logger, setup, wait_for};


fn drive(slave: u16) -> Arc<Drive> {
	Arc::new(Drive::new(format!("joint{}", slave), slave, drive_config(), DriveParam::default()).unwrap())
}

#[test]
fn initialize_and_shutdown() {
	let (master, _drives, sim) = setup(2, drive_config());
	assert!(master.is_initialized());
	assert_eq!(master.slave_count(), 2);
	assert_eq!(master.expected_working_counter(), 6);
	assert_eq!(sim.al_state(1), AlState::Operational);
	assert_eq!(sim.al_state(2), AlState::Operational);

	master.wait_cycles(5, Duration::from_secs(1)).unwrap();
	assert_eq!(master.last_working_counter(), 6);
	assert!(master.slave_states().iter().all(|health| health.state == AlState::Operational && ! health.lost));
	assert_eq!(master.inputs(1).unwrap().len(), 15);
	assert_eq!(master.outputs(2).unwrap().len(), 14);

	// initializing again does nothing
	master.initialize().unwrap();

	master.shutdown();
	assert!(! master.is_initialized());
	assert!(! sim.is_open());
	assert_eq!(sim.al_state(1), AlState::Init);
	// the cyclic thread is joined, no exchange happens anymore
	let exchanges = sim.exchanges();
	std::thread::sleep(Duration::from_millis(10));
	assert_eq!(sim.exchanges(), exchanges);

	master.shutdown();
	assert!(! master.is_initialized());
	assert!(master.process_data(1).is_err());
}

#[test]
fn slave_count_mismatch() {
	init_logger();
	let (bus, sim) = SimBus::new(2);
	let master = Master::with_bus(Box::new(bus), 3, config());
	assert!(master.initialize().is_err());
	assert!(! master.is_initialized());
	assert!(! sim.is_open());
	assert!(master.process_data(1).is_err());
}

#[test]
fn open_failure() {
	init_logger();
	let (bus, sim) = SimBus::new(1);
	sim.fail_open();
	let master = Master::with_bus(Box::new(bus), 1, config());
	assert!(matches!(master.initialize(), Err(EthercatError::Io(_))));
	assert!(! master.is_initialized());
}

#[test]
fn registration() {
	init_logger();
	let (bus, _sim) = SimBus::new(2);
	let master = Master::with_bus(Box::new(bus), 2, config());
	assert!(master.register_device(drive(0)).is_err());
	master.register_device(drive(1)).unwrap();
	assert!(master.register_device(drive(1)).is_err());
	assert_eq!(master.devices(), 1);

	master.initialize().unwrap();
	assert!(master.register_device(drive(2)).is_err());
	assert_eq!(master.devices(), 1);
	assert_eq!(master.slave_count(), 2);
}

#[test]
fn device_beyond_segment() {
	init_logger();
	let (bus, sim) = SimBus::new(2);
	let master = Master::with_bus(Box::new(bus), 2, config());
	master.register_device(drive(3)).unwrap();
	assert!(master.initialize().is_err());
	assert!(! master.is_initialized());
	assert!(! sim.is_open());
}

#[test]
fn operational_refused() {
	init_logger();
	let (bus, sim) = SimBus::new(2);
	sim.refuse_operational();
	let master = Master::with_bus(Box::new(bus), 2, config());
	let first = drive(1);
	master.register_device(first.clone()).unwrap();
	assert!(matches!(master.initialize(), Err(EthercatError::Timeout(_))));
	assert!(! master.is_initialized());
	assert!(! sim.is_open());
	// the drive was attached before the failure, it must not keep the dead image
	assert!(first.drive_state().is_err());
	assert!(first.position_command_rad(0.1, 0.).is_err());
	let requests = sim.actions().into_iter()
		.filter(|action| action.starts_with("request 0 OPERATIONAL"))
		.count();
	assert_eq!(requests, 1);
}

#[test]
fn shutdown_detaches_devices() {
	let (master, drives, _sim) = setup(1, drive_config());
	let drive = &drives[0];
	drive.init().unwrap();
	let data = master.process_data(1).unwrap();

	master.shutdown();
	assert!(! drive.is_initialized());
	assert!(drive.position_command_rad(0.5, 0.).is_err());
	assert!(drive.drive_state().is_err());
	assert!(! data.is_valid());
	assert!(data.inputs().is_err());

	// a new initialization gives the drive a new image
	master.initialize().unwrap();
	drive.init().unwrap();
	assert_eq!(drive.drive_state().unwrap(), etherdrive::DriveState::OperationEnabled);
}

#[test]
fn service_data() {
	let (master, _drives, sim) = setup(1, drive_config());
	master.write_service_data(1, 0x6060, 0, 9i8).unwrap();
	assert_eq!(master.read_service_data::<i8>(1, 0x6060, 0).unwrap(), 9);
	assert_eq!(master.read_object(1, cia402::modes::SUPPORTED).unwrap(), 0x038d);
	assert_eq!(sim.object(1, 0x6060, 0), Some(vec![9]));

	assert!(matches!(
		master.read_service_data::<u32>(1, 0x2000, 3),
		Err(EthercatError::Slave(SdoAbortCode::INVALID_INDEX)),
		));
	// no slave answers at this address
	assert!(master.write_service_data(7, 0x6060, 0, 1i8).is_err());
}

#[test]
fn recovery_of_one_slave() {
	let (master, _drives, sim) = setup(3, drive_config());
	master.wait_cycles(3, Duration::from_secs(1)).unwrap();
	sim.clear_actions();

	sim.set_al_state(2, AlState::SafeOperational);
	assert!(wait_for(Duration::from_secs(1), || sim.al_state(2) == AlState::Operational));
	master.wait_cycles(3, Duration::from_secs(1)).unwrap();
	assert_eq!(master.last_working_counter(), master.expected_working_counter());
	assert_eq!(sim.actions(), vec!["request 2 OPERATIONAL".to_string()]);
}

#[test]
fn reconfiguration_after_reset() {
	let (master, _drives, sim) = setup(2, drive_config());
	master.wait_cycles(3, Duration::from_secs(1)).unwrap();
	sim.clear_actions();

	// the slave was power cycled and lost its configuration
	sim.set_al_state(1, AlState::Init);
	assert!(wait_for(Duration::from_secs(1), || sim.al_state(1) == AlState::Operational));
	let actions = sim.actions();
	assert_eq!(actions[0], "reconfigure 1");
	assert!(actions.contains(&"request 1 OPERATIONAL".to_string()));
	assert!(actions.iter().all(|action| ! action.contains(" 2")));
}

#[test]
fn lost_slave() {
	let (master, _drives, sim) = setup(2, drive_config());
	master.wait_cycles(3, Duration::from_secs(1)).unwrap();

	sim.set_lost(2, true);
	assert!(wait_for(Duration::from_secs(1), || master.slave_states()[1].lost));
	assert!(master.last_working_counter() < master.expected_working_counter());

	// the slave answers again, it is given back its address and configured
	sim.clear_actions();
	sim.set_lost(2, false);
	assert!(wait_for(Duration::from_secs(1), || sim.al_state(2) == AlState::Operational));
	assert!(wait_for(Duration::from_secs(1), || ! master.slave_states()[1].lost));
	assert!(sim.actions().contains(&"reconfigure 2".to_string()));
}

#[test]
fn cycle_continues_while_slave_lost() {
	init_logger();
	let (bus, sim) = SimBus::new(2);
	// a long state timeout must not slow the cyclic exchange down
	let master = Master::with_bus(Box::new(bus), 2, config().with_state_timeout(Duration::from_secs(2)));
	master.initialize().unwrap();
	master.wait_cycles(3, Duration::from_secs(1)).unwrap();

	sim.set_lost(2, true);
	assert!(wait_for(Duration::from_secs(1), || master.slave_states()[1].lost));
	let start = master.cycles();
	std::thread::sleep(Duration::from_millis(200));
	assert!(master.cycles() - start > 50, "{} cycles in 200ms", master.cycles() - start);
	assert!(sim.actions().contains(&"recover 2".to_string()));
}

#[test]
fn safe_operational_error_acknowledged() {
	let (master, _drives, sim) = setup(3, drive_config());
	master.wait_cycles(3, Duration::from_secs(1)).unwrap();
	assert_eq!(master.last_working_counter(), master.expected_working_counter());
	sim.clear_actions();

	// only the working counter reveals the fallback, no check is pending
	sim.set_error(2, AlState::SafeOperational, AlError::SYNC_WATCHDOG);
	assert!(wait_for(Duration::from_secs(1), || sim.al_state(2) == AlState::Operational));
	master.wait_cycles(3, Duration::from_secs(1)).unwrap();
	assert_eq!(master.last_working_counter(), master.expected_working_counter());
	assert_eq!(sim.actions(), vec![
		"request 2 SAFE_OP ack".to_string(),
		"request 2 OPERATIONAL".to_string(),
		]);
	assert!(master.slave_states().iter().all(|health| health.state == AlState::Operational));
}
