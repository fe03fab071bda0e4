mod sim;

use core::time::Duration;
use std::sync::Arc;
use etherdrive::{
	Master, Drive, DriveParam, DriveState, OperationMode, EthercatError,
	pdo::rx,
	};
use sim::{SimBus, config, drive_config, init_logger, setup, wait_for};


#[test]
fn configuration() {
	let (_master, _drives, sim) = setup(1, drive_config());
	// mapping objects and their assignment
	assert_eq!(sim.object(1, 0x1c12, 0), Some(vec![1]));
	assert_eq!(sim.object(1, 0x1c12, 1), Some(0x1600u16.to_le_bytes().to_vec()));
	assert_eq!(sim.object(1, 0x1c13, 1), Some(0x1a00u16.to_le_bytes().to_vec()));
	assert_eq!(sim.object(1, 0x1600, 0), Some(vec![6]));
	assert_eq!(sim.object(1, 0x1600, 1), Some(0x6040_0010u32.to_le_bytes().to_vec()));
	assert_eq!(sim.object(1, 0x1a00, 6), Some(0x2205_0110u32.to_le_bytes().to_vec()));
	// quick stop option, profile limits and mode
	assert_eq!(sim.object(1, 0x605a, 0), Some(6i16.to_le_bytes().to_vec()));
	assert_eq!(sim.object(1, 0x607f, 0), Some(4096u32.to_le_bytes().to_vec()));
	assert_eq!(sim.object(1, 0x6085, 0), Some(8192u32.to_le_bytes().to_vec()));
	assert_eq!(sim.object(1, 0x6060, 0), Some(vec![8]));
}

#[test]
fn unsupported_mode() {
	init_logger();
	let (bus, sim) = SimBus::new(1);
	let master = Master::with_bus(Box::new(bus), 1, config());
	let drive = Arc::new(Drive::new("homing", 1, drive_config().with_mode(OperationMode::Homing), DriveParam::default()).unwrap());
	master.register_device(drive.clone()).unwrap();
	assert!(master.initialize().is_err());
	assert!(! master.is_initialized());
	assert!(! sim.is_open());
}

#[test]
fn init_and_shutdown() {
	let (_master, drives, sim) = setup(1, drive_config());
	let drive = &drives[0];
	assert!(! drive.is_initialized());
	drive.init().unwrap();
	assert!(drive.is_initialized());
	assert_eq!(drive.drive_state().unwrap(), DriveState::OperationEnabled);
	assert_eq!(sim.drive(1).state, DriveState::OperationEnabled);
	assert_eq!(drive.operation_mode_display().unwrap(), OperationMode::CyclicSyncPosition);
	// the drive holds its position once enabled
	assert_eq!(sim.drive(1).position, 1000);
	assert!(! drive.is_error().unwrap());

	// idempotent
	drive.init().unwrap();

	drive.shutdown().unwrap();
	assert!(! drive.is_initialized());
	assert_eq!(drive.drive_state().unwrap(), DriveState::SwitchOnDisabled);
}

#[test]
fn startup_stuck() {
	init_logger();
	let (bus, sim) = SimBus::new(1);
	let master = Master::with_bus(Box::new(bus), 1, config());
	let drive = Arc::new(Drive::new("stuck", 1, drive_config().with_retries(10), DriveParam::default()).unwrap());
	master.register_device(drive.clone()).unwrap();
	master.initialize().unwrap();
	sim.set_stuck(1, true);

	assert!(matches!(drive.init(), Err(EthercatError::Timeout(_))));
	assert!(! drive.is_initialized());
	assert_eq!(drive.drive_state().unwrap(), DriveState::SwitchOnDisabled);
}

#[test]
fn cyclic_position() {
	let (_master, drives, sim) = setup(1, drive_config());
	let drive = &drives[0];
	drive.init().unwrap();

	drive.position_command_rad(1.5, 0.).unwrap();
	let expected = drive.drive_param().position_to_counts(1.5).unwrap();
	assert!(wait_for(Duration::from_secs(1), || sim.drive(1).position == expected));
	assert!(wait_for(Duration::from_secs(1), || drive.check_target_reached().unwrap()));
	let increment = 1. / drive.drive_param().position_factor();
	assert!((drive.position_rad().unwrap() - 1.5).abs() <= increment);
}

#[test]
fn profile_position() {
	let (master, drives, sim) = setup(1, drive_config().with_mode(OperationMode::ProfilePosition));
	let drive = &drives[0];
	drive.init().unwrap();
	let param = drive.drive_param();

	drive.position_command_rad(1., 2.).unwrap();
	assert!(wait_for(Duration::from_secs(1), || sim.drive(1).position == param.position_to_counts(1.).unwrap()));
	let control = rx::control.get(&master.outputs(1).unwrap());
	assert!(control.new_setpoint() && control.change_immediately());

	// the set-point bit must toggle for a second command to be taken
	drive.position_command_rad(-0.5, 2.).unwrap();
	assert!(wait_for(Duration::from_secs(1), || sim.drive(1).position == param.position_to_counts(-0.5).unwrap()));

	// a set-point is only executed on demand
	drive.position_set_point_rad(0.25, 2.).unwrap();
	std::thread::sleep(Duration::from_millis(10));
	assert_eq!(sim.drive(1).position, param.position_to_counts(-0.5).unwrap());
	drive.command_set_point().unwrap();
	assert!(wait_for(Duration::from_secs(1), || sim.drive(1).position == param.position_to_counts(0.25).unwrap()));
	assert_eq!(drive.operation_mode(), OperationMode::ProfilePosition);
}

#[test]
fn velocity_and_torque() {
	let (master, drives, sim) = setup(1, drive_config());
	let drive = &drives[0];
	drive.init().unwrap();
	let param = drive.drive_param();

	drive.velocity_command_rad_s(2.).unwrap();
	assert_eq!(drive.operation_mode(), OperationMode::CyclicSyncVelocity);
	assert!(wait_for(Duration::from_secs(1), || sim.drive(1).velocity == param.velocity_to_counts(2.).unwrap()));
	assert!(wait_for(Duration::from_secs(1), || drive.operation_mode_display().unwrap() == OperationMode::CyclicSyncVelocity));
	assert!((drive.velocity_rad_s().unwrap() - 2.).abs() < 1e-2);

	// the drive halts until the set-point is commanded
	drive.velocity_set_point_rad_s(1.).unwrap();
	assert!(rx::control.get(&master.outputs(1).unwrap()).halt());
	assert!(wait_for(Duration::from_secs(1), || sim.drive(1).velocity == 0));
	drive.command_set_point().unwrap();
	assert!(! rx::control.get(&master.outputs(1).unwrap()).halt());
	assert!(wait_for(Duration::from_secs(1), || sim.drive(1).velocity == param.velocity_to_counts(1.).unwrap()));

	drive.torque_command_nm(0.5).unwrap();
	assert_eq!(drive.operation_mode(), OperationMode::CyclicSyncTorque);
	assert!(wait_for(Duration::from_secs(1), || sim.drive(1).torque == 500));
	assert!(wait_for(Duration::from_secs(1), || (drive.torque_nm().unwrap() - 0.5).abs() < 1e-9));
}

#[test]
fn fault_and_reset() {
	let (_master, drives, sim) = setup(1, drive_config());
	let drive = &drives[0];
	drive.init().unwrap();

	sim.fault(1);
	assert!(wait_for(Duration::from_secs(1), || drive.is_error().unwrap()));
	assert!(drive.error().unwrap().fault());
	assert_eq!(drive.drive_state().unwrap(), DriveState::Fault);
	match drive.startup() {
		Err(EthercatError::Slave(faults)) => assert!(faults.fault()),
		other => panic!("startup in fault returned {:?}", other),
	}

	drive.reset().unwrap();
	assert_eq!(drive.drive_state().unwrap(), DriveState::OperationEnabled);
	assert!(! drive.is_error().unwrap());
}

#[test]
fn emergency_stop() {
	let (_master, drives, _sim) = setup(1, drive_config());
	let drive = &drives[0];
	drive.init().unwrap();

	drive.set_emergency_stop().unwrap();
	assert!(drive.is_emergency_stopped());
	assert_eq!(drive.drive_state().unwrap(), DriveState::QuickStopActive);
	assert!(drive.error().unwrap().quick_stop());
	// commands do not release the stop
	drive.position_command_rad(0.1, 0.).unwrap();
	std::thread::sleep(Duration::from_millis(10));
	assert_eq!(drive.drive_state().unwrap(), DriveState::QuickStopActive);

	drive.reset_emergency_stop().unwrap();
	assert!(! drive.is_emergency_stopped());
	assert_eq!(drive.drive_state().unwrap(), DriveState::OperationEnabled);
}

#[test]
fn emergency_stop_disabled() {
	let (_master, drives, _sim) = setup(1, drive_config());
	let drive = &drives[0];
	drive.init().unwrap();
	drive.shutdown().unwrap();

	// a disabled drive stays disabled
	drive.set_emergency_stop().unwrap();
	assert_eq!(drive.drive_state().unwrap(), DriveState::SwitchOnDisabled);
	drive.reset_emergency_stop().unwrap();
	assert_eq!(drive.drive_state().unwrap(), DriveState::SwitchOnDisabled);
}

#[test]
fn parameters() {
	let (_master, drives, _sim) = setup(1, drive_config());
	let drive = &drives[0];
	let param = DriveParam::default().with_gear_ratio(50.).with_direction(true);
	drive.set_drive_param(param).unwrap();
	assert_eq!(drive.drive_param(), param);
	assert!(drive.set_drive_param(DriveParam::default().with_gear_ratio(0.)).is_err());
	assert_eq!(drive.drive_param(), param);
}

#[test]
fn invalid_calibration() {
	let param = DriveParam {encoder_resolution: 0, .. DriveParam::default()};
	assert!(Drive::new("uncalibrated", 1, drive_config(), param).is_err());
	assert!(Drive::new("geared", 1, drive_config(), DriveParam::default().with_gear_ratio(f64::NAN)).is_err());
}

#[test]
fn unrepresentable_commands() {
	let (_master, drives, sim) = setup(1, drive_config());
	let drive = &drives[0];
	drive.init().unwrap();
	let position = sim.drive(1).position;

	assert!(drive.position_command_rad(f64::NAN, 0.).is_err());
	assert!(drive.position_command_rad(0.5, f64::INFINITY).is_err());
	assert!(drive.position_command_rad(1e9, 0.).is_err());
	assert!(drive.torque_command_nm(1e6).is_err());
	assert!(drive.velocity_command_rad_s(f64::NAN).is_err());
	// a refused command changes neither the mode nor the targets
	assert_eq!(drive.operation_mode(), OperationMode::CyclicSyncPosition);
	std::thread::sleep(Duration::from_millis(10));
	assert_eq!(sim.drive(1).position, position);
	assert_eq!(drive.drive_state().unwrap(), DriveState::OperationEnabled);
}
