//! run a servodrive back and forth on a real segment
//!
//!     cargo run --example servodrive -- eno1 1

use std::sync::Arc;
use core::time::Duration;
use etherdrive::{
	Master, Drive, DriveConfig, DriveParam, Joint, OperationMode,
	EthercatResult,
	};

fn main() -> EthercatResult {
	env_logger::init();
	let mut args = std::env::args().skip(1);
	let interface = args.next().unwrap_or_else(|| "eno1".into());
	let slaves = args.next().and_then(|count| count.parse().ok()).unwrap_or(1);

	let master = Master::new(&interface, slaves);
	let param = DriveParam::default()
		.with_encoder_resolution(1 << 17)
		.with_max_velocity(1.);
	let drive = Arc::new(Drive::new("axis", 1, DriveConfig::default().with_mode(OperationMode::CyclicSyncPosition), param)?);
	master.register_device(drive.clone())?;
	master.initialize()?;
	println!("{} slaves operational, working counter {}", master.slave_count(), master.expected_working_counter());

	drive.init().map_err(|error| error.forget("drive cannot start"))?;
	let joint = Joint::actuated("axis", drive.clone());
	let start = joint.read_position_rad().value;
	println!("initial position {:.4} rad", start);

	for step in 0 .. 2000 {
		let t = step as f64 * 5e-3;
		let target = start + 0.5 * (t * 0.5 * core::f64::consts::TAU).sin();
		if ! joint.command_position_rad(target)
			{break}
		if step % 100 == 0 {
			println!("target {:+.4}  position {:+.4}  torque {:+.3}  {}",
				target,
				joint.read_position_rad().value,
				joint.read_torque_nm().value,
				drive.status_word().map(|status| status.to_string()).unwrap_or_default(),
				);
		}
		std::thread::sleep(Duration::from_millis(5));
	}

	drive.shutdown().map_err(|error| error.forget("drive cannot stop"))?;
	master.shutdown();
	Ok(())
}
