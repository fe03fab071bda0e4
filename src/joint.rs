/*!
	joints of a robot, on top of their [Drive]

	An actuated joint is moved by its drive. A passive joint only carries a drive to read an auxiliary absolute sensor wired to the drive's analog input, it cannot be commanded.

	Joint commands and readings never fail with an error: commands tell whether they were accepted, and readings carry a validity flag and NaN when invalid.
*/

use core::fmt;
use std::sync::{Arc, atomic::{AtomicBool, Ordering}};
use crate::drive::Drive;


/// value read from a joint, `value` is NaN when not `valid`
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct JointReading {
	pub value: f64,
	pub valid: bool,
}
impl JointReading {
	pub fn valid(value: f64) -> Self  {Self {value, valid: true}}
	pub fn invalid() -> Self  {Self {value: f64::NAN, valid: false}}
	/// the value if valid
	pub fn ok(self) -> Option<f64>  {if self.valid {Some(self.value)} else {None}}
}
impl<E> From<Result<f64, E>> for JointReading {
	fn from(result: Result<f64, E>) -> Self {
		match result {
			Ok(value) => Self::valid(value),
			Err(_) => Self::invalid(),
		}
	}
}

/// how a joint uses its drive
#[derive(Clone, Debug)]
pub enum JointKind {
	/// the drive moves the joint
	Actuated(Arc<Drive>),
	/// the drive only reads the joint position on its analog input
	Passive(Arc<Drive>),
}

pub struct Joint {
	name: String,
	enabled: AtomicBool,
	kind: JointKind,
}
impl Joint {
	/// enabled joint of the given kind
	pub fn new(name: impl Into<String>, kind: JointKind) -> Self {
		Self {name: name.into(), enabled: AtomicBool::new(true), kind}
	}
	pub fn actuated(name: impl Into<String>, drive: Arc<Drive>) -> Self  {Self::new(name, JointKind::Actuated(drive))}
	pub fn passive(name: impl Into<String>, drive: Arc<Drive>) -> Self  {Self::new(name, JointKind::Passive(drive))}

	pub fn name(&self) -> &str  {&self.name}
	pub fn kind(&self) -> &JointKind  {&self.kind}
	pub fn drive(&self) -> &Arc<Drive> {
		match &self.kind {
			JointKind::Actuated(drive) | JointKind::Passive(drive) => drive,
		}
	}
	pub fn is_passive(&self) -> bool  {matches!(self.kind, JointKind::Passive(_))}
	pub fn is_enabled(&self) -> bool  {self.enabled.load(Ordering::SeqCst)}
	/// a disabled joint refuses commands and gives invalid readings
	pub fn set_enabled(&self, enabled: bool)  {self.enabled.store(enabled, Ordering::SeqCst)}

	/// drive of an enabled actuated joint
	fn actuator(&self) -> Option<&Drive> {
		match &self.kind {
			JointKind::Actuated(drive) if self.is_enabled() => Some(drive),
			_ => None,
		}
	}

	/// move to a position (rad) at the drive's maximum velocity, true if the command was accepted
	pub fn command_position_rad(&self, position: f64) -> bool {
		let Some(drive) = self.actuator()  else {return false};
		let velocity = drive.drive_param().max_velocity;
		accepted(&self.name, drive.position_command_rad(position, velocity))
	}
	/// rotate at a velocity (rad/s), true if the command was accepted
	pub fn command_velocity_rad_sec(&self, velocity: f64) -> bool {
		let Some(drive) = self.actuator()  else {return false};
		accepted(&self.name, drive.velocity_command_rad_s(velocity))
	}
	/// apply a torque (N.m), true if the command was accepted
	pub fn command_torque_nm(&self, torque: f64) -> bool {
		let Some(drive) = self.actuator()  else {return false};
		accepted(&self.name, drive.torque_command_nm(torque))
	}

	pub fn read_position_rad(&self) -> JointReading {
		if ! self.is_enabled()
			{return JointReading::invalid()}
		match &self.kind {
			JointKind::Actuated(drive) => drive.position_rad().into(),
			JointKind::Passive(drive) => drive.auxiliary_position_rad().into(),
		}
	}
	pub fn read_velocity_rad_sec(&self) -> JointReading {
		if ! self.is_enabled()
			{return JointReading::invalid()}
		match &self.kind {
			JointKind::Actuated(drive) => drive.velocity_rad_s().into(),
			// the auxiliary sensor gives no velocity, a passive joint is considered still
			JointKind::Passive(_) => JointReading::valid(0.),
		}
	}
	pub fn read_torque_nm(&self) -> JointReading {
		match &self.kind {
			JointKind::Actuated(drive) if self.is_enabled() => drive.torque_nm().into(),
			_ => JointReading::invalid(),
		}
	}
}

fn accepted<E: fmt::Display>(joint: &str, result: Result<(), E>) -> bool {
	match result {
		Ok(()) => true,
		Err(error) => {
			log::warn!("joint {} command refused: {}", joint, error);
			false
		},
	}
}

impl fmt::Debug for Joint {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		f.debug_struct("Joint")
			.field("name", &self.name)
			.field("enabled", &self.is_enabled())
			.field("kind", &self.kind)
			.finish()
	}
}


#[cfg(test)]
mod tests {
	use super::*;
	use crate::{config::DriveConfig, param::DriveParam};

	fn drive() -> Arc<Drive> {
		Arc::new(Drive::new("test", 1, DriveConfig::default(), DriveParam::default()).unwrap())
	}

	#[test]
	fn readings() {
		assert_eq!(JointReading::from(Ok::<_, ()>(1.5)), JointReading::valid(1.5));
		let invalid = JointReading::from(Err::<f64, _>(()));
		assert!(! invalid.valid && invalid.value.is_nan());
		assert_eq!(invalid.ok(), None);
	}

	#[test]
	fn passive_commands() {
		let joint = Joint::passive("wrist", drive());
		assert!(joint.is_passive());
		assert!(! joint.command_position_rad(0.));
		assert!(! joint.command_velocity_rad_sec(0.));
		assert!(! joint.command_torque_nm(0.));
		assert!(! joint.read_torque_nm().valid);
		assert_eq!(joint.read_velocity_rad_sec(), JointReading::valid(0.));
		joint.set_enabled(false);
		assert!(! joint.read_velocity_rad_sec().valid);
	}

	#[test]
	fn unattached_drive() {
		// the drive has no process data yet
		let joint = Joint::actuated("shoulder", drive());
		assert!(! joint.command_position_rad(1.));
		assert!(! joint.read_position_rad().valid);
		assert!(joint.read_position_rad().value.is_nan());
	}
}
