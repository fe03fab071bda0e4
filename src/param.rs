//! calibration of a drive, converting engineering units at the joint into the drive's wire units

use core::f64::consts::TAU;
use crate::error::{EthercatError, EthercatResult};


/**
	parameters of a drive and the mechanics behind it

	Positions are in radians at the joint output, velocities in rad/s, torques in N.m. The drive works in encoder counts at the motor side, and torques in per-mille of the motor rated torque.
*/
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DriveParam {
	/// encoder counts per motor revolution
	pub encoder_resolution: u32,
	/// motor revolutions per joint revolution
	pub gear_ratio: f64,
	/// `1.` or `-1.`, flips the direction of the joint relatively to the motor
	pub direction: f64,
	/// motor rated torque (N.m), reference of the torque per-mille values
	pub rated_torque: f64,
	/// motor rated current (A)
	pub rated_current: f64,
	/// maximum joint velocity (rad/s), used for profile limits and position commands
	pub max_velocity: f64,
	/// maximum joint acceleration (rad/s²), used for profile limits
	pub max_acceleration: f64,
	/// radians per unit of the analog input, for an auxiliary absolute sensor
	pub auxiliary_scale: f64,
	/// radians added after scaling the analog input
	pub auxiliary_offset: f64,
}
impl Default for DriveParam {
	fn default() -> Self {
		Self {
			encoder_resolution: 4096,
			gear_ratio: 1.,
			direction: 1.,
			rated_torque: 1.,
			rated_current: 1.,
			max_velocity: TAU,
			max_acceleration: 2.*TAU,
			auxiliary_scale: TAU / 65536.,
			auxiliary_offset: 0.,
		}
	}
}
impl DriveParam {
	pub fn with_encoder_resolution(mut self, counts: u32) -> Self  {self.encoder_resolution = counts; self}
	pub fn with_gear_ratio(mut self, ratio: f64) -> Self  {self.gear_ratio = ratio; self}
	/// `inverted` flips the joint direction relatively to the motor
	pub fn with_direction(mut self, inverted: bool) -> Self  {self.direction = if inverted {-1.} else {1.}; self}
	pub fn with_rated_torque(mut self, torque: f64) -> Self  {self.rated_torque = torque; self}
	pub fn with_rated_current(mut self, current: f64) -> Self  {self.rated_current = current; self}
	pub fn with_max_velocity(mut self, velocity: f64) -> Self  {self.max_velocity = velocity; self}
	pub fn with_max_acceleration(mut self, acceleration: f64) -> Self  {self.max_acceleration = acceleration; self}
	pub fn with_auxiliary(mut self, scale: f64, offset: f64) -> Self {
		self.auxiliary_scale = scale;
		self.auxiliary_offset = offset;
		self
	}

	/// check the parameters allow conversions in both directions
	pub fn validate(&self) -> EthercatResult {
		if self.encoder_resolution == 0
			{return Err(EthercatError::Master("encoder resolution must not be null"))}
		if ! self.gear_ratio.is_normal()
			{return Err(EthercatError::Master("gear ratio must be a finite non-null number"))}
		if self.direction.abs() != 1.
			{return Err(EthercatError::Master("direction must be 1 or -1"))}
		if ! self.rated_torque.is_normal() || self.rated_torque < 0.
			{return Err(EthercatError::Master("rated torque must be positive"))}
		if ! (self.max_velocity > 0. && self.max_acceleration > 0.)
			|| ! (self.max_velocity.is_finite() && self.max_acceleration.is_finite())
			{return Err(EthercatError::Master("velocity and acceleration limits must be positive"))}
		Ok(())
	}

	/// encoder counts per joint radian
	pub fn position_factor(&self) -> f64 {
		self.direction * f64::from(self.encoder_resolution) * self.gear_ratio / TAU
	}
	/// counts/s per joint rad/s
	pub fn velocity_factor(&self) -> f64  {self.position_factor()}
	/// counts/s² per joint rad/s²
	pub fn acceleration_factor(&self) -> f64  {self.position_factor()}
	/// torque per-mille per joint N.m
	pub fn torque_factor(&self) -> f64 {
		self.direction * 1000. / (self.rated_torque * self.gear_ratio)
	}

	pub fn position_to_counts(&self, position: f64) -> EthercatResult<i32> {
		Ok(wire(position * self.position_factor(), i32::MIN.into(), i32::MAX.into())? as i32)
	}
	pub fn counts_to_position(&self, counts: i32) -> f64  {f64::from(counts) / self.position_factor()}
	pub fn velocity_to_counts(&self, velocity: f64) -> EthercatResult<i32> {
		Ok(wire(velocity * self.velocity_factor(), i32::MIN.into(), i32::MAX.into())? as i32)
	}
	pub fn counts_to_velocity(&self, counts: i32) -> f64  {f64::from(counts) / self.velocity_factor()}
	pub fn acceleration_to_counts(&self, acceleration: f64) -> EthercatResult<i32> {
		Ok(wire(acceleration * self.acceleration_factor(), i32::MIN.into(), i32::MAX.into())? as i32)
	}
	pub fn torque_to_per_mille(&self, torque: f64) -> EthercatResult<i16> {
		Ok(wire(torque * self.torque_factor(), i16::MIN.into(), i16::MAX.into())? as i16)
	}
	pub fn per_mille_to_torque(&self, torque: i16) -> f64  {f64::from(torque) / self.torque_factor()}
	/// joint position given by the auxiliary sensor wired to the analog input
	pub fn analog_to_position(&self, analog: i16) -> f64 {
		f64::from(analog) * self.auxiliary_scale + self.auxiliary_offset
	}

	/// profile velocity limit in counts/s, object 0x607f
	pub fn profile_velocity(&self) -> EthercatResult<u32>  {Ok(self.velocity_to_counts(self.max_velocity)?.unsigned_abs())}
	/// profile acceleration and deceleration in counts/s², objects 0x6083, 0x6084, 0x6085
	pub fn profile_acceleration(&self) -> EthercatResult<u32>  {Ok(self.acceleration_to_counts(self.max_acceleration)?.unsigned_abs())}
}

/// round a value in wire units, refusing what the drive cannot represent
fn wire(value: f64, min: f64, max: f64) -> EthercatResult<f64> {
	if ! value.is_finite()
		{return Err(EthercatError::Master("command is not a finite number"))}
	let value = value.round();
	if value < min || value > max
		{return Err(EthercatError::Master("command out of the drive range"))}
	Ok(value)
}


#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn round_trip() {
		let param = DriveParam::default()
			.with_encoder_resolution(1 << 17)
			.with_gear_ratio(101.)
			.with_direction(true);
		param.validate().unwrap();
		let increment = 1. / param.position_factor().abs();
		for position in [0., 0.1, -1.3, 3.14159, -6.2, 12.5] {
			let back = param.counts_to_position(param.position_to_counts(position).unwrap());
			assert!((back - position).abs() <= increment, "{} -> {}", position, back);
			let back = param.counts_to_velocity(param.velocity_to_counts(position).unwrap());
			assert!((back - position).abs() <= increment);
		}
		assert!(param.position_to_counts(1.).unwrap() < 0);
	}

	#[test]
	fn torque() {
		let param = DriveParam::default().with_rated_torque(2.).with_gear_ratio(10.);
		assert_eq!(param.torque_to_per_mille(20.).unwrap(), 1000);
		assert_eq!(param.torque_to_per_mille(-5.).unwrap(), -250);
		assert_eq!(param.per_mille_to_torque(500), 10.);
	}

	#[test]
	fn limits() {
		let param = DriveParam::default();
		assert_eq!(param.profile_velocity().unwrap(), 4096);
		assert_eq!(param.profile_acceleration().unwrap(), 8192);
		assert_eq!(param.analog_to_position(16384), TAU / 4.);
		assert!(DriveParam::default().with_gear_ratio(0.).validate().is_err());
		assert!(DriveParam {encoder_resolution: 0, .. DriveParam::default()}.validate().is_err());
	}

	#[test]
	fn unrepresentable() {
		let param = DriveParam::default();
		assert!(param.position_to_counts(f64::NAN).is_err());
		assert!(param.velocity_to_counts(f64::INFINITY).is_err());
		assert!(param.position_to_counts(1e9).is_err());
		assert!(param.torque_to_per_mille(1e6).is_err());
		assert!(param.torque_to_per_mille(-f64::NAN).is_err());
		// the bounds themselves are still representable
		assert_eq!(param.torque_to_per_mille(32.767).unwrap(), i16::MAX);
		assert!(DriveParam::default().with_max_velocity(f64::INFINITY).validate().is_err());
	}
}
