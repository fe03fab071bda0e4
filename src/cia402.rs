/*!
	CiA-402 device profile: control and status words of a servodrive, and the state machine they drive.

	The drive state is never stored, it is always decoded from the last status word received.

	```text
	                 power on
	                    |
	           Not Ready to Switch On
	                    |
	   +------> Switch On Disabled <---------------+-------------+
	   |                |   ^                      |             |
	   |      shutdown  |   | disable voltage      |             |  fault reset
	   |                v   |                      |             |
	   |       Ready to Switch On ---------+       |           Fault
	   |                |   ^              |       |             ^
	   |      switch on |   | shutdown     |       |             |
	   |                v   |              |       |   Fault Reaction Active
	   |           Switched On ------------+       |             ^
	   |                |   ^                      |             |
	   |        enable  |   | disable operation    |         (any state)
	   |                v   |                      |
	   |        Operation Enabled -----> Quick Stop Active
	   |                                   quick stop
	   +-- disable voltage
	```
*/

use crate::data;
use core::fmt;
use bilge::prelude::*;


/**
bit structure of a status word

| Bit |  Meaning | Presence |
|-----|----------|----------|
| 0	| Ready to switch on	| M
| 1	| Switched on	| M
| 2	| Operation enabled	| M
| 3	| Fault	| M
| 4	| Voltage enabled	| O
| 5	| Quick stop	| O
| 6	| Switch on disabled	| M
| 7	| Warning	| O
| 8	| Manufacturer specific	| O
| 9	| Remote	| O
| 10	| Target reached	| O
| 11	| Internal limit active	| C
| 12	| Operation mode specific (set-point acknowledge)	| O
| 13	| Operation mode specific (following error)	| O
| 14-15	| Manufacturer specific	| O
*/
#[bitsize(16)]
#[derive(FromBits, DebugBits, Copy, Clone, Eq, PartialEq)]
pub struct StatusWord {
    pub ready_switch_on: bool,
    pub switched_on: bool,
    pub operation_enabled: bool,
    pub fault: bool,
    pub voltage_enabled: bool,
    /// active low: false when a quick stop is ongoing
    pub quick_stop: bool,
    pub switch_on_disabled: bool,
    pub warning: bool,
    reserved: u1,
    pub remote: bool,
    pub target_reached: bool,
    pub limit_active: bool,
    pub setpoint_acknowledge: bool,
    pub following_error: bool,
    reserved: u2,
}
data::bilge_pdudata!(StatusWord, u16);

impl StatusWord {
	/// state of the drive state machine given by this status word
	pub fn state(&self) -> DriveState  {DriveState::from(u16::from(*self))}
}

impl fmt::Display for StatusWord {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "StatusWord{{")?;
		for (active, mark) in [ (self.ready_switch_on(), "rtso"),
								(self.switched_on(), "so"),
								(self.operation_enabled(), "oe"),
								(self.fault(), "f"),
								(self.voltage_enabled(), "ve"),
								(self.quick_stop(), "qs"),
								(self.switch_on_disabled(), "sod"),
								(self.warning(), "w"),
								(self.remote(), "r"),
								(self.target_reached(), "tr"),
								(self.limit_active(), "la"),
								] {
			write!(f, " ")?;
			if active {
				write!(f, "{}", mark)?;
			} else {
				for _ in 0 .. mark.len() {write!(f, " ")?;}
			}
		}
		write!(f, "}}")?;
		Ok(())
	}
}

/**
Control word of a servo drive

| Bit	|	Category	|   Meaning	|
|-------|---------------|-----------|
| 0	|	M	|	Switch on |
| 1	|	M	|	Enable voltage |
| 2	|	O	|	Quick stop |
| 3	|	M	|	Enable operation |
| 4	|	O	|	New set-point (profile position) |
| 5	|	O	|	Change set immediately (profile position) |
| 6	|	O	|	Relative target (profile position) |
| 7	|	M	|	Fault reset |
| 8	|	O	|	Halt |
| 9	|	O	|	Change on set-point |
| 10	|	O	|	reserved |
| 11 – 15	|	O	|	Manufacturer specific |
*/
#[bitsize(16)]
#[derive(FromBits, DebugBits, Copy, Clone, Eq, PartialEq)]
pub struct ControlWord {
    pub switch_on: bool,
    pub enable_voltage: bool,
    /// active low: clearing it triggers a quick stop
    pub quick_stop: bool,
    pub enable_operation: bool,
    pub new_setpoint: bool,
    pub change_immediately: bool,
    pub relative: bool,
    pub reset_fault: bool,
    pub halt: bool,
    pub change_on_setpoint: bool,
    reserved: u1,
    reserved: u5,
}
data::bilge_pdudata!(ControlWord, u16);

impl ControlWord {
	/// transition Switch On Disabled -> Ready to Switch On
	pub const SHUTDOWN: u16 = 0x0006;
	/// transition Ready to Switch On -> Switched On
	pub const SWITCH_ON: u16 = 0x0007;
	/// transition Switched On -> Operation Enabled
	pub const ENABLE_OPERATION: u16 = 0x000f;
	/// transition Operation Enabled -> Switched On
	pub const DISABLE_OPERATION: u16 = 0x0007;
	/// transition to Switch On Disabled from any powered state
	pub const DISABLE_VOLTAGE: u16 = 0x0000;
	/// transition Operation Enabled -> Quick Stop Active
	pub const QUICK_STOP: u16 = 0x0002;
	/// bit triggering a fault reset on its rising edge
	pub const FAULT_RESET: u16 = 0x0080;

	/// control word with the given command bits only
	pub fn command(bits: u16) -> Self  {Self::from(bits)}
}

impl fmt::Display for ControlWord {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "ControlWord{{") ?;
		for (active, mark) in [ (self.switch_on(), "so"),
								(self.enable_voltage(), "ev"),
								(self.quick_stop(), "qs"),
								(self.enable_operation(), "eo"),
								(self.new_setpoint(), "ns"),
								(self.change_immediately(), "ci"),
								(self.reset_fault(), "rf"),
								(self.halt(), "h"),
								] {
			write!(f, " ")?;
			if active {
				write!(f, "{}", mark)?;
			} else {
				for _ in 0 .. mark.len() {write!(f, " ")?;}
			}
		}
		write!(f, "}}")?;
		Ok(())
	}
}


/// state of the CiA-402 state machine, decoded from a [StatusWord]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DriveState {
	NotReadyToSwitchOn,
	SwitchOnDisabled,
	ReadyToSwitchOn,
	SwitchedOn,
	OperationEnabled,
	QuickStopActive,
	FaultReactionActive,
	Fault,
}
impl From<u16> for DriveState {
	fn from(status: u16) -> Self {
		// the fault bit takes precedence over any other combination
		if status & 0x0008 != 0 {
			return if status & 0x004f == 0x000f
				{Self::FaultReactionActive}
			else
				{Self::Fault}
		}
		if status & 0x004f == 0x0040
			{Self::SwitchOnDisabled}
		else { match status & 0x006f {
			0x0021 => Self::ReadyToSwitchOn,
			0x0023 => Self::SwitchedOn,
			0x0027 => Self::OperationEnabled,
			0x0007 => Self::QuickStopActive,
			_ => Self::NotReadyToSwitchOn,
		}}
	}
}
impl fmt::Display for DriveState {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		f.write_str(match self {
			Self::NotReadyToSwitchOn => "not ready to switch on",
			Self::SwitchOnDisabled => "switch on disabled",
			Self::ReadyToSwitchOn => "ready to switch on",
			Self::SwitchedOn => "switched on",
			Self::OperationEnabled => "operation enabled",
			Self::QuickStopActive => "quick stop active",
			Self::FaultReactionActive => "fault reaction active",
			Self::Fault => "fault",
		})
	}
}


/// servodrive control-loop type
#[bitsize(8)]
#[derive(TryFromBits, Debug, Copy, Clone, Eq, PartialEq)]
pub enum OperationMode {
	Off = 0,
	ProfilePosition = 1,
	Velocity = 2,
	ProfileVelocity = 3,
	ProfileTorque = 4,
	Homing = 6,
	InterpolatedPosition = 7,

	/// CSP
	CyclicSyncPosition = 8,
	/// CSV
	CyclicSyncVelocity = 9,
	/// CST
	CyclicSyncTorque = 10,
}
data::bilge_pdudata!(OperationMode, u8);

impl OperationMode {
	/// mode code as found in the dictionnary objects
	pub fn code(self) -> u8  {u8::from(self)}
	/// true if this mode is in the given supported-modes bitfield (object 0x6502)
	pub fn supported_by(self, supported: u32) -> bool {
		match self.code() {
			0 => true,
			code => supported & (1 << (code - 1)) != 0,
		}
	}
	/// true if the target position is taken in this mode
	pub fn is_position(self) -> bool {
		matches!(self, Self::ProfilePosition | Self::CyclicSyncPosition | Self::InterpolatedPosition)
	}
	/// true if the target velocity is taken in this mode
	pub fn is_velocity(self) -> bool {
		matches!(self, Self::Velocity | Self::ProfileVelocity | Self::CyclicSyncVelocity)
	}
	/// true if the target torque is taken in this mode
	pub fn is_torque(self) -> bool {
		matches!(self, Self::ProfileTorque | Self::CyclicSyncTorque)
	}
}


/**
	summary of the fault indications of a drive, as reported by its status word

	Several bits can be set at the same time.
*/
#[bitsize(8)]
#[derive(FromBits, DebugBits, Copy, Clone, Eq, PartialEq)]
pub struct DriveFaults {
	/// the drive is in [DriveState::Fault]
	pub fault: bool,
	/// the drive is in [DriveState::FaultReactionActive]
	pub fault_reaction: bool,
	/// the drive reports a warning, it keeps operating
	pub warning: bool,
	/// an internal limit (torque, velocity, position) is active
	pub internal_limit: bool,
	/// the following error exceeds its window
	pub following_error: bool,
	/// the drive is in [DriveState::QuickStopActive]
	pub quick_stop: bool,
	/// the power stage is not supplied
	pub voltage_missing: bool,
	reserved: u1,
}

impl DriveFaults {
	/// decode the fault indications from a status word
	pub fn decode(status: StatusWord) -> Self {
		let state = status.state();
		let operating = matches!(state,
			DriveState::ReadyToSwitchOn
			| DriveState::SwitchedOn
			| DriveState::OperationEnabled
			| DriveState::QuickStopActive);
		let mut faults = Self::from(0u8);
		faults.set_fault(state == DriveState::Fault);
		faults.set_fault_reaction(state == DriveState::FaultReactionActive);
		faults.set_warning(status.warning());
		faults.set_internal_limit(status.limit_active());
		faults.set_following_error(status.following_error());
		faults.set_quick_stop(state == DriveState::QuickStopActive);
		faults.set_voltage_missing(operating && ! status.voltage_enabled());
		faults
	}
	/// true if any of the bits prevents the drive from operating
	pub fn is_error(&self) -> bool {
		self.fault() || self.fault_reaction() || self.following_error() || self.voltage_missing()
	}
	/// true if no bit is set
	pub fn is_empty(&self) -> bool  {u8::from(*self) == 0}
}
impl fmt::Display for DriveFaults {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		if self.is_empty()
			{return write!(f, "no fault")}
		let mut first = true;
		for (active, name) in [ (self.fault(), "fault"),
								(self.fault_reaction(), "fault reaction"),
								(self.warning(), "warning"),
								(self.internal_limit(), "internal limit"),
								(self.following_error(), "following error"),
								(self.quick_stop(), "quick stop"),
								(self.voltage_missing(), "voltage missing"),
								] {
			if active {
				if ! first {write!(f, ", ")?;}
				write!(f, "{}", name)?;
				first = false;
			}
		}
		Ok(())
	}
}


#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn drive_states() {
		assert_eq!(DriveState::from(0x0000), DriveState::NotReadyToSwitchOn);
		assert_eq!(DriveState::from(0x0250), DriveState::SwitchOnDisabled);
		assert_eq!(DriveState::from(0x0231), DriveState::ReadyToSwitchOn);
		assert_eq!(DriveState::from(0x0233), DriveState::SwitchedOn);
		assert_eq!(DriveState::from(0x0237), DriveState::OperationEnabled);
		assert_eq!(DriveState::from(0x1637), DriveState::OperationEnabled);
		assert_eq!(DriveState::from(0x0217), DriveState::QuickStopActive);
		assert_eq!(DriveState::from(0x021f), DriveState::FaultReactionActive);
	}

	#[test]
	fn fault_precedence() {
		// the fault bit wins over any other bit pattern
		for status in [0x0008, 0x0218, 0x0238, 0x0268, 0xff78, 0x0628] {
			assert_eq!(DriveState::from(status), DriveState::Fault, "status 0x{:04x}", status);
		}
		assert_eq!(StatusWord::from(0x0208).state(), DriveState::Fault);
	}

	#[test]
	fn control_words() {
		let control = ControlWord::command(ControlWord::ENABLE_OPERATION);
		assert!(control.switch_on() && control.enable_voltage() && control.quick_stop() && control.enable_operation());
		assert!(! ControlWord::command(ControlWord::QUICK_STOP).quick_stop());
		assert!(ControlWord::command(ControlWord::FAULT_RESET).reset_fault());

		let mut control = ControlWord::command(ControlWord::ENABLE_OPERATION);
		control.set_new_setpoint(true);
		control.set_change_immediately(true);
		assert_eq!(u16::from(control), 0x003f);
	}

	#[test]
	fn operation_modes() {
		assert_eq!(OperationMode::try_from(8u8).unwrap(), OperationMode::CyclicSyncPosition);
		assert!(OperationMode::try_from(5u8).is_err());
		// CSP, CSV, CST and PP
		let supported = 0b11_1000_0001;
		assert!(OperationMode::CyclicSyncPosition.supported_by(supported));
		assert!(OperationMode::ProfilePosition.supported_by(supported));
		assert!(! OperationMode::ProfileVelocity.supported_by(supported));
	}

	#[test]
	fn faults() {
		let faults = DriveFaults::decode(StatusWord::from(0x0218));
		assert!(faults.fault() && faults.is_error());
		assert_eq!(faults.to_string(), "fault");

		let faults = DriveFaults::decode(StatusWord::from(0x2ab7));
		assert!(faults.warning() && faults.internal_limit() && faults.following_error());
		assert!(! faults.fault());
		assert!(faults.is_error());

		let faults = DriveFaults::decode(StatusWord::from(0x0227));
		assert!(faults.voltage_missing());
		assert!(DriveFaults::decode(StatusWord::from(0x0237)).is_empty());
	}
}
