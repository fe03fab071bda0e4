/*!
	Convenient structures to address the slave's dictionnary objects (SDO) and configure mappings.

	The objects of the CiA-402 drive profile are declared in [cia402], the ones configuring the process data mapping in [mapping].

	# Example

	```ignore
		// one-time configuration of a drive
		let mode = master.read_service_data(slave, sdo::cia402::modes::SUPPORTED)?;
		master.write_service_data(slave, sdo::cia402::stop_options::QUICK_STOP, 6i16)?;
	```
*/

use crate::data::{self, PduData};
use core::{
	fmt,
	marker::PhantomData,
	};
use bilge::prelude::*;


/// description of an SDO's subitem, not a SDO itself
pub struct Sdo<T: PduData> {
	/// index of the item in the slave's dictionnary of objects
	pub index: u16,
	/// subindex in the item
	pub sub: u8,
	extracted: PhantomData<T>,
}
impl<T: PduData> Sdo<T> {
	/// address an sdo subitem, its size is deduced from the `PduData` impl
	pub const fn new(index: u16, sub: u8) -> Self {
		Self {index, sub, extracted: PhantomData}
	}
	/// address the subitem 0 of an sdo, which is the value for simple objects and the number of entries for records
	pub const fn complete(index: u16) -> Self {
		Self::new(index, 0)
	}
	/// byte size of the subitem value
	pub fn size(&self) -> usize  {T::packed_size()}
}
impl<T: PduData> fmt::Debug for Sdo<T> {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "Sdo {{index: 0x{:04x}, sub: {}}}", self.index, self.sub)
	}
}
// [Clone] and [Copy] must be implemented manually to allow copying an sdo pointing to a type which does not implement this operation
impl<T: PduData> Clone for Sdo<T> {
	fn clone(&self) -> Self   {Self::new(self.index, self.sub)}
}
impl<T: PduData> Copy for Sdo<T> {}
impl<T: PduData> PartialEq for Sdo<T> {
	fn eq(&self, other: &Self) -> bool {
		self.index == other.index && self.sub == other.sub
	}
}

/**
	entry of a PDO mapping object, telling which subitem is copied to the process data

	ETG.1000.6 5.6.7.4.7
*/
#[bitsize(32)]
#[derive(FromBits, DebugBits, Copy, Clone)]
pub struct PdoEntry {
	/// bit size of the mapped subitem
	pub bitsize: u8,
	/// subindex of the mapped subitem
	pub sub: u8,
	/// index of the mapped object, or 0 for padding
	pub index: u16,
}
data::bilge_pdudata!(PdoEntry, u32);

impl PdoEntry {
	/// mapping entry for the given subitem
	pub fn of<T: PduData>(sdo: Sdo<T>) -> Self {
		Self::new((T::packed_bitsize()) as u8, sdo.sub, sdo.index)
	}
	/// mapping entry of padding bits, not linked to any object
	pub fn padding(bitsize: u8) -> Self {
		Self::new(bitsize, 0, 0)
	}
}


/// objects configuring the process data mapping, common to every CoE slave
pub mod mapping {
	use super::*;

	/// first receive PDO mapping object (master to slave), each subitem is a [PdoEntry]
	pub const RX_PDO: u16 = 0x1600;
	/// first transmit PDO mapping object (slave to master), each subitem is a [PdoEntry]
	pub const TX_PDO: u16 = 0x1a00;
	/// PDO assignment of the sync manager receiving outputs, each subitem is the index of a PDO mapping object
	pub const RX_ASSIGN: u16 = 0x1c12;
	/// PDO assignment of the sync manager sending inputs, each subitem is the index of a PDO mapping object
	pub const TX_ASSIGN: u16 = 0x1c13;

	/// number of entries in a PDO mapping or assignment object
	pub const fn count(index: u16) -> Sdo<u8>  {Sdo::complete(index)}
	/// one mapping entry of a PDO mapping object, `sub` starts at 1
	pub const fn entry(index: u16, sub: u8) -> Sdo<PdoEntry>  {Sdo::new(index, sub)}
	/// one assigned PDO of a sync manager assignment object, `sub` starts at 1
	pub const fn assigned(index: u16, sub: u8) -> Sdo<u16>  {Sdo::new(index, sub)}
}


/**
	objects of the CiA-402 device profile for drives and motion control

	Most drives implement only a part of them, check the supported modes and the vendor documentation.
*/
pub mod cia402 {
	use super::Sdo;

	pub mod error {
		use super::*;
		/// action when the communication is lost
		pub const ABORT_CONNECTION: Sdo<i16> = Sdo::new(0x6007, 0);
		/// last error code
		pub const CODE: Sdo<u16> = Sdo::new(0x603f, 0);
	}

	pub mod device {
		use super::*;
		/// control word, usually mapped in the process data
		pub const CONTROL: Sdo<u16> = Sdo::new(0x6040, 0);
		/// status word, usually mapped in the process data
		pub const STATUS: Sdo<u16> = Sdo::new(0x6041, 0);
	}

	/// option codes telling the drive how to stop in each transition
	pub mod stop_options {
		use super::*;
		pub const QUICK_STOP: Sdo<i16> = Sdo::new(0x605a, 0);
		pub const SHUTDOWN: Sdo<i16> = Sdo::new(0x605b, 0);
		pub const DISABLE_OPERATION: Sdo<i16> = Sdo::new(0x605c, 0);
		pub const HALT: Sdo<i16> = Sdo::new(0x605d, 0);
		pub const FAULT_REACTION: Sdo<i16> = Sdo::new(0x605e, 0);
	}

	pub mod modes {
		use super::*;
		pub const OPERATION: Sdo<i8> = Sdo::new(0x6060, 0);
		pub const DISPLAY: Sdo<i8> = Sdo::new(0x6061, 0);
		/// bitfield of the modes implemented by the drive, bit `n-1` for mode `n`
		pub const SUPPORTED: Sdo<u32> = Sdo::new(0x6502, 0);
	}

	pub mod position {
		use super::*;
		pub const DEMAND: Sdo<i32> = Sdo::new(0x6062, 0);
		pub const ACTUAL_INTERNAL: Sdo<i32> = Sdo::new(0x6063, 0);
		pub const ACTUAL: Sdo<i32> = Sdo::new(0x6064, 0);
		pub const FOLLOWING_ERROR_WINDOW: Sdo<u32> = Sdo::new(0x6065, 0);
		pub const FOLLOWING_ERROR_TIMEOUT: Sdo<u16> = Sdo::new(0x6066, 0);
		pub const WINDOW: Sdo<u32> = Sdo::new(0x6067, 0);
		pub const WINDOW_TIME: Sdo<u16> = Sdo::new(0x6068, 0);
		pub const TARGET: Sdo<i32> = Sdo::new(0x607a, 0);
		pub const RANGE_LIMIT_MIN: Sdo<i32> = Sdo::new(0x607b, 1);
		pub const RANGE_LIMIT_MAX: Sdo<i32> = Sdo::new(0x607b, 2);
		pub const SOFTWARE_LIMIT_MIN: Sdo<i32> = Sdo::new(0x607d, 1);
		pub const SOFTWARE_LIMIT_MAX: Sdo<i32> = Sdo::new(0x607d, 2);
		pub const MAX_PROFILE_VELOCITY: Sdo<u32> = Sdo::new(0x607f, 0);
		pub const MAX_MOTOR_SPEED: Sdo<u32> = Sdo::new(0x6080, 0);
		pub const PROFILE_VELOCITY: Sdo<u32> = Sdo::new(0x6081, 0);
		pub const END_VELOCITY: Sdo<u32> = Sdo::new(0x6082, 0);
		pub const PROFILE_ACCELERATION: Sdo<u32> = Sdo::new(0x6083, 0);
		pub const PROFILE_DECELERATION: Sdo<u32> = Sdo::new(0x6084, 0);
		pub const QUICK_STOP_DECELERATION: Sdo<u32> = Sdo::new(0x6085, 0);
		pub const MOTION_PROFILE_TYPE: Sdo<i16> = Sdo::new(0x6086, 0);
		pub const MAX_ACCELERATION: Sdo<u32> = Sdo::new(0x60c5, 0);
		pub const MAX_DECELERATION: Sdo<u32> = Sdo::new(0x60c6, 0);
		pub const OPTION_CODE: Sdo<u16> = Sdo::new(0x60f2, 0);
		pub const FOLLOWING_ERROR_ACTUAL: Sdo<i32> = Sdo::new(0x60f4, 0);
		pub const CONTROL_EFFORT: Sdo<i32> = Sdo::new(0x60fa, 0);
		pub const DEMAND_INTERNAL_INCREMENTS: Sdo<i32> = Sdo::new(0x60fc, 0);
	}

	pub mod velocity {
		use super::*;
		pub const SENSOR_ACTUAL: Sdo<i32> = Sdo::new(0x6069, 0);
		pub const SENSOR_SELECTION: Sdo<i16> = Sdo::new(0x606a, 0);
		pub const DEMAND: Sdo<i32> = Sdo::new(0x606b, 0);
		pub const ACTUAL: Sdo<i32> = Sdo::new(0x606c, 0);
		pub const WINDOW: Sdo<u16> = Sdo::new(0x606d, 0);
		pub const WINDOW_TIME: Sdo<u16> = Sdo::new(0x606e, 0);
		pub const THRESHOLD: Sdo<u16> = Sdo::new(0x606f, 0);
		pub const THRESHOLD_TIME: Sdo<u16> = Sdo::new(0x6070, 0);
		pub const TARGET: Sdo<i32> = Sdo::new(0x60ff, 0);
	}

	pub mod torque {
		use super::*;
		/// target torque in per-mille of the rated torque
		pub const TARGET: Sdo<i16> = Sdo::new(0x6071, 0);
		pub const MAX: Sdo<u16> = Sdo::new(0x6072, 0);
		pub const MAX_CURRENT: Sdo<u16> = Sdo::new(0x6073, 0);
		pub const DEMAND: Sdo<i16> = Sdo::new(0x6074, 0);
		/// rated current in mA
		pub const MOTOR_RATED_CURRENT: Sdo<u32> = Sdo::new(0x6075, 0);
		/// rated torque in mN.m
		pub const MOTOR_RATED_TORQUE: Sdo<u32> = Sdo::new(0x6076, 0);
		pub const ACTUAL: Sdo<i16> = Sdo::new(0x6077, 0);
		pub const CURRENT_ACTUAL: Sdo<i16> = Sdo::new(0x6078, 0);
		pub const DC_LINK_VOLTAGE: Sdo<u32> = Sdo::new(0x6079, 0);
		pub const SLOPE: Sdo<u32> = Sdo::new(0x6087, 0);
		pub const POSITIVE_LIMIT: Sdo<u16> = Sdo::new(0x60e0, 0);
		pub const NEGATIVE_LIMIT: Sdo<u16> = Sdo::new(0x60e1, 0);
	}

	/// factor group, converting user units to internal units
	pub mod factors {
		use super::*;
		pub const POLARITY: Sdo<u8> = Sdo::new(0x607e, 0);
		pub const POSITION_NOTATION: Sdo<i8> = Sdo::new(0x6089, 0);
		pub const POSITION_DIMENSION: Sdo<u8> = Sdo::new(0x608a, 0);
		pub const VELOCITY_NOTATION: Sdo<i8> = Sdo::new(0x608b, 0);
		pub const VELOCITY_DIMENSION: Sdo<u8> = Sdo::new(0x608c, 0);
		pub const ACCELERATION_NOTATION: Sdo<i8> = Sdo::new(0x608d, 0);
		pub const ACCELERATION_DIMENSION: Sdo<u8> = Sdo::new(0x608e, 0);
		pub const POSITION_ENCODER_RESOLUTION: Sdo<u32> = Sdo::new(0x608f, 1);
		pub const VELOCITY_ENCODER_RESOLUTION: Sdo<u32> = Sdo::new(0x6090, 1);
		pub const GEAR_RATIO: Sdo<u32> = Sdo::new(0x6091, 1);
		pub const FEED_CONSTANT: Sdo<u32> = Sdo::new(0x6092, 1);
		pub const POSITION: Sdo<u32> = Sdo::new(0x6093, 1);
		pub const VELOCITY_ENCODER: Sdo<u32> = Sdo::new(0x6094, 1);
		pub const VELOCITY_1: Sdo<u32> = Sdo::new(0x6095, 1);
		pub const VELOCITY: Sdo<u32> = Sdo::new(0x6096, 1);
		pub const ACCELERATION: Sdo<u32> = Sdo::new(0x6097, 1);
	}

	pub mod offsets {
		use super::*;
		pub const POSITION: Sdo<i32> = Sdo::new(0x60b0, 0);
		pub const VELOCITY: Sdo<i32> = Sdo::new(0x60b1, 0);
		pub const TORQUE: Sdo<i16> = Sdo::new(0x60b2, 0);
	}

	pub mod io {
		use super::*;
		/// vendor specific analog input, used for auxiliary sensors
		pub const ANALOG_INPUT: Sdo<i16> = Sdo::new(0x2205, 1);
		pub const DIGITAL_INPUTS: Sdo<u32> = Sdo::new(0x60fd, 0);
		pub const DIGITAL_OUTPUTS: Sdo<u32> = Sdo::new(0x60fe, 1);
	}
}


#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn pdo_entries() {
		let mut packed = [0u8; 4];
		PdoEntry::of(cia402::device::CONTROL).pack(&mut packed).unwrap();
		assert_eq!(u32::from_le_bytes(packed), 0x6040_0010);
		PdoEntry::of(cia402::io::ANALOG_INPUT).pack(&mut packed).unwrap();
		assert_eq!(u32::from_le_bytes(packed), 0x2205_0110);
		PdoEntry::padding(8).pack(&mut packed).unwrap();
		assert_eq!(u32::from_le_bytes(packed), 0x0000_0008);

		let entry = PdoEntry::unpack(&0x607a_0020u32.to_le_bytes()).unwrap();
		assert_eq!(entry.index(), 0x607a);
		assert_eq!(entry.bitsize(), 32);
	}

	#[test]
	fn objects() {
		assert_eq!(cia402::position::TARGET.size(), 4);
		assert_eq!(cia402::torque::TARGET.size(), 2);
		assert_eq!(mapping::entry(mapping::RX_PDO, 3), Sdo::<PdoEntry>::new(0x1600, 3));
		assert_eq!(format!("{:?}", cia402::modes::SUPPORTED), "Sdo {index: 0x6502, sub: 0}");
	}
}
