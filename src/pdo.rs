/*!
	process data records exchanged cyclically with a drive

	Both records are packed little-endian without padding other than listed. The drive is configured (see [rx::mapping] and [tx::mapping]) to produce exactly these layouts, so their fields can be used directly on the slices of the process image.
*/

use crate::{
	data::Field,
	cia402::{StatusWord, ControlWord},
	sdo::{PdoEntry, cia402},
	};


/// RxPDO: data sent by the master to the drive
pub mod rx {
	use super::*;

	pub const control: Field<ControlWord> = Field::simple(0);
	/// the operation mode is followed by a padding byte
	pub const mode: Field<u8> = Field::simple(2);
	pub const target_position: Field<i32> = Field::simple(4);
	pub const target_velocity: Field<i32> = Field::simple(8);
	pub const target_torque: Field<i16> = Field::simple(12);

	/// byte size of the record
	pub const SIZE: usize = target_torque.end();

	/// entries of the PDO mapping object 0x1600 producing this record
	pub fn mapping() -> [PdoEntry; 6] {[
		PdoEntry::of(cia402::device::CONTROL),
		PdoEntry::of(cia402::modes::OPERATION),
		PdoEntry::padding(8),
		PdoEntry::of(cia402::position::TARGET),
		PdoEntry::of(cia402::velocity::TARGET),
		PdoEntry::of(cia402::torque::TARGET),
		]}
}

/// TxPDO: data sent by the drive to the master
pub mod tx {
	use super::*;

	pub const status: Field<StatusWord> = Field::simple(0);
	pub const mode_display: Field<u8> = Field::simple(2);
	pub const position: Field<i32> = Field::simple(3);
	pub const velocity: Field<i32> = Field::simple(7);
	pub const torque: Field<i16> = Field::simple(11);
	pub const analog_input: Field<i16> = Field::simple(13);

	/// byte size of the record
	pub const SIZE: usize = analog_input.end();

	/// entries of the PDO mapping object 0x1a00 producing this record
	pub fn mapping() -> [PdoEntry; 6] {[
		PdoEntry::of(cia402::device::STATUS),
		PdoEntry::of(cia402::modes::DISPLAY),
		PdoEntry::of(cia402::position::ACTUAL),
		PdoEntry::of(cia402::velocity::ACTUAL),
		PdoEntry::of(cia402::torque::ACTUAL),
		PdoEntry::of(cia402::io::ANALOG_INPUT),
		]}
}


#[cfg(test)]
mod tests {
	use super::*;
	use crate::data::PduData;

	fn raw(entries: [PdoEntry; 6]) -> Vec<u32> {
		entries.iter().map(|entry| {
			let mut packed = [0; 4];
			entry.pack(&mut packed).unwrap();
			u32::from_le_bytes(packed)
		}).collect()
	}

	#[test]
	fn record_offsets() {
		assert_eq!(rx::SIZE, 14);
		assert_eq!(tx::SIZE, 15);
		assert_eq!((rx::mode.byte, rx::target_position.byte, rx::target_velocity.byte, rx::target_torque.byte), (2, 4, 8, 12));
		assert_eq!((tx::mode_display.byte, tx::position.byte, tx::velocity.byte, tx::torque.byte, tx::analog_input.byte), (2, 3, 7, 11, 13));
	}

	#[test]
	fn mapping_entries() {
		assert_eq!(raw(rx::mapping()), [0x6040_0010, 0x6060_0008, 0x0000_0008, 0x607a_0020, 0x60ff_0020, 0x6071_0010]);
		assert_eq!(raw(tx::mapping()), [0x6041_0010, 0x6061_0008, 0x6064_0020, 0x606c_0020, 0x6077_0010, 0x2205_0110]);
		// the mapped bits must cover the records exactly
		let bits = |entries: [PdoEntry; 6]| entries.iter().map(|e| usize::from(e.bitsize())).sum::<usize>();
		assert_eq!(bits(rx::mapping()), rx::SIZE * 8);
		assert_eq!(bits(tx::mapping()), tx::SIZE * 8);
	}

	#[test]
	fn record_access() {
		let mut record = [0u8; rx::SIZE];
		rx::target_position.set(&mut record, -1000);
		rx::target_torque.set(&mut record, 250);
		rx::mode.set(&mut record, 8);
		assert_eq!(&record[2 .. 8], &[8, 0, 0x18, 0xfc, 0xff, 0xff]);
		assert_eq!(&record[12 ..], &[250, 0]);

		let mut record = [0u8; tx::SIZE];
		record[3 .. 7].copy_from_slice(&123456i32.to_le_bytes());
		record[13 .. 15].copy_from_slice(&(-5i16).to_le_bytes());
		assert_eq!(tx::position.get(&record), 123456);
		assert_eq!(tx::analog_input.get(&record), -5);
	}
}
