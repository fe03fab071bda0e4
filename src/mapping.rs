/*!
	This module provide helper structs to lay out and configure the mapping of slaves process data to the logical memory.

	It highlights
	- [Mapping] to build a [Layout] of contiguous logical memory for multiple slaves, and compute each slave's offsets
	- [SlaveMapping] to size the process data of a slave from its CoE PDO assignment, and set its sync managers and FMMUs accordingly

	The logical memory holds all outputs first, followed by all inputs, so the whole process image is exchanged in one `LRW` command.

	Example

	```ignore
		let mut mapping = Mapping::new();
		let drive = mapping.slave(14, 15);
		let io = mapping.slave(2, 0);
		let layout = mapping.finish();
		// the drive's outputs are at layout.slaves[0].outputs in the output image
	```
*/

use core::ops::Range;
use crate::{
	rawmaster::RawMaster,
	can::{Can, SdoAbortCode},
	data::PduData,
	sdo,
	registers::{self, SyncManagerChannel, SyncMode, SyncDirection, FmmuEntry},
	error::{EthercatError, EthercatResult},
	};


/// location of a slave's process data in the process image
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SlaveLayout {
	/// byte range in the output image (master to slave)
	pub outputs: Range<usize>,
	/// byte range in the input image (slave to master)
	pub inputs: Range<usize>,
}

/// layout of the whole process image, outputs followed by inputs in the logical memory
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Layout {
	/// byte size of the output image
	pub outputs: usize,
	/// byte size of the input image
	pub inputs: usize,
	/// process data of each slave, in topological order
	pub slaves: Vec<SlaveLayout>,
	/// number of slaves having outputs
	pub outputs_wkc: u16,
	/// number of slaves having inputs
	pub inputs_wkc: u16,
}
impl Layout {
	/**
		working counter of a complete `LRW` exchange of the process image

		each slave increments it by 2 when writing its outputs and by 1 when reading its inputs
	*/
	pub fn expected_wkc(&self) -> u16  {2*self.outputs_wkc + self.inputs_wkc}
	/// byte size of the logical memory used
	pub fn size(&self) -> usize  {self.outputs + self.inputs}
	/// logical address of the first input byte
	pub fn inputs_start(&self) -> u32  {self.outputs as u32}
}

/// builder of a [Layout], slaves are pushed in topological order
#[derive(Default)]
pub struct Mapping {
	layout: Layout,
}
impl Mapping {
	pub fn new() -> Self  {Self::default()}
	/// append a slave with the given process data sizes, and return its location
	pub fn slave(&mut self, outputs: usize, inputs: usize) -> SlaveLayout {
		let layout = &mut self.layout;
		let slave = SlaveLayout {
			outputs: layout.outputs .. layout.outputs + outputs,
			inputs: layout.inputs .. layout.inputs + inputs,
			};
		layout.outputs += outputs;
		layout.inputs += inputs;
		if outputs != 0  {layout.outputs_wkc += 1}
		if inputs != 0  {layout.inputs_wkc += 1}
		layout.slaves.push(slave.clone());
		slave
	}
	pub fn finish(self) -> Layout  {self.layout}
}


/// process data setup of one slave
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SlaveMapping {
	/// station address of the slave
	pub station: u16,
	/// physical address of the buffer receiving outputs (sync manager 2)
	pub output_buffer: u16,
	/// physical address of the buffer sending inputs (sync manager 3)
	pub input_buffer: u16,
	/// byte size of the outputs
	pub outputs: u16,
	/// byte size of the inputs
	pub inputs: u16,
}
impl SlaveMapping {
	/// byte size of the process data assigned to a sync manager, as configured in the slave's dictionnary
	pub fn assigned_size(can: &mut Can<'_>, assign: u16) -> EthercatResult<u16, SdoAbortCode> {
		let mut bits = 0usize;
		let pdos = sdo_get(can, sdo::mapping::count(assign))?;
		for i in 1 ..= pdos {
			let pdo = sdo_get(can, sdo::mapping::assigned(assign, i))?;
			let entries = sdo_get(can, sdo::mapping::count(pdo))?;
			for j in 1 ..= entries {
				let entry = sdo_get(can, sdo::mapping::entry(pdo, j))?;
				bits += usize::from(entry.bitsize());
			}
		}
		if bits % 8 != 0
			{return Err(EthercatError::Master("process data is not byte aligned"))}
		u16::try_from(bits / 8)
			.map_err(|_| EthercatError::Master("process data too big"))
	}

	/**
		set up sync managers 2 and 3 and FMMUs 0 and 1 of the slave, mapping its buffers to the given layout

		this must be done in [AlState::PreOperational](registers::AlState::PreOperational)
	*/
	pub fn apply(&self, master: &RawMaster, slave: &SlaveLayout, inputs_start: u32) -> EthercatResult {
		let interface = registers::sync_manager::interface;
		if self.outputs != 0 {
			master.fpwr(self.station, interface.mappable(0), SyncManagerChannel::configured(
				self.output_buffer,
				self.outputs,
				SyncMode::Buffered,
				SyncDirection::Write,
				))?.one()?;
			master.fpwr(self.station, registers::fmmu.entry(0), FmmuEntry::bytes(
				slave.outputs.start as u32,
				self.outputs,
				self.output_buffer,
				SyncDirection::Write,
				))?.one()?;
		}
		if self.inputs != 0 {
			master.fpwr(self.station, interface.mappable(1), SyncManagerChannel::configured(
				self.input_buffer,
				self.inputs,
				SyncMode::Buffered,
				SyncDirection::Read,
				))?.one()?;
			master.fpwr(self.station, registers::fmmu.entry(1), FmmuEntry::bytes(
				inputs_start + slave.inputs.start as u32,
				self.inputs,
				self.input_buffer,
				SyncDirection::Read,
				))?.one()?;
		}
		Ok(())
	}
}

/// read a dictionnary object of a fixed size
fn sdo_get<T: PduData>(can: &mut Can<'_>, sdo: sdo::Sdo<T>) -> EthercatResult<T, SdoAbortCode> {
	let mut buffer = [0u8; 8];
	let size = can.sdo_read(sdo.index, sdo.sub, &mut buffer)?;
	if size < sdo.size()
		{return Err(EthercatError::Protocol("object smaller than expected"))}
	Ok(T::unpack(&buffer)?)
}
