/*!
	[Fieldbus] implementation on a real ethercat segment, through an [EthercatSocket]

	Slaves receive the station address `STATION_OFFSET + position` during discovery, where `position` is their 1-based position in the segment.
*/

use core::time::Duration;
use std::{
	net::Ipv4Addr,
	time::Instant,
	};
use crate::{
	socket::*,
	rawmaster::{RawMaster, PduAnswer, PduCommand},
	registers::{self, AlState, AlError, AlControlRequest},
	eeprom::{self, SyncManagerUsage},
	sii::Sii,
	mailbox::Mailbox,
	can::{Can, SdoAbortCode},
	mapping::{Layout, Mapping, SlaveMapping},
	bus::{self, Fieldbus, SlaveStatus},
	sdo,
	config::MasterConfig,
	error::{EthercatError, EthercatResult},
	};

/// station address given to the first slave, position 1
pub const STATION_OFFSET: u16 = 0x1000;


/// what the master knows about each slave
struct SlaveInfo {
	station: u16,
	mailbox: Option<Mailbox>,
	mapping: SlaveMapping,
	/// process data sizes given by the EEPROM, used when the slave has no CoE assignment
	default_sizes: (u16, u16),
}

/**
	ethercat segment reached through a network interface

	The interface is either an IPv4 address (ethercat over UDP) or the name of an ethernet interface (raw ethernet, linux only).
*/
pub struct EthercatBus {
	interface: String,
	config: MasterConfig,
	master: Option<RawMaster>,
	slaves: Vec<SlaveInfo>,
	layout: Option<Layout>,
	/// buffer for the logical exchange, outputs followed by inputs
	frame: Vec<u8>,
}
impl EthercatBus {
	/// the interface is only opened by [Fieldbus::open]
	pub fn new(interface: &str, config: MasterConfig) -> Self {
		Self {
			interface: interface.to_owned(),
			config,
			master: None,
			slaves: Vec::new(),
			layout: None,
			frame: Vec::new(),
		}
	}
	pub fn interface(&self) -> &str  {&self.interface}

	fn raw(&self) -> EthercatResult<&RawMaster> {
		self.master.as_ref().ok_or(EthercatError::Master("bus closed"))
	}
	fn slave(&self, slave: u16) -> EthercatResult<&SlaveInfo> {
		usize::from(slave).checked_sub(1)
			.and_then(|index| self.slaves.get(index))
			.ok_or(EthercatError::Master("no such slave"))
	}
	fn station(slave: u16) -> u16  {STATION_OFFSET + slave}

	/// poll the broadcasted AL status until all slaves reached the given state
	fn wait_all(&self, state: AlState, timeout: Duration) -> EthercatResult {
		let master = self.raw()?;
		let deadline = Instant::now() + timeout;
		loop {
			let status = master.brd(registers::al::status)?;
			// the broadcast read is a bitwise or of every slave's register
			if status.value.state() == state && ! status.value.error()
				{return Ok(())}
			if Instant::now() > deadline
				{return Err(EthercatError::Timeout("slaves did not reach the requested state"))}
			std::thread::sleep(Duration::from_millis(1));
		}
	}

	/// read the mailbox and process buffers of a slave from its EEPROM
	fn inspect(&self, station: u16) -> EthercatResult<SlaveInfo> {
		let master = self.raw()?;
		let sii = Sii::new(master, station)?;
		let receive_offset = sii.read(eeprom::mailbox::standard::receive::offset)?;
		let receive_size = sii.read(eeprom::mailbox::standard::receive::size)?;
		let send_offset = sii.read(eeprom::mailbox::standard::send::offset)?;
		let send_size = sii.read(eeprom::mailbox::standard::send::size)?;
		let protocols = sii.read(eeprom::mailbox::protocols)?;

		let mailbox = if receive_size != 0 && send_size != 0 && protocols.can() {
			Some(Mailbox::new(
				station,
				receive_offset .. receive_offset + receive_size,
				send_offset .. send_offset + send_size,
				))
		} else {None};

		let mut mapping = SlaveMapping {station, .. Default::default()};
		let mut default_sizes = (0, 0);
		for channel in sii.sync_managers()? {
			match channel.usage() {
				SyncManagerUsage::ProcessOut => {
					mapping.output_buffer = channel.address();
					default_sizes.0 = channel.length();
					},
				SyncManagerUsage::ProcessIn => {
					mapping.input_buffer = channel.address();
					default_sizes.1 = channel.length();
					},
				_ => {},
			}
		}
		log::debug!("slave 0x{:04x}: mailbox {:?}, process buffers 0x{:04x} 0x{:04x}",
			station, mailbox, mapping.output_buffer, mapping.input_buffer);
		Ok(SlaveInfo {station, mailbox, mapping, default_sizes})
	}

	/// process data sizes of a slave, from its PDO assignment if it has CoE
	fn sizes(&mut self, index: usize) -> EthercatResult<(u16, u16)> {
		let timeout = self.config.sdo_timeout;
		let master = self.master.as_ref().ok_or(EthercatError::Master("bus closed"))?;
		let info = &mut self.slaves[index];
		let default = info.default_sizes;
		let mailbox = match info.mailbox.as_mut() {
			Some(mailbox) => mailbox,
			None => return Ok(default),
			};
		let mut can = Can::new(master, mailbox, timeout);
		let outputs = SlaveMapping::assigned_size(&mut can, sdo::mapping::RX_ASSIGN);
		let inputs = SlaveMapping::assigned_size(&mut can, sdo::mapping::TX_ASSIGN);
		match (outputs, inputs) {
			(Ok(outputs), Ok(inputs)) => Ok((outputs, inputs)),
			(Err(EthercatError::Slave(code)), _) | (_, Err(EthercatError::Slave(code))) => {
				log::debug!("slave 0x{:04x} has no PDO assignment ({}), using EEPROM sizes", info.station, code);
				Ok(default)
				},
			(Err(error), _) | (_, Err(error)) => Err(error.forget("PDO assignment unreadable")),
		}
	}

	/// state and error code of one slave
	fn status(&self, station: u16) -> EthercatResult<SlaveStatus> {
		let master = self.raw()?;
		let status = master.fprd(station, registers::al::status)?;
		if status.answers != 1
			{return Ok(SlaveStatus::missing())}
		let code = if status.value.error()
			{master.fprd(station, registers::al::error)?.one()?}
			else {AlError::NO_ERROR};
		Ok(SlaveStatus {
			state: status.value.state(),
			error: status.value.error(),
			code,
		})
	}
}

impl Fieldbus for EthercatBus {
	fn open(&mut self) -> EthercatResult {
		if self.master.is_some()
			{return Ok(())}
		let timeout = self.config.receive_timeout;
		let master = match self.interface.parse::<Ipv4Addr>() {
			Ok(address) => RawMaster::new(UdpSocket::new(address)?, timeout),
			#[cfg(target_os = "linux")]
			Err(_) => RawMaster::new(EthernetSocket::new(&self.interface)?, timeout),
			#[cfg(not(target_os = "linux"))]
			Err(_) => return Err(EthercatError::Master("raw ethernet sockets are only available on linux")),
			};
		log::info!("ethercat interface {} opened", self.interface);
		self.master = Some(master);
		Ok(())
	}
	fn close(&mut self) {
		if self.master.take().is_some() {
			log::info!("ethercat interface {} closed", self.interface);
		}
		self.slaves.clear();
		self.layout = None;
	}
	fn is_open(&self) -> bool  {self.master.is_some()}

	fn discover(&mut self) -> EthercatResult<u16> {
		let master = self.raw()?;
		let count = master.brd(registers::al::status)?.answers;
		log::info!("{} slaves answering", count);
		if count == 0
			{return Err(EthercatError::Master("no slave found"))}

		// reset the segment to a known state
		self.request_state(0, AlState::Init, true)?;
		self.wait_all(AlState::Init, self.config.state_timeout)?;
		let master = self.raw()?;
		master.bwr(registers::fmmu.all(), [0; 0x100])?;
		master.bwr(registers::sync_manager::interface.all(), [0; 0x80])?;

		let mut slaves = Vec::with_capacity(usize::from(count));
		for position in 0 .. count {
			let station = Self::station(position + 1);
			master.apwr(position, registers::address::fixed, station)?.one()?;
			let info = self.inspect(station)?;
			if let Some(mailbox) = &info.mailbox {
				mailbox.configure(master)?;
			}
			slaves.push(info);
		}
		self.slaves = slaves;

		self.request_state(0, AlState::PreOperational, false)?;
		self.wait_all(AlState::PreOperational, self.config.state_timeout)?;
		Ok(count)
	}

	fn map(&mut self) -> EthercatResult<Layout> {
		let mut mapping = Mapping::new();
		for index in 0 .. self.slaves.len() {
			let (outputs, inputs) = self.sizes(index)?;
			let info = &mut self.slaves[index];
			info.mapping.outputs = outputs;
			info.mapping.inputs = inputs;
			mapping.slave(usize::from(outputs), usize::from(inputs));
		}
		let layout = mapping.finish();
		let master = self.raw()?;
		for (info, slave) in self.slaves.iter().zip(&layout.slaves) {
			info.mapping.apply(master, slave, layout.inputs_start())?;
		}
		log::info!("process image mapped: {} output bytes, {} input bytes", layout.outputs, layout.inputs);
		self.frame = vec![0; layout.size()];
		self.layout = Some(layout.clone());
		Ok(layout)
	}

	fn request_state(&mut self, slave: u16, state: AlState, ack: bool) -> EthercatResult {
		let master = self.raw()?;
		let request = AlControlRequest::new(state, ack, false);
		if slave == 0 {
			master.bwr(registers::al::control, request)?;
		} else {
			master.fpwr(Self::station(slave), registers::al::control, request)?.one()?;
		}
		Ok(())
	}

	fn state_check(&mut self, slave: u16, state: AlState, timeout: Duration) -> EthercatResult<AlState> {
		let deadline = Instant::now() + timeout;
		loop {
			let reached = if slave == 0 {
				self.read_states()?.iter()
					.map(|status| status.state)
					.min_by_key(|state| bus::rank(*state))
					.unwrap_or(AlState::Unknown)
			} else {
				self.status(Self::station(slave))?.state
			};
			if reached == state || Instant::now() > deadline
				{return Ok(reached)}
			std::thread::sleep(Duration::from_millis(1));
		}
	}

	fn read_states(&mut self) -> EthercatResult<Vec<SlaveStatus>> {
		self.slaves.iter()
			.map(|info| self.status(info.station))
			.collect()
	}

	fn exchange(&mut self, outputs: &[u8], inputs: &mut [u8]) -> EthercatResult<u16> {
		let master = self.master.as_mut().ok_or(EthercatError::Master("bus closed"))?;
		if outputs.len() + inputs.len() != self.frame.len()
			{return Err(EthercatError::Master("process image does not match the mapping"))}
		let (sent, received) = self.frame.split_at_mut(outputs.len());
		sent.copy_from_slice(outputs);
		received.fill(0);

		let answers = master.logical(PduCommand::LRW, 0, &mut self.frame)?;
		inputs.copy_from_slice(&self.frame[outputs.len() ..]);
		Ok(answers)
	}

	fn sdo_read(&mut self, slave: u16, index: u16, sub: u8, data: &mut [u8]) -> EthercatResult<PduAnswer<usize>, SdoAbortCode> {
		let timeout = self.config.sdo_timeout;
		let master = self.master.as_ref().ok_or(EthercatError::Master("bus closed"))?;
		let info = usize::from(slave).checked_sub(1)
			.and_then(|index| self.slaves.get_mut(index))
			.ok_or(EthercatError::Master("no such slave"))?;
		let mailbox = info.mailbox.as_mut().ok_or(EthercatError::Master("slave has no CoE mailbox"))?;
		let size = Can::new(master, mailbox, timeout).sdo_read(index, sub, data)?;
		Ok(PduAnswer {answers: 1, value: size})
	}
	fn sdo_write(&mut self, slave: u16, index: u16, sub: u8, data: &[u8]) -> EthercatResult<PduAnswer<()>, SdoAbortCode> {
		let timeout = self.config.sdo_timeout;
		let master = self.master.as_ref().ok_or(EthercatError::Master("bus closed"))?;
		let info = usize::from(slave).checked_sub(1)
			.and_then(|index| self.slaves.get_mut(index))
			.ok_or(EthercatError::Master("no such slave"))?;
		let mailbox = info.mailbox.as_mut().ok_or(EthercatError::Master("slave has no CoE mailbox"))?;
		Can::new(master, mailbox, timeout).sdo_write(index, sub, data)?;
		Ok(PduAnswer {answers: 1, value: ()})
	}

	fn reconfigure(&mut self, slave: u16, timeout: Duration) -> EthercatResult {
		let layout = self.layout.clone().ok_or(EthercatError::Master("process data not mapped"))?;
		let slave_layout = layout.slaves.get(usize::from(slave).wrapping_sub(1))
			.ok_or(EthercatError::Master("no such slave"))?;

		self.request_state(slave, AlState::Init, true)?;
		if self.state_check(slave, AlState::Init, timeout)? != AlState::Init
			{return Err(EthercatError::Timeout("slave did not go back to init"))}
		let info = self.slave(slave)?;
		let master = self.raw()?;
		if let Some(mailbox) = &info.mailbox {
			mailbox.configure(master)?;
		}
		self.request_state(slave, AlState::PreOperational, false)?;
		if self.state_check(slave, AlState::PreOperational, timeout)? != AlState::PreOperational
			{return Err(EthercatError::Timeout("slave did not reach pre-operational"))}
		let info = self.slave(slave)?;
		info.mapping.apply(self.raw()?, slave_layout, layout.inputs_start())?;
		self.request_state(slave, AlState::SafeOperational, false)?;
		if self.state_check(slave, AlState::SafeOperational, timeout)? != AlState::SafeOperational
			{return Err(EthercatError::Timeout("slave did not reach safe-operational"))}
		Ok(())
	}

	fn recover(&mut self, slave: u16, timeout: Duration) -> EthercatResult {
		let station = self.slave(slave)?.station;
		let receive = self.config.receive_timeout;
		let master = self.master.as_mut().ok_or(EthercatError::Master("bus closed"))?;
		master.set_timeout(timeout);
		let result = readdress(master, slave - 1, station);
		master.set_timeout(receive);
		result
	}
}

/// give back its station address to the slave at the given position, a slave which was power cycled has lost it
fn readdress(master: &RawMaster, position: u16, station: u16) -> EthercatResult {
	let current = master.aprd(position, registers::address::fixed)?.one()?;
	if current != station {
		if current != 0
			{return Err(EthercatError::Protocol("another slave answers at this position"))}
		master.apwr(position, registers::address::fixed, station)?.one()?;
	}
	master.fprd(station, registers::al::status)?.one()?;
	Ok(())
}
