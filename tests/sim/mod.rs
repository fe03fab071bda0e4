//! simulated ethercat segment of CiA-402 drives, shared by the integration tests

#![allow(dead_code)]

use core::time::Duration;
use std::{
	collections::HashMap,
	sync::{Arc, Mutex, MutexGuard},
	time::Instant,
	};
use etherdrive::{
	Fieldbus, SlaveStatus, AlState, AlError, PduAnswer, SdoAbortCode,
	EthercatError, EthercatResult, DriveState,
	Master, MasterConfig, Drive, DriveConfig, DriveParam,
	mapping::{Layout, Mapping},
	pdo::{rx, tx},
	bus,
	};


/// drive behind a simulated slave, following the CiA-402 state machine on each exchange
#[derive(Clone, Debug)]
pub struct SimDrive {
	pub state: DriveState,
	/// refuses to leave switch on disabled
	pub stuck: bool,
	pub position: i32,
	pub velocity: i32,
	pub torque: i16,
	pub analog: i16,
	pub mode: u8,
	last_control: u16,
	target_reached: bool,
}
impl SimDrive {
	fn new() -> Self {
		Self {
			state: DriveState::SwitchOnDisabled,
			stuck: false,
			position: 1000,
			velocity: 0,
			torque: 0,
			analog: 0,
			mode: 0,
			last_control: 0,
			target_reached: false,
		}
	}

	fn status(&self) -> u16 {
		let status = match self.state {
			DriveState::NotReadyToSwitchOn => 0x0200,
			DriveState::SwitchOnDisabled => 0x0250,
			DriveState::ReadyToSwitchOn => 0x0231,
			DriveState::SwitchedOn => 0x0233,
			DriveState::OperationEnabled => 0x0237,
			DriveState::QuickStopActive => 0x0217,
			DriveState::FaultReactionActive => 0x021f,
			DriveState::Fault => 0x0218,
			};
		if self.target_reached && self.state == DriveState::OperationEnabled
			{status | 0x0400}
		else
			{status}
	}

	fn receive(&mut self, outputs: &[u8]) {
		use DriveState::*;
		let control = u16::from(rx::control.get(outputs));
		self.mode = rx::mode.get(outputs);
		let reset = control & 0x80 != 0 && self.last_control & 0x80 == 0;
		let setpoint = control & 0x10 != 0 && self.last_control & 0x10 == 0;
		self.last_control = control;

		let disable_voltage = control & 0x02 == 0;
		let quick_stop = control & 0x06 == 0x02;
		let shutdown = control & 0x07 == 0x06;
		let switch_on = control & 0x0f == 0x07;
		let enable = control & 0x0f == 0x0f;
		self.state = match self.state {
			Fault => if reset {SwitchOnDisabled} else {Fault},
			SwitchOnDisabled => if shutdown && ! self.stuck {ReadyToSwitchOn} else {SwitchOnDisabled},
			ReadyToSwitchOn =>
				if disable_voltage || quick_stop {SwitchOnDisabled}
				else if switch_on {SwitchedOn}
				else if enable {OperationEnabled}
				else {ReadyToSwitchOn},
			SwitchedOn =>
				if disable_voltage || quick_stop {SwitchOnDisabled}
				else if shutdown {ReadyToSwitchOn}
				else if enable {OperationEnabled}
				else {SwitchedOn},
			OperationEnabled =>
				if disable_voltage {SwitchOnDisabled}
				else if quick_stop {QuickStopActive}
				else if shutdown {ReadyToSwitchOn}
				else if switch_on {SwitchedOn}
				else {OperationEnabled},
			QuickStopActive =>
				if disable_voltage {SwitchOnDisabled}
				else if enable {OperationEnabled}
				else {QuickStopActive},
			other => other,
			};

		if self.state != OperationEnabled {
			self.velocity = 0;
			self.target_reached = false;
			return
		}
		let target_position = rx::target_position.get(outputs);
		let target_velocity = rx::target_velocity.get(outputs);
		let halt = control & 0x100 != 0;
		match self.mode {
			1 => if setpoint {self.position = target_position},
			7 | 8 => self.position = target_position,
			3 | 9 => self.velocity = if halt {0} else {target_velocity},
			4 | 10 => self.torque = rx::target_torque.get(outputs),
			_ => {},
		}
		self.target_reached = match self.mode {
			1 | 7 | 8 => self.position == target_position,
			3 | 9 => self.velocity == target_velocity,
			_ => false,
		};
	}

	fn send(&self, inputs: &mut [u8]) {
		tx::status.set(inputs, self.status().into());
		tx::mode_display.set(inputs, self.mode);
		tx::position.set(inputs, self.position);
		tx::velocity.set(inputs, self.velocity);
		tx::torque.set(inputs, self.torque);
		tx::analog_input.set(inputs, self.analog);
	}
}

#[derive(Clone, Debug)]
pub struct SimSlave {
	pub state: AlState,
	pub error: bool,
	pub code: AlError,
	/// the slave does not answer anymore
	pub lost: bool,
	pub drive: SimDrive,
}

#[derive(Debug, Default)]
pub struct SimState {
	pub open: bool,
	pub fail_open: bool,
	pub refuse_operational: bool,
	pub slaves: Vec<SimSlave>,
	pub layout: Option<Layout>,
	/// dictionnary objects of each slave, by (slave, index, sub)
	pub dictionary: HashMap<(u16, u16, u8), Vec<u8>>,
	/// state changes and recovery actions done on the bus, in order
	pub actions: Vec<String>,
	pub exchanges: u64,
}
impl SimState {
	fn slaves_mut(&mut self, slave: u16) -> impl Iterator<Item=&mut SimSlave> {
		let index = usize::from(slave);
		self.slaves.iter_mut().enumerate()
			.filter(move |(i, _)| index == 0 || i + 1 == index)
			.map(|(_, slave)| slave)
	}
}

/// segment of simulated drives, given to the master
pub struct SimBus {
	state: Arc<Mutex<SimState>>,
}
/// access to the simulated segment while the master owns it
#[derive(Clone)]
pub struct SimHandle {
	state: Arc<Mutex<SimState>>,
}

impl SimBus {
	/// segment of `count` drives supporting the profile and cyclic modes
	pub fn new(count: u16) -> (Self, SimHandle) {
		let mut state = SimState::default();
		for slave in 1 ..= count {
			state.slaves.push(SimSlave {
				state: AlState::Init,
				error: false,
				code: AlError::NO_ERROR,
				lost: false,
				drive: SimDrive::new(),
			});
			// PP, PV, PT, CSP, CSV, CST
			state.dictionary.insert((slave, 0x6502, 0), 0x0000_038du32.to_le_bytes().to_vec());
		}
		let state = Arc::new(Mutex::new(state));
		(Self {state: state.clone()}, SimHandle {state})
	}
	fn lock(&self) -> MutexGuard<'_, SimState>  {self.state.lock().unwrap()}
}

impl Fieldbus for SimBus {
	fn open(&mut self) -> EthercatResult {
		let mut sim = self.lock();
		if sim.fail_open
			{return Err(EthercatError::Io(Arc::new(std::io::Error::from(std::io::ErrorKind::NotFound))))}
		sim.open = true;
		Ok(())
	}
	fn close(&mut self)  {self.lock().open = false}
	fn is_open(&self) -> bool  {self.lock().open}

	fn discover(&mut self) -> EthercatResult<u16> {
		let mut sim = self.lock();
		if ! sim.open
			{return Err(EthercatError::Master("bus closed"))}
		let mut found = 0;
		for slave in sim.slaves.iter_mut().filter(|slave| ! slave.lost) {
			slave.state = AlState::PreOperational;
			found += 1;
		}
		Ok(found)
	}
	fn map(&mut self) -> EthercatResult<Layout> {
		let mut sim = self.lock();
		let mut mapping = Mapping::new();
		for _ in &sim.slaves {
			mapping.slave(rx::SIZE, tx::SIZE);
		}
		let layout = mapping.finish();
		sim.layout = Some(layout.clone());
		Ok(layout)
	}

	fn request_state(&mut self, slave: u16, state: AlState, ack: bool) -> EthercatResult {
		let mut sim = self.lock();
		if ! sim.open
			{return Err(EthercatError::Master("bus closed"))}
		sim.actions.push(format!("request {} {}{}", slave, state, if ack {" ack"} else {""}));
		let refuse = sim.refuse_operational && state == AlState::Operational;
		for target in sim.slaves_mut(slave).filter(|target| ! target.lost) {
			if ack {
				target.error = false;
				target.code = AlError::NO_ERROR;
			}
			if refuse {
				target.error = true;
				target.code = AlError::SYNC_WATCHDOG;
			}
			else if ! target.error {
				target.state = state;
			}
		}
		Ok(())
	}
	fn state_check(&mut self, slave: u16, state: AlState, timeout: Duration) -> EthercatResult<AlState> {
		// polls until the deadline like a real segment, without blocking the handle meanwhile
		let deadline = Instant::now() + timeout;
		loop {
			let reached = self.lock().slaves_mut(slave)
				.map(|target| if target.lost {AlState::Unknown} else {target.state})
				.min_by_key(|&state| bus::rank(state))
				.unwrap_or(AlState::Unknown);
			if reached == state || Instant::now() > deadline
				{return Ok(reached)}
			std::thread::sleep(Duration::from_micros(100));
		}
	}
	fn read_states(&mut self) -> EthercatResult<Vec<SlaveStatus>> {
		let sim = self.lock();
		Ok(sim.slaves.iter().map(|slave|
			if slave.lost {SlaveStatus::missing()}
			else {SlaveStatus {state: slave.state, error: slave.error, code: slave.code}}
			).collect())
	}

	fn exchange(&mut self, outputs: &[u8], inputs: &mut [u8]) -> EthercatResult<u16> {
		let mut sim = self.lock();
		if ! sim.open
			{return Err(EthercatError::Master("bus closed"))}
		let layout = sim.layout.clone().ok_or(EthercatError::Master("not mapped"))?;
		sim.exchanges += 1;
		let mut wkc = 0;
		for (slave, place) in sim.slaves.iter_mut().zip(&layout.slaves) {
			if slave.lost
				{continue}
			match slave.state {
				AlState::Operational => {
					slave.drive.receive(&outputs[place.outputs.clone()]);
					slave.drive.send(&mut inputs[place.inputs.clone()]);
					wkc += 3;
					},
				AlState::SafeOperational => {
					slave.drive.send(&mut inputs[place.inputs.clone()]);
					wkc += 1;
					},
				_ => {},
			}
		}
		Ok(wkc)
	}

	fn sdo_read(&mut self, slave: u16, index: u16, sub: u8, data: &mut [u8]) -> EthercatResult<PduAnswer<usize>, SdoAbortCode> {
		let sim = self.lock();
		let value = sim.dictionary.get(&(slave, index, sub))
			.ok_or(EthercatError::Slave(SdoAbortCode::INVALID_INDEX))?;
		if value.len() > data.len()
			{return Err(EthercatError::Slave(SdoAbortCode::INVALID_LENGTH))}
		data[.. value.len()].copy_from_slice(value);
		Ok(PduAnswer {answers: 1, value: value.len()})
	}
	fn sdo_write(&mut self, slave: u16, index: u16, sub: u8, data: &[u8]) -> EthercatResult<PduAnswer<()>, SdoAbortCode> {
		let mut sim = self.lock();
		if usize::from(slave) > sim.slaves.len() || slave == 0
			{return Ok(PduAnswer {answers: 0, value: ()})}
		sim.dictionary.insert((slave, index, sub), data.to_vec());
		Ok(PduAnswer {answers: 1, value: ()})
	}

	fn reconfigure(&mut self, slave: u16, _timeout: Duration) -> EthercatResult {
		let mut sim = self.lock();
		sim.actions.push(format!("reconfigure {}", slave));
		for target in sim.slaves_mut(slave) {
			target.state = AlState::SafeOperational;
			target.error = false;
		}
		Ok(())
	}
	fn recover(&mut self, slave: u16, timeout: Duration) -> EthercatResult {
		let lost = {
			let mut sim = self.lock();
			sim.actions.push(format!("recover {}", slave));
			let lost = sim.slaves_mut(slave).any(|target| target.lost);
			lost
		};
		if lost {
			// nobody answers before the timeout
			std::thread::sleep(timeout);
			return Err(EthercatError::Timeout("slave does not answer"))
		}
		Ok(())
	}
}

impl SimHandle {
	pub fn lock(&self) -> MutexGuard<'_, SimState>  {self.state.lock().unwrap()}

	pub fn is_open(&self) -> bool  {self.lock().open}
	pub fn fail_open(&self)  {self.lock().fail_open = true}
	pub fn refuse_operational(&self)  {self.lock().refuse_operational = true}
	pub fn actions(&self) -> Vec<String>  {self.lock().actions.clone()}
	pub fn clear_actions(&self)  {self.lock().actions.clear()}
	pub fn exchanges(&self) -> u64  {self.lock().exchanges}

	pub fn al_state(&self, slave: u16) -> AlState  {self.lock().slaves[usize::from(slave - 1)].state}
	pub fn set_al_state(&self, slave: u16, state: AlState) {
		self.lock().slaves[usize::from(slave - 1)].state = state;
	}
	/// make a slave fall back to the given state with an error to acknowledge
	pub fn set_error(&self, slave: u16, state: AlState, code: AlError) {
		let mut sim = self.lock();
		let target = &mut sim.slaves[usize::from(slave - 1)];
		target.state = state;
		target.error = true;
		target.code = code;
	}
	/// disconnect a slave, when reconnected it restarts in init
	pub fn set_lost(&self, slave: u16, lost: bool) {
		let mut sim = self.lock();
		let target = &mut sim.slaves[usize::from(slave - 1)];
		target.lost = lost;
		if ! lost {
			target.state = AlState::Init;
		}
	}

	pub fn drive(&self, slave: u16) -> SimDrive  {self.lock().slaves[usize::from(slave - 1)].drive.clone()}
	pub fn fault(&self, slave: u16) {
		self.lock().slaves[usize::from(slave - 1)].drive.state = DriveState::Fault;
	}
	pub fn set_stuck(&self, slave: u16, stuck: bool) {
		self.lock().slaves[usize::from(slave - 1)].drive.stuck = stuck;
	}
	pub fn set_analog(&self, slave: u16, analog: i16) {
		self.lock().slaves[usize::from(slave - 1)].drive.analog = analog;
	}
	/// raw value of a dictionnary object
	pub fn object(&self, slave: u16, index: u16, sub: u8) -> Option<Vec<u8>> {
		self.lock().dictionary.get(&(slave, index, sub)).cloned()
	}
}


/// master settings fast enough for tests
pub fn config() -> MasterConfig {
	MasterConfig::default()
		.with_cycle(Duration::from_millis(1))
		.with_operational_retries(5)
		.with_state_timeout(Duration::from_millis(50))
		.with_state_check(Duration::from_millis(1))
		.with_realtime(false)
}

pub fn drive_config() -> DriveConfig {
	DriveConfig::default()
		.with_poll(Duration::from_millis(3))
		.with_retries(60)
}

pub fn init_logger() {
	let _ = env_logger::builder().is_test(true).try_init();
}

/// initialized master over `count` simulated drives, one registered per slave
pub fn setup(count: u16, drive: DriveConfig) -> (Master, Vec<Arc<Drive>>, SimHandle) {
	init_logger();
	let (bus, handle) = SimBus::new(count);
	let master = Master::with_bus(Box::new(bus), count, config());
	let drives = (1 ..= count).map(|slave| {
		let drive = Arc::new(Drive::new(format!("joint{}", slave), slave, drive.clone(), DriveParam::default()).unwrap());
		master.register_device(drive.clone()).unwrap();
		drive
	}).collect::<Vec<_>>();
	master.initialize().unwrap();
	(master, drives, handle)
}

/// poll a condition until it is true or the timeout elapsed
pub fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
	let start = Instant::now();
	while start.elapsed() < timeout {
		if condition()
			{return true}
		std::thread::sleep(Duration::from_millis(1));
	}
	condition()
}
