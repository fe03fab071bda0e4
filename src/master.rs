/*!
	the bus master: owns the segment, brings it up, and keeps the cyclic exchange running
*/

use core::time::Duration;
use std::{
	collections::BTreeMap,
	sync::{
		Arc, Mutex, MutexGuard, PoisonError,
		atomic::{AtomicBool, Ordering},
		},
	};
use crate::{
	bus::{Fieldbus, SlaveStatus},
	network::EthercatBus,
	mapping::Layout,
	image::{ProcessImage, ProcessData},
	cycle::{Cycle, CycleShared, SharedBus, SlaveHealth},
	registers::AlState,
	data::{PduData, Storage},
	sdo::Sdo,
	can::SdoAbortCode,
	config::MasterConfig,
	error::{EthercatError, EthercatResult},
	};


/**
	a device behind a slave, registered to the [Master] before its initialization

	The master calls [Self::configure] once the segment is discovered, then [Self::attach] once the process data is mapped. [Self::detach] is called when the process data stops being exchanged, at shutdown or after a failed initialization.
*/
pub trait Device: Send + Sync {
	/// 1-based position of the slave in the segment
	fn slave(&self) -> u16;
	/// one-time configuration through SDOs, done in [AlState::PreOperational]
	fn configure(&self, sdo: &mut ServiceData<'_>) -> EthercatResult<(), SdoAbortCode>;
	/// receive the handle to the slave's process data
	fn attach(&self, data: ProcessData) -> EthercatResult;
	/// forget the process data given by [Self::attach], it is no longer exchanged
	fn detach(&self) {}
}

/// SDO access to one slave, given to [Device::configure]
pub struct ServiceData<'a> {
	bus: &'a mut dyn Fieldbus,
	slave: u16,
}
impl<'a> ServiceData<'a> {
	pub fn new(bus: &'a mut dyn Fieldbus, slave: u16) -> Self  {Self {bus, slave}}
	pub fn slave(&self) -> u16  {self.slave}
	pub fn read<T: PduData>(&mut self, sdo: Sdo<T>) -> EthercatResult<T, SdoAbortCode> {
		sdo_read(self.bus, self.slave, sdo)
	}
	pub fn write<T: PduData>(&mut self, sdo: Sdo<T>, value: T) -> EthercatResult<(), SdoAbortCode> {
		sdo_write(self.bus, self.slave, sdo, value)
	}
}

fn sdo_read<T: PduData>(bus: &mut dyn Fieldbus, slave: u16, sdo: Sdo<T>) -> EthercatResult<T, SdoAbortCode> {
	let mut buffer = T::Packed::zeroed();
	let result = bus.sdo_read(slave, sdo.index, sdo.sub, buffer.as_mut())
		.and_then(|answer| answer.one().map_err(|error| error.upgrade()))
		.and_then(|size| if size < T::packed_size()
			{Err(EthercatError::Protocol("SDO smaller than its data type"))}
			else {Ok(T::unpack(buffer.as_ref())?)}
			);
	if let Err(error) = &result {
		log::error!("SDO read failed on slave {} at 0x{:04x}:{}: {}", slave, sdo.index, sdo.sub, error);
	}
	result
}

fn sdo_write<T: PduData>(bus: &mut dyn Fieldbus, slave: u16, sdo: Sdo<T>, value: T) -> EthercatResult<(), SdoAbortCode> {
	let mut buffer = T::Packed::zeroed();
	value.pack(buffer.as_mut())?;
	let result = bus.sdo_write(slave, sdo.index, sdo.sub, buffer.as_ref())
		.and_then(|answer| answer.one().map_err(|error| error.upgrade()));
	if let Err(error) = &result {
		log::error!("SDO write failed on slave {} at 0x{:04x}:{}: {}", slave, sdo.index, sdo.sub, error);
	}
	result
}


/// process image once mapped
struct Mapped {
	image: Arc<ProcessImage>,
	layout: Layout,
}

/**
	EtherCAT master of a fixed set of slaves

	## Example

	```ignore
	let master = Master::new("eno1", 2);
	let drive = Arc::new(Drive::new("shoulder", 1, DriveConfig::default(), DriveParam::default())?);
	master.register_device(drive.clone())?;
	master.initialize()?;
	drive.init()?;
	drive.position_command_rad(0.5, 1.)?;
	// ...
	master.shutdown();
	```
*/
pub struct Master {
	bus: SharedBus,
	expected: u16,
	config: MasterConfig,
	devices: Mutex<BTreeMap<u16, Arc<dyn Device>>>,
	mapped: Mutex<Option<Mapped>>,
	shared: Arc<CycleShared>,
	cycle: Mutex<Option<Cycle>>,
	initialized: AtomicBool,
}
impl Master {
	/// master on the given interface (an ethernet interface name or an IPv4 address), expecting `expected` slaves
	pub fn new(interface: &str, expected: u16) -> Self {
		let config = MasterConfig::default();
		Self::with_bus(Box::new(EthercatBus::new(interface, config.clone())), expected, config)
	}
	/// master on any implementation of the fieldbus
	pub fn with_bus(bus: Box<dyn Fieldbus>, expected: u16, config: MasterConfig) -> Self {
		Self {
			bus: Arc::new(Mutex::new(bus)),
			expected,
			config,
			devices: Mutex::new(BTreeMap::new()),
			mapped: Mutex::new(None),
			shared: Arc::new(CycleShared::default()),
			cycle: Mutex::new(None),
			initialized: AtomicBool::new(false),
		}
	}
	pub fn config(&self) -> &MasterConfig  {&self.config}

	/// add a device to configure at initialization, it is refused once the master is initialized
	pub fn register_device(&self, device: Arc<dyn Device>) -> EthercatResult {
		let mut devices = lock(&self.devices);
		if self.is_initialized()
			{return Err(EthercatError::Master("devices cannot be registered after initialization"))}
		let slave = device.slave();
		if slave == 0
			{return Err(EthercatError::Master("slave addresses start at 1"))}
		if devices.contains_key(&slave)
			{return Err(EthercatError::Master("a device is already registered for this slave"))}
		devices.insert(slave, device);
		log::debug!("device registered for slave {}", slave);
		Ok(())
	}
	/// number of registered devices
	pub fn devices(&self) -> usize  {lock(&self.devices).len()}

	pub fn is_initialized(&self) -> bool  {self.initialized.load(Ordering::SeqCst)}

	/**
		bring up the segment, configure and attach the registered devices, and start the cyclic exchange

		On failure the network is closed and the master stays uninitialized. Calling it on an initialized master does nothing.
	*/
	pub fn initialize(&self) -> EthercatResult {
		let devices = lock(&self.devices);
		if self.is_initialized()
			{return Ok(())}
		let mut bus = lock(&self.bus);
		if let Err(error) = bus.open() {
			log::error!("cannot open the network: {}", error);
			return Err(error)
		}
		match self.bring_up(&mut **bus, &devices) {
			Ok(mapped) => {
				let slaves = mapped.layout.slaves.len() as u16;
				drop(bus);
				let cycle = Cycle::start(self.bus.clone(), mapped.image.clone(), self.shared.clone(), slaves, &self.config);
				match cycle {
					Ok(cycle) => {
						*lock(&self.cycle) = Some(cycle);
						*lock(&self.mapped) = Some(mapped);
						self.initialized.store(true, Ordering::SeqCst);
						log::info!("master initialized, {} slaves operational", slaves);
						Ok(())
					},
					Err(error) => {
						log::error!("cannot start the cyclic exchange: {}", error);
						mapped.image.invalidate();
						detach(&devices);
						let mut bus = lock(&self.bus);
						let _ = bus.request_state(0, AlState::Init, false);
						bus.close();
						Err(error)
					},
				}
			},
			Err(error) => {
				log::error!("initialization failed: {}", error);
				bus.close();
				detach(&devices);
				Err(error)
			},
		}
	}

	fn bring_up(&self, bus: &mut dyn Fieldbus, devices: &BTreeMap<u16, Arc<dyn Device>>) -> EthercatResult<Mapped> {
		let found = bus.discover()?;
		log::info!("{} slaves found, {} expected", found, self.expected);
		if found != self.expected
			{return Err(EthercatError::Master("discovered slave count differs from the expected one"))}
		if devices.len() > usize::from(found)
			{return Err(EthercatError::Master("more devices registered than slaves found"))}
		if let Some(&slave) = devices.keys().find(|&&slave| slave > found) {
			log::error!("device registered for slave {} but only {} slaves found", slave, found);
			return Err(EthercatError::Master("device registered beyond the slaves found"))
		}

		for (&slave, device) in devices {
			device.configure(&mut ServiceData::new(bus, slave))
				.map_err(|error| {
					log::error!("configuration of slave {} failed: {}", slave, error);
					error.forget("slave configuration refused")
				})?;
		}

		let layout = bus.map()?;
		if layout.slaves.len() != usize::from(found)
			{return Err(EthercatError::Protocol("mapping does not cover all slaves"))}
		let image = Arc::new(ProcessImage::new(layout.outputs, layout.inputs));
		match self.operational(bus, devices, &image, &layout) {
			Ok(()) => Ok(Mapped {image, layout}),
			Err(error) => {
				image.invalidate();
				Err(error)
			},
		}
	}

	/// attach the devices to the image, then bring all slaves to operational while exchanging it
	fn operational(&self,
			bus: &mut dyn Fieldbus,
			devices: &BTreeMap<u16, Arc<dyn Device>>,
			image: &Arc<ProcessImage>,
			layout: &Layout,
			) -> EthercatResult {
		for (&slave, device) in devices {
			device.attach(ProcessData::new(image.clone(), layout.slaves[usize::from(slave - 1)].clone()))?;
		}

		bus.request_state(0, AlState::SafeOperational, false)?;
		let reached = bus.state_check(0, AlState::SafeOperational, self.config.safe_operational_timeout())?;
		if reached != AlState::SafeOperational {
			log::warn!("not all slaves reached SAFE_OP, lowest state {}", reached);
		}
		let expected = layout.expected_wkc();
		self.shared.expected_wkc.store(expected, Ordering::SeqCst);
		log::info!("expected working counter {}", expected);

		// slaves need valid outputs before entering operational
		let mut outputs = vec![0; layout.outputs];
		let mut inputs = vec![0; layout.inputs];
		let mut exchange = |bus: &mut dyn Fieldbus| {
			image.read_outputs(&mut outputs);
			match bus.exchange(&outputs, &mut inputs) {
				Ok(wkc) => {image.write_inputs(&inputs); wkc},
				Err(_) => 0,
			}
		};
		exchange(&mut *bus);
		bus.request_state(0, AlState::Operational, false)?;
		let mut operational = false;
		for attempt in 0 .. self.config.operational_retries {
			let wkc = exchange(&mut *bus);
			if bus.state_check(0, AlState::Operational, self.config.state_check)? == AlState::Operational {
				log::debug!("operational after {} attempts, working counter {}", attempt + 1, wkc);
				operational = true;
				break
			}
		}
		if ! operational {
			log::error!("not all slaves reached OPERATIONAL");
			for (index, status) in bus.read_states()?.iter().enumerate() {
				if status.state != AlState::Operational {
					log::error!("slave {} state=0x{:02x} status code=0x{:04x}: {}",
						index + 1, status.state.code(), status.code.0, status.code.description());
				}
			}
			let _ = bus.request_state(0, AlState::Init, false);
			return Err(EthercatError::Timeout("not all slaves reached operational"))
		}
		Ok(())
	}

	/**
		stop the cyclic exchange, bring slaves back to init, and close the network

		The devices are detached and every [ProcessData] given before fails from now on. It can be called any number of times, it is also called when the master is dropped.
	*/
	pub fn shutdown(&self) {
		if self.initialized.swap(false, Ordering::SeqCst) {
			if let Some(mut cycle) = lock(&self.cycle).take() {
				cycle.stop();
			}
			if let Some(mapped) = lock(&self.mapped).take() {
				mapped.image.invalidate();
			}
			detach(&lock(&self.devices));
			if let Err(error) = lock(&self.bus).request_state(0, AlState::Init, false) {
				log::warn!("cannot bring slaves back to INIT: {}", error);
			}
			log::info!("master shut down");
		}
		lock(&self.bus).close();
	}

	/// read an object in a slave's dictionnary, exactly one slave must answer
	pub fn read_service_data<T: PduData>(&self, slave: u16, index: u16, sub: u8) -> EthercatResult<T, SdoAbortCode> {
		self.read_object(slave, Sdo::new(index, sub))
	}
	/// write an object in a slave's dictionnary, its size is given by `T`. exactly one slave must answer
	pub fn write_service_data<T: PduData>(&self, slave: u16, index: u16, sub: u8, value: T) -> EthercatResult<(), SdoAbortCode> {
		self.write_object(slave, Sdo::new(index, sub), value)
	}
	/// same as [Self::read_service_data] with a typed object
	pub fn read_object<T: PduData>(&self, slave: u16, sdo: Sdo<T>) -> EthercatResult<T, SdoAbortCode> {
		let mut bus = lock(&self.bus);
		sdo_read(&mut **bus, slave, sdo)
	}
	/// same as [Self::write_service_data] with a typed object
	pub fn write_object<T: PduData>(&self, slave: u16, sdo: Sdo<T>, value: T) -> EthercatResult<(), SdoAbortCode> {
		let mut bus = lock(&self.bus);
		sdo_write(&mut **bus, slave, sdo, value)
	}

	/// handle to the process data of a slave
	pub fn process_data(&self, slave: u16) -> EthercatResult<ProcessData> {
		let mapped = lock(&self.mapped);
		let mapped = mapped.as_ref().ok_or(EthercatError::Master("process data not mapped"))?;
		let layout = usize::from(slave).checked_sub(1)
			.and_then(|index| mapped.layout.slaves.get(index))
			.ok_or(EthercatError::Master("process data not mapped"))?;
		Ok(ProcessData::new(mapped.image.clone(), layout.clone()))
	}
	/// copy of a slave's last received inputs
	pub fn inputs(&self, slave: u16) -> EthercatResult<Vec<u8>>  {self.process_data(slave)?.inputs()}
	/// copy of a slave's outputs to be sent
	pub fn outputs(&self, slave: u16) -> EthercatResult<Vec<u8>>  {self.process_data(slave)?.outputs()}

	/// number of slaves in the mapped segment, 0 before initialization
	pub fn slave_count(&self) -> u16 {
		lock(&self.mapped).as_ref().map(|mapped| mapped.layout.slaves.len() as u16).unwrap_or(0)
	}
	pub fn expected_working_counter(&self) -> u16  {self.shared.expected_wkc.load(Ordering::Relaxed)}
	pub fn last_working_counter(&self) -> u16  {self.shared.last_wkc.load(Ordering::Relaxed)}
	/// number of exchanges done by the cyclic thread since the start
	pub fn cycles(&self) -> u64  {self.shared.cycles.load(Ordering::Relaxed)}
	/// health of each slave as seen by the last recovery pass
	pub fn slave_states(&self) -> Vec<SlaveHealth>  {self.shared.health()}
	/// read the current communication status of all slaves, this waits for the bus
	pub fn read_states(&self) -> EthercatResult<Vec<SlaveStatus>>  {lock(&self.bus).read_states()}

	/// wait until the cyclic thread did `count` more exchanges, or the timeout elapsed
	pub fn wait_cycles(&self, count: u64, timeout: Duration) -> EthercatResult {
		let start = self.cycles();
		let deadline = std::time::Instant::now() + timeout;
		while self.cycles() < start + count {
			if ! self.is_initialized()
				{return Err(EthercatError::Master("master not initialized"))}
			if std::time::Instant::now() > deadline
				{return Err(EthercatError::Timeout("cyclic exchange stalled"))}
			std::thread::sleep(self.config.cycle / 2);
		}
		Ok(())
	}
}
impl Drop for Master {
	fn drop(&mut self)  {self.shutdown()}
}

fn detach(devices: &BTreeMap<u16, Arc<dyn Device>>) {
	for device in devices.values() {
		device.detach();
	}
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
	mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
