/*!
	controller of a CiA-402 servodrive, commanded through the cyclic process data

	A [Drive] is registered to the [Master](crate::Master), which configures it and gives it its process data. After that, every command and reading only touches the process image: nothing here waits for the network except the state transitions, which poll the status word received by the cyclic exchange.

	All positions are in radians, velocities in rad/s and torques in N.m at the joint, converted with the [DriveParam] of the drive.
*/

use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, atomic::{AtomicBool, Ordering}};
use crate::{
	master::{Device, ServiceData},
	image::ProcessData,
	cia402::{StatusWord, ControlWord, DriveState, DriveFaults, OperationMode},
	sdo::cia402,
	pdo::{self, rx, tx},
	param::DriveParam,
	config::DriveConfig,
	can::SdoAbortCode,
	data::{PackingResult, PduData},
	error::{EthercatError, EthercatResult},
	};


/// option code of object 0x605a keeping the drive in quick stop active once stopped
const QUICK_STOP_STAY: i16 = 6;
/// control word bits set by the state machine commands
const COMMAND_MASK: u16 = 0x008f;
/// active low quick stop bit of the control word
const QUICK_STOP_BIT: u16 = 0x0004;

pub type DriveResult<T=()> = EthercatResult<T, DriveFaults>;


/**
	one servodrive on the bus

	## Example

	```ignore
	let drive = Arc::new(Drive::new("elbow", 2, DriveConfig::default(), DriveParam::default())?);
	master.register_device(drive.clone())?;
	master.initialize()?;
	drive.init()?;
	drive.position_command_rad(1.2, 0.5)?;
	while ! drive.check_target_reached()? {
		std::thread::sleep(Duration::from_millis(10));
	}
	```
*/
pub struct Drive {
	name: String,
	slave: u16,
	config: DriveConfig,
	param: Mutex<DriveParam>,
	data: RwLock<Option<ProcessData>>,
	initialized: AtomicBool,
	mode: Mutex<OperationMode>,
	/// state before the emergency stop, if one is ongoing
	stopped: Mutex<Option<DriveState>>,
}
impl Drive {
	/// controller of the drive behind the given slave, the calibration must be valid
	pub fn new(name: impl Into<String>, slave: u16, config: DriveConfig, param: DriveParam) -> EthercatResult<Self> {
		param.validate()?;
		Ok(Self {
			name: name.into(),
			slave,
			mode: Mutex::new(config.mode),
			config,
			param: Mutex::new(param),
			data: RwLock::new(None),
			initialized: AtomicBool::new(false),
			stopped: Mutex::new(None),
		})
	}
	pub fn name(&self) -> &str  {&self.name}
	pub fn slave(&self) -> u16  {self.slave}
	pub fn config(&self) -> &DriveConfig  {&self.config}

	pub fn drive_param(&self) -> DriveParam  {*lock(&self.param)}
	/// replace the calibration, it must be valid
	pub fn set_drive_param(&self, param: DriveParam) -> EthercatResult {
		param.validate()?;
		*lock(&self.param) = param;
		Ok(())
	}

	fn data(&self) -> DriveResult<ProcessData> {
		self.data.read().unwrap_or_else(PoisonError::into_inner)
			.clone()
			.ok_or(EthercatError::Master("drive has no process data, is the master initialized ?"))
	}

	pub fn is_initialized(&self) -> bool  {self.initialized.load(Ordering::SeqCst)}

	/// select the configured operation mode and enable the drive, does nothing if already initialized
	pub fn init(&self) -> DriveResult {
		if self.is_initialized()
			{return Ok(())}
		let mode = *lock(&self.mode);
		self.write_mode(&self.data()?, mode)?;
		self.startup()?;
		self.initialized.store(true, Ordering::SeqCst);
		log::info!("drive {} initialized in {:?}", self.name, mode);
		Ok(())
	}

	/**
		bring the drive to [DriveState::OperationEnabled]

		The targets are first set to the current position with null velocity and torque, so the drive holds still once enabled. A drive in fault is not enabled, it must be [reset](Self::reset).
	*/
	pub fn startup(&self) -> DriveResult {
		let data = self.data()?;
		let status = data.get(tx::status).map_err(EthercatError::upgrade)?;
		if matches!(status.state(), DriveState::Fault | DriveState::FaultReactionActive) {
			let faults = DriveFaults::decode(status);
			log::error!("drive {} cannot start: {}", self.name, faults);
			return Err(EthercatError::Slave(faults))
		}
		let position = data.get(tx::position).map_err(EthercatError::upgrade)?;
		data.with_outputs(|outputs| -> PackingResult<()> {
			rx::target_position.try_set(outputs, position)?;
			rx::target_velocity.try_set(outputs, 0)?;
			rx::target_torque.try_set(outputs, 0)?;
			Ok(())
		}).map_err(EthercatError::upgrade)??;

		let result = self.reach(&data, DriveState::OperationEnabled);
		if let Err(error) = &result {
			log::error!("drive {} startup failed: {}", self.name, error);
		}
		result
	}

	/// disable the drive power stage, back to [DriveState::SwitchOnDisabled]
	pub fn shutdown(&self) -> DriveResult {
		self.initialized.store(false, Ordering::SeqCst);
		let data = self.data()?;
		self.reach(&data, DriveState::SwitchOnDisabled)?;
		log::info!("drive {} shut down", self.name);
		Ok(())
	}

	/// acknowledge a fault and restart the drive
	pub fn reset(&self) -> DriveResult {
		let data = self.data()?;
		// the reset is done on the rising edge of the bit
		self.command(&data, ControlWord::DISABLE_VOLTAGE)?;
		std::thread::sleep(self.config.poll);
		self.command(&data, ControlWord::FAULT_RESET)?;
		let mut reset = false;
		for _ in 0 .. self.config.retries {
			std::thread::sleep(self.config.poll);
			let state = self.status_from(&data)?.state();
			if ! matches!(state, DriveState::Fault | DriveState::FaultReactionActive) {
				reset = true;
				break
			}
		}
		self.command(&data, ControlWord::DISABLE_VOLTAGE)?;
		if ! reset {
			let faults = DriveFaults::decode(self.status_from(&data)?);
			log::error!("drive {} is still in fault after reset: {}", self.name, faults);
			return Err(EthercatError::Slave(faults))
		}
		log::info!("drive {} fault reset", self.name);
		self.startup()
	}

	/**
		walk the state machine to the given state, one transition per poll

		transitions through [DriveState::Fault] are not attempted, they return the drive faults
	*/
	fn reach(&self, data: &ProcessData, target: DriveState) -> DriveResult {
		use DriveState::*;
		let mut state = NotReadyToSwitchOn;
		for _ in 0 .. self.config.retries {
			let status = self.status_from(data)?;
			state = status.state();
			if state == target
				{return Ok(())}
			let command = match (state, target) {
				(Fault, _) | (FaultReactionActive, _) => {
					let faults = DriveFaults::decode(status);
					log::error!("drive {} in {} while going to {}: {}", self.name, state, target, faults);
					return Err(EthercatError::Slave(faults))
					},
				// the drive is booting, only wait
				(NotReadyToSwitchOn, _) => None,
				(_, SwitchOnDisabled) => Some(match state {
					OperationEnabled | SwitchedOn => ControlWord::SHUTDOWN,
					_ => ControlWord::DISABLE_VOLTAGE,
					}),
				(SwitchOnDisabled, _) => Some(ControlWord::SHUTDOWN),
				(ReadyToSwitchOn, _) => Some(ControlWord::SWITCH_ON),
				(SwitchedOn, ReadyToSwitchOn) => Some(ControlWord::SHUTDOWN),
				(SwitchedOn, _) => Some(ControlWord::ENABLE_OPERATION),
				(OperationEnabled, QuickStopActive) => Some(ControlWord::QUICK_STOP),
				(OperationEnabled, ReadyToSwitchOn) => Some(ControlWord::SHUTDOWN),
				(OperationEnabled, _) => Some(ControlWord::DISABLE_OPERATION),
				(QuickStopActive, OperationEnabled) => Some(ControlWord::ENABLE_OPERATION),
				(QuickStopActive, _) => Some(ControlWord::DISABLE_VOLTAGE),
				};
			if let Some(command) = command {
				log::trace!("drive {} in {}, command 0x{:02x}", self.name, state, command);
				self.command(data, command)?;
			}
			std::thread::sleep(self.config.poll);
		}
		let faults = DriveFaults::decode(self.status_from(data)?);
		log::error!("drive {} stuck in {} while going to {} ({})", self.name, state, target, faults);
		Err(EthercatError::Timeout("drive state transition"))
	}

	/// write state machine command bits, preserving the mode specific bits
	fn command(&self, data: &ProcessData, command: u16) -> DriveResult {
		data.with_outputs(|outputs| -> PackingResult<()> {
			let current = u16::from(rx::control.try_get(outputs)?);
			rx::control.try_set(outputs, ControlWord::from((current & !COMMAND_MASK) | command))
		}).map_err(EthercatError::upgrade)??;
		Ok(())
	}

	fn status_from(&self, data: &ProcessData) -> DriveResult<StatusWord> {
		data.get(tx::status).map_err(EthercatError::upgrade)
	}

	fn write_mode(&self, data: &ProcessData, mode: OperationMode) -> DriveResult {
		data.set(rx::mode, mode.code()).map_err(EthercatError::upgrade)
	}

	/// mode used for a command family, the current mode if it belongs to it
	fn mode_for(&self, family: fn(OperationMode) -> bool, fallback: OperationMode) -> OperationMode {
		let mut mode = lock(&self.mode);
		if ! family(*mode) {
			log::debug!("drive {} switches from {:?} to {:?}", self.name, *mode, fallback);
			*mode = fallback;
		}
		*mode
	}

	/**
		write the targets and the command bits of a set-point in one access to the outputs

		returns true if the new set-point bit was already set and must toggle
	*/
	fn write_setpoint(&self,
			data: &ProcessData,
			mode: OperationMode,
			execute: bool,
			targets: impl FnOnce(&mut [u8]) -> PackingResult<()>,
			) -> DriveResult<bool> {
		let toggle = data.with_outputs(|outputs| -> PackingResult<bool> {
			rx::mode.try_set(outputs, mode.code())?;
			targets(outputs)?;
			let mut control = rx::control.try_get(outputs)?;
			let mut toggle = false;
			if mode == OperationMode::ProfilePosition {
				control.set_change_immediately(true);
				if execute {
					toggle = control.new_setpoint();
					control.set_new_setpoint(! toggle);
				}
				else {
					control.set_new_setpoint(false);
				}
			}
			control.set_halt(! execute && ! mode.is_position());
			rx::control.try_set(outputs, control)?;
			Ok(toggle)
		}).map_err(EthercatError::upgrade)??;
		Ok(toggle)
	}

	/// raise the new set-point bit after it was cleared for a cycle
	fn raise_setpoint(&self, data: &ProcessData) -> DriveResult {
		std::thread::sleep(self.config.poll);
		data.with_outputs(|outputs| -> PackingResult<()> {
			let mut control = rx::control.try_get(outputs)?;
			control.set_new_setpoint(true);
			rx::control.try_set(outputs, control)
		}).map_err(EthercatError::upgrade)??;
		Ok(())
	}

	fn position_targets(&self, position: f64, velocity: f64) -> DriveResult<impl FnOnce(&mut [u8]) -> PackingResult<()>> {
		let param = self.drive_param();
		let position = param.position_to_counts(position).map_err(EthercatError::upgrade)?;
		let velocity = param.velocity_to_counts(velocity).map_err(EthercatError::upgrade)?;
		Ok(move |outputs: &mut [u8]| {
			rx::target_position.try_set(outputs, position)?;
			rx::target_velocity.try_set(outputs, velocity)
		})
	}

	/**
		move to a position (rad), the velocity (rad/s) is a feed-forward in cyclic modes

		The command is executed immediately: in profile position mode a new set-point is raised, interrupting the current one.
	*/
	pub fn position_command_rad(&self, position: f64, velocity: f64) -> DriveResult {
		let data = self.data()?;
		let targets = self.position_targets(position, velocity)?;
		let mode = self.mode_for(OperationMode::is_position, OperationMode::CyclicSyncPosition);
		if self.write_setpoint(&data, mode, true, targets)? {
			self.raise_setpoint(&data)?;
		}
		Ok(())
	}
	/// same as [Self::position_command_rad] but the set-point is only executed by [Self::command_set_point]
	pub fn position_set_point_rad(&self, position: f64, velocity: f64) -> DriveResult {
		let data = self.data()?;
		let targets = self.position_targets(position, velocity)?;
		let mode = self.mode_for(OperationMode::is_position, OperationMode::CyclicSyncPosition);
		self.write_setpoint(&data, mode, false, targets)?;
		Ok(())
	}
	/// rotate at the given velocity (rad/s)
	pub fn velocity_command_rad_s(&self, velocity: f64) -> DriveResult {
		let data = self.data()?;
		let velocity = self.drive_param().velocity_to_counts(velocity).map_err(EthercatError::upgrade)?;
		let mode = self.mode_for(OperationMode::is_velocity, OperationMode::CyclicSyncVelocity);
		self.write_setpoint(&data, mode, true, move |outputs| rx::target_velocity.try_set(outputs, velocity))?;
		Ok(())
	}
	/// same as [Self::velocity_command_rad_s] but the drive halts until [Self::command_set_point]
	pub fn velocity_set_point_rad_s(&self, velocity: f64) -> DriveResult {
		let data = self.data()?;
		let velocity = self.drive_param().velocity_to_counts(velocity).map_err(EthercatError::upgrade)?;
		let mode = self.mode_for(OperationMode::is_velocity, OperationMode::CyclicSyncVelocity);
		self.write_setpoint(&data, mode, false, move |outputs| rx::target_velocity.try_set(outputs, velocity))?;
		Ok(())
	}
	/// apply the given torque (N.m)
	pub fn torque_command_nm(&self, torque: f64) -> DriveResult {
		let data = self.data()?;
		let torque = self.drive_param().torque_to_per_mille(torque).map_err(EthercatError::upgrade)?;
		let mode = self.mode_for(OperationMode::is_torque, OperationMode::CyclicSyncTorque);
		self.write_setpoint(&data, mode, true, move |outputs| rx::target_torque.try_set(outputs, torque))?;
		Ok(())
	}
	/// execute the last set-point written
	pub fn command_set_point(&self) -> DriveResult {
		let data = self.data()?;
		let mode = *lock(&self.mode);
		if self.write_setpoint(&data, mode, true, |_| Ok(()))? {
			self.raise_setpoint(&data)?;
		}
		Ok(())
	}

	/// the drive reports the target position or velocity is reached
	pub fn check_target_reached(&self) -> DriveResult<bool> {
		Ok(self.status_word()?.target_reached())
	}
	/// actual position (rad)
	pub fn position_rad(&self) -> DriveResult<f64> {
		Ok(self.drive_param().counts_to_position(self.input(tx::position)?))
	}
	/// actual velocity (rad/s)
	pub fn velocity_rad_s(&self) -> DriveResult<f64> {
		Ok(self.drive_param().counts_to_velocity(self.input(tx::velocity)?))
	}
	/// actual torque (N.m)
	pub fn torque_nm(&self) -> DriveResult<f64> {
		Ok(self.drive_param().per_mille_to_torque(self.input(tx::torque)?))
	}
	/// raw value of the drive's analog input
	pub fn analog_input(&self) -> DriveResult<i16>  {self.input(tx::analog_input)}
	/// position (rad) of the auxiliary sensor wired to the analog input
	pub fn auxiliary_position_rad(&self) -> DriveResult<f64> {
		Ok(self.drive_param().analog_to_position(self.analog_input()?))
	}

	fn input<T: PduData>(&self, field: crate::data::Field<T>) -> DriveResult<T> {
		self.data()?.get(field).map_err(EthercatError::upgrade)
	}

	pub fn status_word(&self) -> DriveResult<StatusWord>  {self.input(tx::status)}
	pub fn drive_state(&self) -> DriveResult<DriveState>  {Ok(self.status_word()?.state())}
	/// fault indications of the last status word
	pub fn error(&self) -> DriveResult<DriveFaults>  {Ok(DriveFaults::decode(self.status_word()?))}
	/// true if the drive reports an error preventing its operation
	pub fn is_error(&self) -> DriveResult<bool>  {Ok(self.error()?.is_error())}

	/// mode requested to the drive
	pub fn operation_mode(&self) -> OperationMode  {*lock(&self.mode)}
	/// change the mode requested to the drive, the drive must support it
	pub fn set_operation_mode(&self, mode: OperationMode) -> DriveResult {
		*lock(&self.mode) = mode;
		if let Ok(data) = self.data() {
			self.write_mode(&data, mode)?;
		}
		Ok(())
	}
	/// mode the drive reports to be running
	pub fn operation_mode_display(&self) -> DriveResult<OperationMode> {
		OperationMode::try_from(self.input(tx::mode_display)?)
			.map_err(|_| EthercatError::Protocol("drive reports an unknown operation mode"))
	}

	/**
		stop the drive with its quick stop ramp

		Succeeds once the drive reports [DriveState::QuickStopActive], or [DriveState::SwitchOnDisabled] if it was not enabled.
	*/
	pub fn set_emergency_stop(&self) -> DriveResult {
		let data = self.data()?;
		{
			let mut stopped = lock(&self.stopped);
			if stopped.is_none() {
				*stopped = Some(self.status_from(&data)?.state());
			}
		}
		data.with_outputs(|outputs| -> PackingResult<()> {
			let current = u16::from(rx::control.try_get(outputs)?);
			rx::control.try_set(outputs, ControlWord::from(current & !QUICK_STOP_BIT))
		}).map_err(EthercatError::upgrade)??;
		log::warn!("drive {} emergency stop", self.name);

		for _ in 0 .. self.config.retries {
			std::thread::sleep(self.config.poll);
			if matches!(self.status_from(&data)?.state(), DriveState::QuickStopActive | DriveState::SwitchOnDisabled)
				{return Ok(())}
		}
		let status = self.status_from(&data)?;
		log::error!("drive {} did not stop, still in {}", self.name, status.state());
		Err(EthercatError::Timeout("drive quick stop"))
	}

	/// release the emergency stop and return to the state before it
	pub fn reset_emergency_stop(&self) -> DriveResult {
		let data = self.data()?;
		let Some(previous) = *lock(&self.stopped)
			else {return Ok(())};
		data.with_outputs(|outputs| -> PackingResult<()> {
			let current = u16::from(rx::control.try_get(outputs)?);
			rx::control.try_set(outputs, ControlWord::from(current | QUICK_STOP_BIT))
		}).map_err(EthercatError::upgrade)??;

		let result = match previous {
			DriveState::OperationEnabled => self.startup(),
			DriveState::ReadyToSwitchOn | DriveState::SwitchedOn => self.reach(&data, previous),
			_ => self.reach(&data, DriveState::SwitchOnDisabled),
			};
		if result.is_ok() {
			lock(&self.stopped).take();
			log::info!("drive {} emergency stop released, back to {}", self.name, previous);
		}
		result
	}
	/// true while an emergency stop is not released
	pub fn is_emergency_stopped(&self) -> bool  {lock(&self.stopped).is_some()}
}

impl Device for Drive {
	fn slave(&self) -> u16  {self.slave}

	fn configure(&self, sdo: &mut ServiceData<'_>) -> EthercatResult<(), SdoAbortCode> {
		use crate::sdo::mapping::*;
		log::debug!("configuring drive {} on slave {}", self.name, sdo.slave());
		for (assign, object, entries) in [
				(RX_ASSIGN, RX_PDO, pdo::rx::mapping()),
				(TX_ASSIGN, TX_PDO, pdo::tx::mapping()),
				] {
			// mapping objects can only be changed while unassigned and empty
			sdo.write(count(assign), 0)?;
			sdo.write(count(object), 0)?;
			for (sub, item) in (1 ..).zip(entries) {
				sdo.write(entry(object, sub), item)?;
			}
			sdo.write(count(object), entries.len() as u8)?;
			sdo.write(assigned(assign, 1), object)?;
			sdo.write(count(assign), 1)?;
		}

		let mode = self.config.mode;
		let supported = sdo.read(cia402::modes::SUPPORTED)?;
		if ! mode.supported_by(supported) {
			log::error!("drive {} does not support {:?}, supported modes 0x{:08x}", self.name, mode, supported);
			return Err(EthercatError::Master("operation mode not supported by the drive"))
		}
		sdo.write(cia402::stop_options::QUICK_STOP, QUICK_STOP_STAY)?;

		let param = self.drive_param();
		let velocity = param.profile_velocity().map_err(EthercatError::upgrade)?;
		let acceleration = param.profile_acceleration().map_err(EthercatError::upgrade)?;
		sdo.write(cia402::position::MAX_PROFILE_VELOCITY, velocity)?;
		sdo.write(cia402::position::PROFILE_ACCELERATION, acceleration)?;
		sdo.write(cia402::position::PROFILE_DECELERATION, acceleration)?;
		sdo.write(cia402::position::QUICK_STOP_DECELERATION, acceleration)?;
		sdo.write(cia402::modes::OPERATION, mode.code() as i8)?;
		Ok(())
	}

	fn attach(&self, data: ProcessData) -> EthercatResult {
		if data.outputs_range().len() < rx::SIZE || data.inputs_range().len() < tx::SIZE {
			log::error!("drive {} process data is {}/{} bytes, {}/{} expected",
				self.name, data.outputs_range().len(), data.inputs_range().len(), rx::SIZE, tx::SIZE);
			return Err(EthercatError::Master("drive process data too small"))
		}
		let mode = *lock(&self.mode);
		data.set(rx::mode, mode.code())?;
		*self.data.write().unwrap_or_else(PoisonError::into_inner) = Some(data);
		Ok(())
	}

	fn detach(&self) {
		if self.data.write().unwrap_or_else(PoisonError::into_inner).take().is_some() {
			log::debug!("drive {} detached from its process data", self.name);
		}
		self.initialized.store(false, Ordering::SeqCst);
		lock(&self.stopped).take();
	}
}

impl core::fmt::Debug for Drive {
	fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
		f.debug_struct("Drive")
			.field("name", &self.name)
			.field("slave", &self.slave)
			.field("mode", &self.operation_mode())
			.field("initialized", &self.is_initialized())
			.finish()
	}
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
	mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
