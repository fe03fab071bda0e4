/*!
	cyclic exchange of the process image, and supervision of the slaves communication states

	The cycle runs in a dedicated thread named `ethercat-cycle`. At each period it sends all outputs and receives all inputs in one exchange, and checks the working counter. A short working counter (or a pending state check) triggers a recovery pass of the [Supervisor].
*/

use core::time::Duration;
use std::{
	sync::{
		Arc, Mutex, PoisonError,
		atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering},
		},
	thread::{self, JoinHandle},
	time::Instant,
	};
use crate::{
	bus::{self, Fieldbus},
	image::ProcessImage,
	registers::AlState,
	config::MasterConfig,
	error::{EthercatError, EthercatResult},
	};

pub(crate) type SharedBus = Arc<Mutex<Box<dyn Fieldbus>>>;


/// health of one slave, as seen by the supervision
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SlaveHealth {
	/// last communication state read
	pub state: AlState,
	/// the slave did not answer anymore during the last checks
	pub lost: bool,
}

/// state shared between the master and its cyclic thread
#[derive(Debug, Default)]
pub(crate) struct CycleShared {
	/// cleared to stop the cycle
	pub running: AtomicBool,
	/// working counter of a complete exchange
	pub expected_wkc: AtomicU16,
	/// working counter of the last exchange
	pub last_wkc: AtomicU16,
	/// number of exchanges done
	pub cycles: AtomicU64,
	pub health: Mutex<Vec<SlaveHealth>>,
}
impl CycleShared {
	pub fn health(&self) -> Vec<SlaveHealth> {
		self.health.lock().unwrap_or_else(PoisonError::into_inner).clone()
	}
	pub fn set_health(&self, health: Vec<SlaveHealth>) {
		*self.health.lock().unwrap_or_else(PoisonError::into_inner) = health;
	}
}


/**
	recovery of slaves which left the operational state

	Each pass is a set of single bounded attempts, slaves still not operational are checked again in the next cycles. A pass runs in the cyclic thread, so its timeouts must stay well below the cycle period.
*/
pub struct Supervisor {
	health: Vec<SlaveHealth>,
	/// some slaves were not operational at the last pass
	check_state: bool,
	/// delay for a slave to answer before it is considered lost
	check: Duration,
	/// bound of each reconfiguration or recovery attempt
	timeout: Duration,
}
impl Supervisor {
	/**
		`slaves` is the number of slaves in the segment, all operational.
		`check` is the delay given to a slave to answer before it is marked lost, `timeout` bounds each recovery attempt.
	*/
	pub fn new(slaves: u16, check: Duration, timeout: Duration) -> Self {
		Self {
			health: vec![SlaveHealth {state: AlState::Operational, lost: false}; usize::from(slaves)],
			check_state: false,
			check,
			timeout,
		}
	}
	pub fn health(&self) -> &[SlaveHealth]  {&self.health}
	/// a recovery pass is pending
	pub fn check_state(&self) -> bool  {self.check_state}

	/// true if the given exchange result calls for a recovery pass
	pub fn needed(&self, wkc: u16, expected: u16) -> bool {
		wkc < expected || self.check_state
	}

	/// run one recovery pass on the slaves which are not operational
	pub fn recover(&mut self, bus: &mut dyn Fieldbus) -> EthercatResult {
		let states = bus.read_states()?;
		if states.len() != self.health.len()
			{return Err(EthercatError::Master("slave count changed"))}

		self.check_state = false;
		for (index, status) in states.iter().enumerate() {
			let slave = index as u16 + 1;
			let health = &mut self.health[index];
			health.state = status.state;

			if status.state != AlState::Operational {
				self.check_state = true;
				if status.state == AlState::SafeOperational && status.error {
					log::error!("slave {} is in SAFE_OP + ERROR ({}), attempting ack", slave, status.code);
					log_failure(slave, bus.request_state(slave, AlState::SafeOperational, true));
				}
				else if status.state == AlState::SafeOperational {
					log::warn!("slave {} is in SAFE_OP, change to OPERATIONAL", slave);
					log_failure(slave, bus.request_state(slave, AlState::Operational, false));
				}
				else if bus::rank(status.state) > bus::rank(AlState::Unknown) {
					match bus.reconfigure(slave, self.timeout) {
						Ok(()) => {
							health.lost = false;
							log::info!("slave {} reconfigured", slave);
							},
						Err(error) => log::debug!("slave {} reconfiguration failed: {}", slave, error),
					}
				}
				else if ! health.lost {
					match bus.state_check(slave, AlState::Operational, self.check) {
						Ok(AlState::Unknown) | Err(_) => {
							health.lost = true;
							log::error!("slave {} lost", slave);
							},
						Ok(state) => health.state = state,
					}
				}
			}
			if health.lost {
				if health.state == AlState::Unknown {
					match bus.recover(slave, self.timeout) {
						Ok(()) => {
							health.lost = false;
							log::info!("slave {} recovered", slave);
							},
						Err(error) => log::debug!("slave {} not recovered: {}", slave, error),
					}
				}
				else {
					health.lost = false;
					log::info!("slave {} found", slave);
				}
			}
		}
		if ! self.check_state {
			log::info!("all slaves resumed OPERATIONAL");
		}
		Ok(())
	}
}

fn log_failure(slave: u16, result: EthercatResult) {
	if let Err(error) = result {
		log::debug!("state request to slave {} failed: {}", slave, error);
	}
}


/// handle on the running cyclic thread
pub(crate) struct Cycle {
	shared: Arc<CycleShared>,
	handle: Option<JoinHandle<()>>,
}
impl Cycle {
	/// start the cyclic thread, it runs until [Self::stop]
	pub fn start(
			bus: SharedBus,
			image: Arc<ProcessImage>,
			shared: Arc<CycleShared>,
			slaves: u16,
			config: &MasterConfig,
			) -> EthercatResult<Self> {
		let period = config.cycle;
		let realtime = config.realtime;
		let supervisor = Supervisor::new(slaves, config.receive_timeout, config.monitor_timeout);
		shared.set_health(supervisor.health().to_vec());
		shared.running.store(true, Ordering::SeqCst);

		let handle = {
			let shared = shared.clone();
			thread::Builder::new()
				.name("ethercat-cycle".into())
				.spawn(move || {
					if realtime  {raise_priority()}
					run(bus, image, shared, supervisor, period)
				})
			};
		match handle {
			Ok(handle) => Ok(Self {shared, handle: Some(handle)}),
			Err(error) => {
				shared.running.store(false, Ordering::SeqCst);
				Err(error.into())
			},
		}
	}
	/// stop the cyclic thread and wait for its end
	pub fn stop(&mut self) {
		self.shared.running.store(false, Ordering::SeqCst);
		if let Some(handle) = self.handle.take() {
			if handle.join().is_err() {
				log::error!("cyclic thread panicked");
			}
		}
	}
}
impl Drop for Cycle {
	fn drop(&mut self)  {self.stop()}
}

fn run(bus: SharedBus, image: Arc<ProcessImage>, shared: Arc<CycleShared>, mut supervisor: Supervisor, period: Duration) {
	let mut outputs = vec![0; image.outputs_len()];
	let mut inputs = vec![0; image.inputs_len()];
	let mut next = Instant::now();
	log::debug!("cyclic exchange started, period {:?}", period);

	while shared.running.load(Ordering::SeqCst) {
		image.read_outputs(&mut outputs);
		let mut bus = bus.lock().unwrap_or_else(PoisonError::into_inner);
		let wkc = match bus.exchange(&outputs, &mut inputs) {
			Ok(wkc) => {
				image.write_inputs(&inputs);
				wkc
				},
			Err(error) => {
				log::trace!("process data exchange failed: {}", error);
				0
				},
			};
		shared.last_wkc.store(wkc, Ordering::Relaxed);
		shared.cycles.fetch_add(1, Ordering::Relaxed);

		let expected = shared.expected_wkc.load(Ordering::Relaxed);
		if supervisor.needed(wkc, expected) {
			if wkc < expected {
				log::debug!("working counter {} below {}", wkc, expected);
			}
			match supervisor.recover(&mut **bus) {
				Ok(()) => shared.set_health(supervisor.health().to_vec()),
				Err(error) => log::warn!("slaves states unreadable: {}", error),
			}
		}
		drop(bus);

		next += period;
		let now = Instant::now();
		match next.checked_duration_since(now) {
			Some(remaining) => thread::sleep(remaining),
			// overrun, restart the schedule from now
			None => next = now,
		}
	}
	log::debug!("cyclic exchange stopped");
}

#[cfg(target_os = "linux")]
fn raise_priority() {
	use thread_priority::*;
	match set_current_thread_priority(ThreadPriority::Max) {
		Ok(_) => log::debug!("cyclic thread priority set to max"),
		Err(error) => log::warn!("cannot raise the cyclic thread priority: {:?}", error),
	}
}
#[cfg(not(target_os = "linux"))]
fn raise_priority() {
	log::warn!("realtime priority is only supported on linux");
}


#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn recovery_trigger() {
		let supervisor = Supervisor::new(2, Duration::from_millis(2), Duration::from_micros(500));
		assert!(supervisor.needed(5, 6));
		assert!(! supervisor.needed(6, 6));
		assert!(! supervisor.check_state());
		assert_eq!(supervisor.health().len(), 2);
		assert!(supervisor.health().iter().all(|health| health.state == AlState::Operational && ! health.lost));
	}
}
