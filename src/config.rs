//! settings of the master and drives, defaults are the values working with most CiA-402 drives

use core::time::Duration;
use crate::cia402::OperationMode;


/// timings and retry budgets of the bus master
#[derive(Clone, Debug, PartialEq)]
pub struct MasterConfig {
	/// period of the cyclic exchange
	pub cycle: Duration,
	/// number of attempts to reach [AlState::Operational](crate::registers::AlState::Operational) during initialization
	pub operational_retries: u32,
	/// maximum time a slave may take to change its state during initialization, the transition to safe-operational is given 4 times this delay
	pub state_timeout: Duration,
	/// maximum delay waiting for the answer of a frame, also the delay given to a slave to answer before the supervision marks it lost
	pub receive_timeout: Duration,
	/// bound of each reconfiguration or recovery attempt of the supervision, it runs in the cyclic thread so it must stay below the cycle period
	pub monitor_timeout: Duration,
	/// maximum duration of an SDO transaction
	pub sdo_timeout: Duration,
	/// delay given to slaves for each state check during the operational attempts
	pub state_check: Duration,
	/// raise the priority of the cyclic thread
	pub realtime: bool,
}
impl Default for MasterConfig {
	fn default() -> Self {
		Self {
			cycle: Duration::from_millis(5),
			operational_retries: 40,
			state_timeout: Duration::from_secs(2),
			receive_timeout: Duration::from_millis(2),
			monitor_timeout: Duration::from_micros(500),
			sdo_timeout: Duration::from_millis(700),
			state_check: Duration::from_millis(50),
			realtime: true,
		}
	}
}
impl MasterConfig {
	pub fn with_cycle(mut self, cycle: Duration) -> Self  {self.cycle = cycle; self}
	pub fn with_operational_retries(mut self, retries: u32) -> Self  {self.operational_retries = retries; self}
	pub fn with_state_timeout(mut self, timeout: Duration) -> Self  {self.state_timeout = timeout; self}
	pub fn with_receive_timeout(mut self, timeout: Duration) -> Self  {self.receive_timeout = timeout; self}
	pub fn with_monitor_timeout(mut self, timeout: Duration) -> Self  {self.monitor_timeout = timeout; self}
	pub fn with_sdo_timeout(mut self, timeout: Duration) -> Self  {self.sdo_timeout = timeout; self}
	pub fn with_state_check(mut self, delay: Duration) -> Self  {self.state_check = delay; self}
	pub fn with_realtime(mut self, realtime: bool) -> Self  {self.realtime = realtime; self}

	/// time allowed to reach safe-operational
	pub fn safe_operational_timeout(&self) -> Duration  {self.state_timeout * 4}
}


/// settings of one drive controller
#[derive(Clone, Debug, PartialEq)]
pub struct DriveConfig {
	/// mode selected at drive initialization
	pub mode: OperationMode,
	/// number of status word polls before a state transition is considered failed
	pub retries: u32,
	/// delay between status word polls
	pub poll: Duration,
}
impl Default for DriveConfig {
	fn default() -> Self {
		Self {
			mode: OperationMode::CyclicSyncPosition,
			retries: 100,
			poll: Duration::from_millis(10),
		}
	}
}
impl DriveConfig {
	pub fn with_mode(mut self, mode: OperationMode) -> Self  {self.mode = mode; self}
	pub fn with_retries(mut self, retries: u32) -> Self  {self.retries = retries; self}
	pub fn with_poll(mut self, poll: Duration) -> Self  {self.poll = poll; self}
}
