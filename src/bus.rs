/*!
	bus-level operations the [Master](crate::master::Master) relies on.

	[Fieldbus] is implemented by [EthercatBus](crate::network::EthercatBus) on a real ethercat segment. Any other implementor (a simulated segment for instance) can be given to [Master::with_bus](crate::master::Master::with_bus).

	Slaves are designated by their 1-based position in the segment, `0` designates all slaves when an operation allows it.
*/

use core::time::Duration;
use crate::{
	registers::{AlState, AlError},
	rawmaster::PduAnswer,
	mapping::Layout,
	can::SdoAbortCode,
	error::EthercatResult,
	};


/// communication state of one slave, as read in its AL registers
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SlaveStatus {
	/// current state, [AlState::Unknown] if the slave did not answer
	pub state: AlState,
	/// the slave refused a state change or fell back to a lower state
	pub error: bool,
	/// reason of the error, [AlError::NO_ERROR] if none
	pub code: AlError,
}
impl SlaveStatus {
	/// status of a slave not answering
	pub fn missing() -> Self {
		Self {state: AlState::Unknown, error: false, code: AlError::NO_ERROR}
	}
}

/**
	operations on an ethercat segment, with no knowledge of the devices behind the slaves

	Every method is a bounded blocking call, none of them keeps running after returning.
*/
pub trait Fieldbus: Send {
	/// open the communication support, fails if the interface cannot be used
	fn open(&mut self) -> EthercatResult;
	/// release the communication support, further calls will fail until reopened
	fn close(&mut self);
	fn is_open(&self) -> bool;

	/**
		count the slaves answering, assign their addresses, set up their mailboxes, and bring them to [AlState::PreOperational]

		returns the number of slaves found
	*/
	fn discover(&mut self) -> EthercatResult<u16>;
	/// size the process data of every slave and map them in the logical memory, returns the resulting layout of the process image
	fn map(&mut self) -> EthercatResult<Layout>;

	/// request a communication state to a slave, or to all slaves if `slave` is `0`. `ack` acknowledges a previous error
	fn request_state(&mut self, slave: u16, state: AlState, ack: bool) -> EthercatResult;
	/**
		wait at most `timeout` for a slave (or all slaves if `slave` is `0`) to reach the given state

		returns the state reached at the end of the wait, the lowest one when checking all slaves
	*/
	fn state_check(&mut self, slave: u16, state: AlState, timeout: Duration) -> EthercatResult<AlState>;
	/// read the communication status of every slave, in topological order
	fn read_states(&mut self) -> EthercatResult<Vec<SlaveStatus>>;

	/**
		send the whole output image and receive the whole input image in one logical exchange

		returns the working counter of the exchange
	*/
	fn exchange(&mut self, outputs: &[u8], inputs: &mut [u8]) -> EthercatResult<u16>;

	/// SDO upload, returns the number of bytes written in `data` and the number of slaves who answered
	fn sdo_read(&mut self, slave: u16, index: u16, sub: u8, data: &mut [u8]) -> EthercatResult<PduAnswer<usize>, SdoAbortCode>;
	/// SDO download, returns the number of slaves who answered
	fn sdo_write(&mut self, slave: u16, index: u16, sub: u8, data: &[u8]) -> EthercatResult<PduAnswer<()>, SdoAbortCode>;

	/// bring back a slave which lost its configuration to [AlState::SafeOperational]
	fn reconfigure(&mut self, slave: u16, timeout: Duration) -> EthercatResult;
	/// give back its address to a slave which was reset or disconnected
	fn recover(&mut self, slave: u16, timeout: Duration) -> EthercatResult;
}

/// rank of a state in the state machine, allowing to compare states
pub fn rank(state: AlState) -> u8 {
	match state {
		AlState::Unknown => 0,
		AlState::Init => 1,
		AlState::Bootstrap => 2,
		AlState::PreOperational => 3,
		AlState::SafeOperational => 4,
		AlState::Operational => 5,
	}
}
