/*!
    structs and consts for the registers in a standard slave's RAM used by this master. This should be used instead of any hardcoded register value.

    The goal of this file is to gather all physical memory registers at one place.
*/

use core::fmt;
use bilge::prelude::*;
use crate::data::{self, Field, PduData, PackingResult};

pub mod address {
    use super::*;

    /// register of the station address, aka the fixed slave address
    /// ETG.1000.4 table 32
    pub const fixed: Field<u16> = Field::simple(0x0010);
    /// slave address alias
    /// ETG.1000.4 table 32
    pub const alias: Field<u16> = Field::simple(0x0012);
}

/// SII (Slave Information Interface) allows to retreive declarative informations about a slave (like a manifest) like product code, vendor, etc as well as slave boot-up configs
pub mod sii {
    use super::*;

	pub const access: Field<SiiAccess> = Field::simple(0x0500);
	pub const control: Field<SiiControl> = Field::simple(0x0502);
	/// register contains the address in the slave information interface which is accessed by the next read or write operation (by writing the slave info rmation interface control/status register).
	pub const address: Field<u16> = Field::simple(0x0504);
	/// register contains the data read with the last read operation, only the first 32 bits are used by this master
	pub const data: Field<[u8; 4]> = Field::simple(0x0508);
}

/// FMMU (Fieldbus Memory Management Unit) is controling the mapping (copy) for a slave's physical memory from/to logical memory
pub const fmmu: FMMU = FMMU {address: 0x0600, num: 16};

/**
    SM (Sync Managers) are used for configuring and controling two distinct things:
    - mailbox exchanges (CoE, FoE, ...)
    - pdo exchanges (copying PDO data to slave's physical memory)
*/
pub mod sync_manager {
    use super::*;

	pub const interface: SyncManager = SyncManager {address: 0x0800, num: 16};
}

/// AL (Application Layer) registers are controling the communication state of a slave
pub mod al {
    use super::*;

    pub const control: Field<AlControlRequest> = Field::simple(0x0120);
    pub const status: Field<AlStatus> = Field::simple(0x0130);
    pub const error: Field<AlError> = Field::simple(0x0134);
}



/// ETG.1000.6 table 9
#[bitsize(16)]
#[derive(FromBits, DebugBits, Copy, Clone)]
pub struct AlControlRequest {
    /// requested state of communication
    pub state: AlState,
    /// acknowledge the error reported in [AlStatus::error]
    pub ack: bool,
    /// request of id instead of error code in [al::error]
    pub request_id: bool,
    reserved: u10,
}
data::bilge_pdudata!(AlControlRequest, u16);

/// ETG.1000.6 table 12
#[bitsize(16)]
#[derive(FromBits, DebugBits, Copy, Clone)]
pub struct AlStatus {
    /// current state of communication
    pub state: AlState,
    /// the slave refused the last state change or went back to a lower state by itself, the reason is in [al::error]
    pub error: bool,
    /// if true, ID value is present in [al::error]
    pub id: bool,
    reserved: u10,
}
data::bilge_pdudata!(AlStatus, u16);

/**
    the current operation state on one device.

    Except [Self::Bootstrap], changing to any mode can be requested from any upper mode or from the preceding one.

    ETG.1000.6 table 9
*/
#[bitsize(4)]
#[derive(FromBits, Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum AlState {
    /// no answer from the slave, or an undefined state code
    #[fallback]
    #[default]
    Unknown = 0,
    /**
        The init mode allows to set many communication registers, like the salve address, the mailbox setup, etc.

        This mode should be used at the beginning of a communication. Only registers can be used.
    */
    Init = 1,
    /**
        the pre operational mode allows mailbox communication, which is mendatory to configure some slaves before realtime operations. Most functions are enabled but not realtime.

        Communication setup via registers is no more allowed in this mode.
    */
    PreOperational = 2,
    /**
        Transitional state meaning the slave is booting up and ready for nothing yet. The slave should normally reach the [Self::Init] state within seconds.

        It cannot be requested, nor changed while it is active.
    */
    Bootstrap = 3,
    /**
        Mode allowing realtime operations, except that commands sent to the slaves via its mapping will not be executed.

        This is a kind of read-only temporary mode before [Self::Operational], that can be useful for initializing control loops on the master side while their outputs are ignored.

        Mapping is no more allowed in this state, nor communication setup via registers.
    */
    SafeOperational = 4,
    /**
        Realtime operations running

        The master has full access to the slave's effector functions. slaves might expect the master to regularly refresh its commands.
    */
    Operational = 8,
}
impl AlState {
	/// state code as found in the AL registers
	pub fn code(self) -> u8  {u4::from(self).value()}
}
impl fmt::Display for AlState {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		f.write_str(match self {
			Self::Unknown => "NONE",
			Self::Init => "INIT",
			Self::PreOperational => "PRE_OP",
			Self::Bootstrap => "BOOT",
			Self::SafeOperational => "SAFE_OP",
			Self::Operational => "OPERATIONAL",
		})
	}
}

/**
    AL status code, explaining why a slave refused a state change or left its state

    Codes from 0x8000 are vendor specific.

    ETG.1000.6 table 11
*/
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct AlError(pub u16);

impl AlError {
	pub const NO_ERROR: Self = Self(0x0000);
	pub const SYNC_WATCHDOG: Self = Self(0x001b);
	pub const NEED_INIT: Self = Self(0x0021);

	/// human readable explanation of the code
	pub fn description(&self) -> &'static str {
		match self.0 {
			0x0000 => "No error",
			0x0001 => "Unspecified error",
			0x0002 => "No memory",
			0x0003 => "Invalid device setup",
			0x0005 => "Reserved",
			0x0011 => "Invalid requested state change",
			0x0012 => "Unknown requested state",
			0x0013 => "Bootstrap not supported",
			0x0014 => "No valid firmware",
			0x0015 => "Invalid mailbox configuration",
			0x0016 => "Invalid mailbox configuration",
			0x0017 => "Invalid sync manager configuration",
			0x0018 => "No valid inputs available",
			0x0019 => "No valid outputs",
			0x001a => "Synchronization error",
			0x001b => "Sync manager watchdog",
			0x001c => "Invalid sync Manager types",
			0x001d => "Invalid output configuration",
			0x001e => "Invalid input configuration",
			0x001f => "Invalid watchdog configuration",
			0x0020 => "Slave needs cold start",
			0x0021 => "Slave needs INIT",
			0x0022 => "Slave needs PREOP",
			0x0023 => "Slave needs SAFEOP",
			0x0024 => "Invalid input mapping",
			0x0025 => "Invalid output mapping",
			0x0026 => "Inconsistent settings",
			0x0027 => "Freerun not supported",
			0x0028 => "Synchronisation not supported",
			0x0029 => "Freerun needs 3buffer mode",
			0x002a => "Background watchdog",
			0x002b => "No valid Inputs and Outputs",
			0x002c => "Fatal sync error",
			0x002d => "No sync error",
			0x0030 => "Invalid DC SYNC configuration",
			0x0031 => "Invalid DC latch configuration",
			0x0032 => "PLL error",
			0x0033 => "DC sync IO error",
			0x0034 => "DC sync timeout error",
			0x0035 => "DC invalid sync cycle time",
			0x0036 => "DC invalid sync0 cycle time",
			0x0037 => "DC invalid sync1 cycle time",
			0x0041 => "MBX_AOE",
			0x0042 => "MBX_EOE",
			0x0043 => "MBX_COE",
			0x0044 => "MBX_FOE",
			0x0045 => "MBX_SOE",
			0x004f => "MBX_VOE",
			0x0050 => "EEPROM no access",
			0x0051 => "EEPROM error",
			0x0060 => "Slave restarted locally",
			0x0061 => "Device identification value updated",
			0x00f0 => "Application controller available",
			0x8000 ..= 0xffff => "Vendor specific",
			_ => "Unknown",
		}
	}
}
impl fmt::Display for AlError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "0x{:04x} {}", self.0, self.description())
	}
}
impl PduData for AlError {
	type Packed = [u8; 2];

	fn pack(&self, dst: &mut [u8]) -> PackingResult<()>  {self.0.pack(dst)}
	fn unpack(src: &[u8]) -> PackingResult<Self>  {Ok(Self(u16::unpack(src)?))}
}


/// ETH.1000.4 table 48
#[bitsize(16)]
#[derive(FromBits, DebugBits, Copy, Clone)]
pub struct SiiAccess {
	pub owner: SiiOwner,
	/// setting this will reset access to SII
	pub lock: bool,
	reserved: u6,
	/// PDI access active
	pub pdi: bool,
	reserved: u7,
}
data::bilge_pdudata!(SiiAccess, u16);

#[bitsize(1)]
#[derive(FromBits, Debug, Copy, Clone, Eq, PartialEq)]
pub enum SiiOwner {
	EthercatDL = 0,
	Pdi = 1,
}

/**
    register controling the read/write operations to Slave Information Interface (SII)

	ETG.1000.4 table 49
*/
#[bitsize(16)]
#[derive(FromBits, DebugBits, Copy, Clone)]
pub struct SiiControl {
	/// true if SII is writable
	pub write_access: bool,
	reserved: u4,
	/**
		- false: Normal operation (DL interfaces to SII)
		- true: DL-user emulates SII

		cannot be set by the master
	*/
	pub eeprom_emulation: bool,
	/// number of bytes per read transaction, cannot be set by master
	pub read_size: SiiTransaction,
	/// unit of SII addresses, cannot be set by master
	pub address_unit: SiiUnit,
	/**
		read operation requested (parameter write) or read operation busy (parameter read)

		To start a new read operation there must be a positive edge on this parameter
	*/
	pub read_operation: bool,
	/// write operation requested (parameter write) or write operation busy (parameter read)
	pub write_operation: bool,
	/// reload operation requested (parameter write) or reload operation busy (parameter read)
	pub reload_operation: bool,
	/// checksum error while reading at startup
	pub checksum_error: bool,
	/// error on reading Device Information
	pub device_info_error: bool,
	/// error on last SII request
	pub command_error: bool,
	/// error on last write operation
	pub write_error: bool,
	/// operation is ongoing
	pub busy: bool,
}
data::bilge_pdudata!(SiiControl, u16);

#[bitsize(1)]
#[derive(FromBits, Debug, Copy, Clone, Eq, PartialEq)]
pub enum SiiTransaction {
	Bytes4 = 0,
	Bytes8 = 1,
}

#[bitsize(1)]
#[derive(FromBits, Debug, Copy, Clone, Eq, PartialEq)]
pub enum SiiUnit {
	Byte = 0,
	Word = 1,
}


/// this is not a PduData but a struct transporting the address and number of FMMU registers
/// ETG.1000.4 table 57
pub struct FMMU {
    /// address of the first entry
	pub address: u16,
	/// number of entries
	pub num: u8,
}
impl FMMU {
    /// return an entry of the FMMU
    pub const fn entry(&self, index: u8) -> Field<FmmuEntry>  {
        Field::simple((self.address as usize) + (index as usize)*0x10)
    }
    /// the whole FMMU register area, convenient to reset it
    pub const fn all(&self) -> Field<[u8; 0x100]>  {
        Field::simple(self.address as usize)
    }
}

/**
	The fieldbus memory management unit (FMMU) converts logical addresses into physical addresses by the means of internal address. Each FMMU entity maps one cohesive logical address space to one cohesive physical address space.

	ETG.1000.4 table 56
*/
#[bitsize(128)]
#[derive(FromBits, DebugBits, Copy, Clone)]
pub struct FmmuEntry {
	/// start byte in the logical memory
	pub logical_start_byte: u32,
	/// byte size of the data
	pub logical_len_byte: u16,
	/// offset of the start bit in the logical start byte
	pub logical_start_bit: u3,
	reserved: u5,
	/// offset of the end bit in the logical start byte
	pub logical_end_bit: u3,
	reserved: u5,
	/// start byte in the physical memory (set by the sync manager)
	pub physical_start_byte: u16,
	/// start bit in the physical start byte
	pub physical_start_bit: u3,
	reserved: u5,
	/// entity will be used for read service
	pub read: bool,
	/// entity will be used for write service
	pub write: bool,
	reserved: u6,
	/// enable this FMMU entry, so physical memory will be copied from/to logical memory on read/write
	pub enable: bool,
	reserved: u7,
	reserved: u24,
}
data::bilge_pdudata!(FmmuEntry, u128);

impl FmmuEntry {
	/// byte aligned mapping of a physical range to a logical range
	pub fn bytes(logical: u32, len: u16, physical: u16, direction: SyncDirection) -> Self {
		let mut entry = Self::from(0u128);
		entry.set_logical_start_byte(logical);
		entry.set_logical_len_byte(len);
		entry.set_logical_end_bit(u3::new(7));
		entry.set_physical_start_byte(physical);
		entry.set_read(direction == SyncDirection::Read);
		entry.set_write(direction == SyncDirection::Write);
		entry.set_enable(true);
		entry
	}
}


/// this is not a PduData but a convenience struct transporting the addresses of a sync manager
/// ETG.1000.4 table 59
pub struct SyncManager {
    /// start address of the sync manager (address of the first channel)
    pub address: u16,
    /// number of channels
    pub num: u8,
}
impl SyncManager {
    pub const fn channel(&self, index: u8) -> Field<SyncManagerChannel> {
        Field::simple((self.address as usize) + (index as usize) * 8)
    }
    /// the whole sync manager register area, convenient to reset it
    pub const fn all(&self) -> Field<[u8; 0x80]>  {
        Field::simple(self.address as usize)
    }
    /// return the sync manager channel reserved for mailbox in
    pub const fn mailbox_write(&self) -> Field<SyncManagerChannel>   {self.channel(0)}
    /// return the sync manager channel reserved for mailbox out
    pub const fn mailbox_read(&self) -> Field<SyncManagerChannel>   {self.channel(1)}
    /// return one of the sync manager channels reserved for mapping
    pub const fn mappable(&self, index: u8) -> Field<SyncManagerChannel>   {self.channel(2+index)}
}

/**
    The Sync manager controls the access to the DL-user memory. Each channel defines a consistent area of the DL-user memory.

    There is two ways of data exchange between master and PDI:
    - Handshake mode (mailbox): one entity fills data in and cannot access the area until the other entity reads out the data.
    - Buffered mode: the interaction between both producer of data and consumer of data is uncorrelated – each entity expects access at any time, always providing the consumer with the newest data.

    ETG.1000.4 table 58
*/
#[bitsize(64)]
#[derive(TryFromBits, DebugBits, Copy, Clone)]
pub struct SyncManagerChannel {
    /// start address in octets in the physical memory of the consistent DL-user memory area.
    pub address: u16,
    /// size in octets of the consistent DL -user memory area.
    pub length: u16,
    /// whether the buffer is used for mailbox or exchange through mapping to the logical memory
    pub mode: SyncMode,
    /// whether the consistent DL -user memory area is read or written by the master.
    pub direction: SyncDirection,
    /// an event is generated if there is new data available in the consistent DL-user memory area which was written by the master (direction write) or if the new data from the DL-user was read by the master (direction read).
    pub ec_event: bool,
    /// an event is generated if there is new data available in the consistent DL-user memory area which was written by DLS-user or if the new data from the Master was read by the DLS-user.
    pub dls_user_event: bool,
    /// if the monitoring of an access to the consistent DL-user memory area is enabled.
    pub watchdog: bool,
    reserved: u1,
    /// if the consistent DL -user memory (direction write) has been written by the master and the event enable parameter is set.
    pub write_event: bool,
    /// if the consistent DL -user memory (direction read) has been read by the master and the event enable parameter is set.
    pub read_event: bool,
    reserved: u1,
    /// true if there is data waiting to be read (by master or slave) in the buffer
    pub mailbox_full: bool,
    /// state (buffer number, locked) of the consistent DL-user memory if it is of buffered access type.
    pub buffer_state: u2,
    pub read_buffer_open: bool,
    pub write_buffer_open: bool,
    /// activate this channel
    pub enable: bool,
    /// A change in this parameter indicates a repeat request. This is primarily used to repeat the last mailbox interactions.
    pub repeat: bool,
    reserved: u4,
    /// if the DC 0 Event shall be invoked in case of a EtherCAT write
    pub dc_event_bus: bool,
    /// if the DC 0 Event shall be invoked in case of a local write
    pub dc_event_local: bool,
    /// disable this channel for PDI access
    pub disable_pdi: bool,
    /// indicates a repeat request acknowledge. After setting the value of Repeat in the parameter repeat acknowledge.
    pub repeat_ack: bool,
    reserved: u6,
}
data::bilge_pdudata!(SyncManagerChannel, u64);

impl SyncManagerChannel {
	/// enabled channel of the given kind, with the event flags conventionally used for it
	pub fn configured(address: u16, length: u16, mode: SyncMode, direction: SyncDirection) -> Self {
		Self::new(
			address,
			length,
			mode,
			direction,
			false,
			true,
			// process data written by the master is watched so the slave can detect a lost master
			mode == SyncMode::Buffered && direction == SyncDirection::Write,
			false,
			false,
			false,
			u2::new(0),
			false,
			false,
			length != 0,
			false,
			false,
			false,
			false,
			false,
			)
	}
	/// value of the control byte
	pub fn control(&self) -> u8  {(u64::from(*self) >> 32) as u8}
}

/// ETG.1000.4 table 58
#[bitsize(2)]
#[derive(TryFromBits, Debug, Copy, Clone, Eq, PartialEq)]
pub enum SyncMode {
    Buffered = 0,
    Mailbox = 2,
}
/// ETG.1000.4 table 58
#[bitsize(2)]
#[derive(TryFromBits, Debug, Copy, Clone, Eq, PartialEq)]
pub enum SyncDirection {
    /// sync manager buffer is read by the master
    Read = 0,
    /// sync manager buffer is written by the master
    Write = 1,
}
