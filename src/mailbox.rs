/*!
    implementation of communication with a slave's mailbox

    The mailbox is a pair of sync manager channels in handshake mode, SM0 for master to slave, SM1 for slave to master. Each mailbox frame starts with a [MailboxHeader] telling which protocol the frame belongs to.
*/

use core::ops::Range;
use std::time::{Duration, Instant};
use bilge::prelude::*;
use crate::{
	rawmaster::{RawMaster, PduCommand},
	registers::{self, SyncManagerChannel, SyncMode, SyncDirection},
	data::{self, PduData, PackingResult, Cursor},
	error::{EthercatError, EthercatResult},
	};


/**
    state of the communication with a slave's mailbox

    The mailbox buffers location is given by the slave's EEPROM.
*/
#[derive(Clone, Debug)]
pub struct Mailbox {
	slave: u16,
	/// physical memory range of the buffer written by the master
	write: Range<u16>,
	/// physical memory range of the buffer read by the master
	read: Range<u16>,
	count: u8,
}

impl Mailbox {
	/// `slave` is the fixed address of the slave
	pub fn new(slave: u16, write: Range<u16>, read: Range<u16>) -> Self {
		Self {slave, write, read, count: 0}
	}
	pub fn slave(&self) -> u16  {self.slave}
	/// maximum size of a frame the master can send
	pub fn write_capacity(&self) -> usize  {usize::from(self.write.len()) - MailboxHeader::packed_size()}
	/// maximum size of a frame the master can receive
	pub fn read_capacity(&self) -> usize  {usize::from(self.read.len()) - MailboxHeader::packed_size()}

	/// set up the sync managers of the mailbox, this must be done in [AlState::Init](registers::AlState::Init)
	pub fn configure(&self, master: &RawMaster) -> EthercatResult {
		let interface = registers::sync_manager::interface;
		master.fpwr(self.slave, interface.mailbox_write(), SyncManagerChannel::configured(
			self.write.start,
			self.write.len() as u16,
			SyncMode::Mailbox,
			SyncDirection::Write,
			))?.one()?;
		master.fpwr(self.slave, interface.mailbox_read(), SyncManagerChannel::configured(
			self.read.start,
			self.read.len() as u16,
			SyncMode::Mailbox,
			SyncDirection::Read,
			))?.one()?;
		Ok(())
	}

	/**
		read the frame currently in the mailbox, wait for it if not already present

		`data` is the buffer to fill with the frame content. Frames of other protocols than `ty` are dropped.
		Returns the part of `data` filled
	*/
	pub fn read<'b>(&mut self, master: &RawMaster, ty: MailboxType, data: &'b mut [u8], timeout: Duration) -> EthercatResult<&'b mut [u8]> {
		let deadline = Instant::now() + timeout;
		let mut buffer = vec![0; usize::from(self.read.len())];
		loop {
			self.wait(master, registers::sync_manager::interface.mailbox_read(), true, deadline)?;

			// the whole buffer must be read for the slave to release it
			buffer.fill(0);
			let answers = master.pdu(PduCommand::FPRD, self.slave, self.read.start, &mut buffer)?;
			if answers != 1
				{return Err(EthercatError::Protocol("mailbox read not answered"))}

			let mut frame = Cursor::new(buffer.as_slice());
			let header = frame.unpack::<MailboxHeader>()?;
			let content = frame.read(usize::from(header.length))?;
			match header.flags.ty() {
				MailboxType::Exception => {
					let error = MailboxErrorFrame::unpack(content)?;
					log::warn!("slave {} reported mailbox error {:?}", self.slave, error.detail);
					return Err(EthercatError::Protocol("slave reported a mailbox error"));
					},
				received if received == ty => {
					let size = content.len();
					let data = data.get_mut(.. size)
						.ok_or(EthercatError::Master("mailbox frame bigger than the given buffer"))?;
					data.copy_from_slice(content);
					return Ok(data)
					},
				other => log::debug!("slave {} dropped mailbox frame of type {:?}", self.slave, other),
			}
		}
	}

	/// write the given frame in the mailbox, waiting for the mailbox to be empty first
	pub fn write(&mut self, master: &RawMaster, ty: MailboxType, data: &[u8], timeout: Duration) -> EthercatResult {
		// the counter rolls from 1 to 7, 0 is reserved
		self.count = (self.count % 7) + 1;
		let header = MailboxHeader {
			length: u16::try_from(data.len())
				.map_err(|_| EthercatError::Master("mailbox frame too big"))?,
			// address of master
			address: 0,
			flags: MailboxFlags::new(u6::new(0), u2::new(0), ty, u3::new(self.count)),
			};
		// the whole buffer must be written for the slave to take it
		let mut buffer = vec![0; usize::from(self.write.len())];
		{
			let mut frame = Cursor::new(buffer.as_mut_slice());
			frame.pack(&header)?;
			frame.write(data)
				.map_err(|_| EthercatError::Master("mailbox frame too big"))?;
		}

		let deadline = Instant::now() + timeout;
		self.wait(master, registers::sync_manager::interface.mailbox_write(), false, deadline)?;
		let answers = master.pdu(PduCommand::FPWR, self.slave, self.write.start, &mut buffer)?;
		if answers != 1
			{return Err(EthercatError::Protocol("mailbox write not answered"))}
		Ok(())
	}

	/// wait for the given mailbox channel to reach the given fullness
	fn wait(&self, master: &RawMaster, channel: data::Field<SyncManagerChannel>, full: bool, deadline: Instant) -> EthercatResult {
		loop {
			let state = master.fprd(self.slave, channel)?;
			if state.answers == 1 && state.value.mailbox_full() == full
				{return Ok(())}
			if Instant::now() > deadline
				{return Err(EthercatError::Timeout("mailbox not ready"))}
		}
	}
}


/// ETG 1000.4 table 29
#[derive(Copy, Clone, Debug)]
struct MailboxHeader {
    /// length of the mailbox service data following this header
    length: u16,
    /**
        - if a master is client: Station Address of the source
        - if a slave is client: Station Address of the destination
    */
    address: u16,
    flags: MailboxFlags,
}
impl PduData for MailboxHeader {
	type Packed = [u8; 6];

	fn pack(&self, dst: &mut [u8]) -> PackingResult<()> {
		let mut cursor = Cursor::new(dst);
		cursor.pack(&self.length)?;
		cursor.pack(&self.address)?;
		cursor.pack(&self.flags)?;
		Ok(())
	}
	fn unpack(src: &[u8]) -> PackingResult<Self> {
		let mut cursor = Cursor::new(src);
		Ok(Self {
			length: cursor.unpack()?,
			address: cursor.unpack()?,
			flags: cursor.unpack()?,
		})
	}
}

#[bitsize(16)]
#[derive(TryFromBits, DebugBits, Copy, Clone)]
struct MailboxFlags {
    /// reserved for future
    channel: u6,
    /// 0 is lowest priority, 3 is highest
    priority: u2,
    ty: MailboxType,
    /// Counter of the mailbox services (0 reserved, this should roll from 1 to 7 and overflow to 1 after 7)
    count: u3,
    reserved: u1,
}
data::bilge_pdudata!(MailboxFlags, u16);

/// ETG 1000.4 table 29
#[bitsize(4)]
#[derive(TryFromBits, Debug, Copy, Clone, Eq, PartialEq)]
pub enum MailboxType {
    Exception = 0x0,
    Ads = 0x1,
    Ethernet = 0x2,
    Can = 0x3,
    File = 0x4,
    Servo = 0x5,
    Specific = 0xf,
}

/// ETG 1000.4 table 30
#[derive(Copy, Clone, Debug)]
struct MailboxErrorFrame {
    ty: u16,
    detail: MailboxError,
}
impl PduData for MailboxErrorFrame {
	type Packed = [u8; 4];

	fn pack(&self, dst: &mut [u8]) -> PackingResult<()> {
		let mut cursor = Cursor::new(dst);
		cursor.pack(&self.ty)?;
		cursor.pack(&self.detail)?;
		Ok(())
	}
	fn unpack(src: &[u8]) -> PackingResult<Self> {
		let mut cursor = Cursor::new(src);
		Ok(Self {
			ty: cursor.unpack()?,
			detail: cursor.unpack()?,
		})
	}
}

/// ETG 1000.4 table 30
#[bitsize(16)]
#[derive(FromBits, Debug, Copy, Clone, Eq, PartialEq)]
pub enum MailboxError {
    #[fallback]
    Unknown = 0x0,
    Syntax = 0x1,
    UnsupportedProtocol = 0x2,
    InvalidChannel = 0x3,
    ServiceNotSupported = 0x4,
    InvalidHeader = 0x5,
    SizeTooShort = 0x6,
    NoMoreMemory = 0x7,
    InvalidSize = 0x8,
    ServiceInWork = 0x9,
}
data::bilge_pdudata!(MailboxError, u16);


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout() {
        let header = MailboxHeader {
            length: 10,
            address: 0,
            flags: MailboxFlags::new(u6::new(0), u2::new(0), MailboxType::Can, u3::new(2)),
            };
        let mut packed = [0u8; 6];
        header.pack(&mut packed).unwrap();
        assert_eq!(packed, [10, 0, 0, 0, 0x00, 0x23]);

        let header = MailboxHeader::unpack(&packed).unwrap();
        assert_eq!(header.flags.ty(), MailboxType::Can);
        assert_eq!(header.flags.count().value(), 2);
        assert!(MailboxHeader::unpack(&[10, 0, 0, 0, 0x00, 0x07]).is_err());
    }

    #[test]
    fn capacity() {
        let mailbox = Mailbox::new(0x1001, 0x1000 .. 0x1080, 0x1080 .. 0x1100);
        assert_eq!(mailbox.write_capacity(), 0x80 - 6);
        assert_eq!(mailbox.read_capacity(), 0x80 - 6);
    }
}
