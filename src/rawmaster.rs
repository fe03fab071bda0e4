/*!
	low level ethercat communication functions.

	It wraps an ethercat socket to send ethercat frames containing data or commands, and wait for their answer.
*/

use std::{
    time::Instant,
    sync::{Mutex, PoisonError},
    };
use core::{
    ops::DerefMut,
    time::Duration,
    };
use bilge::prelude::*;

use crate::{
    socket::*,
    data::{self, Field, PduData, Storage, Cursor, PackingResult},
    error::{EthercatError, EthercatResult},
    };


/// maximum frame size, currently limited to the size tolerated by its header (content size coded with 11 bits)
const MAX_ETHERCAT_FRAME: usize = 2050;
/// maximum data a single PDU can carry, the ethercat header length must hold the PDU header, data and footer
const MAX_PDU_DATA: usize = 2047 - PDU_HEADER_SIZE - 2;
const PDU_HEADER_SIZE: usize = 10;

/**
    low level ethercat communication functions, with no notion of slave.

    genericity allows to use a UDP socket or raw ethernet socket, see [crate::socket] for more details.

    This struct does not do any checking of the communication states on the slaves, and has no notion of slave, it is just executing the basic commands.

    The ethercat low level is all about PDUs: an ethercat frame intended for slaves is a PDU frame and PDU frames contain any number of PDU (Process Data Unit), each PDU is a command, acting on one of the 2 memories types:

   - **Physical Memory** (aka. registers)

		each slave has its own physical memory, commands for physical memory (`*P*`, `B*`) are addressing a specific slave, or combining the memory reads from all slaves

		The physical memory is divided into registers declared in [crate::registers]

	- **Logical Memory** (aka. fieldbus memory)

		this memory doesn't physically exist anywhere, but can be read/write using `L*`  commands with each slave contributing to the record according to the configuration set before.

		The logical memory is organized by the mapping set in the FMMU (Fieldbust Memory Management Unit)

	See variants of [PduCommand] for more details.

	Every PDU is sent in its own frame, and the calling thread blocks until the matching answer comes back or the reception timeout elapses. Concurrent callers are serialized.
*/
pub struct RawMaster {
	// socket implementation
	socket: Box<dyn EthercatSocket + Send + Sync>,
	/// maximum delay waiting for the answer of a PDU
	timeout: Duration,
	// communication state, locked during a whole exchange
	state: Mutex<PduState>,
}
struct PduState {
	token: u8,
	send: [u8; MAX_ETHERCAT_FRAME],
	receive: [u8; MAX_ETHERCAT_FRAME],
}
impl RawMaster {
	pub fn new<S: EthercatSocket + 'static + Send + Sync>(socket: S, timeout: Duration) -> Self {
        Self {
            socket: Box::new(socket),
            timeout,
            state: Mutex::new(PduState {
                token: 0,
                send: [0; MAX_ETHERCAT_FRAME],
                receive: [0; MAX_ETHERCAT_FRAME],
                }),
        }
	}
	/// change the delay waiting for each PDU answer
	pub fn set_timeout(&mut self, timeout: Duration)  {self.timeout = timeout}

	// shorthands to PDU commands
	pub fn brd<T: PduData>(&self, address: Field<T>) -> EthercatResult<PduAnswer<T>> {
        self.read(SlaveAddress::Broadcast, address)
	}
	pub fn bwr<T: PduData>(&self, address: Field<T>, data: T) -> EthercatResult<PduAnswer<()>> {
        self.write(SlaveAddress::Broadcast, address, data)
	}

	pub fn aprd<T: PduData>(&self, slave: u16, address: Field<T>) -> EthercatResult<PduAnswer<T>> {
        self.read(SlaveAddress::AutoIncremented(slave), address)
	}
	pub fn apwr<T: PduData>(&self, slave: u16, address: Field<T>, data: T) -> EthercatResult<PduAnswer<()>> {
        self.write(SlaveAddress::AutoIncremented(slave), address, data)
	}

	pub fn fprd<T: PduData>(&self, slave: u16, address: Field<T>) -> EthercatResult<PduAnswer<T>> {
        self.read(SlaveAddress::Fixed(slave), address)
	}
	pub fn fpwr<T: PduData>(&self, slave: u16, address: Field<T>, data: T) -> EthercatResult<PduAnswer<()>> {
        self.write(SlaveAddress::Fixed(slave), address, data)
	}

	/// maps to a *rd command
	pub fn read<T: PduData>(&self, slave: SlaveAddress, memory: Field<T>) -> EthercatResult<PduAnswer<T>> {
        let command = match slave {
            SlaveAddress::Broadcast => PduCommand::BRD,
            SlaveAddress::AutoIncremented(_) => PduCommand::APRD,
            SlaveAddress::Fixed(_) => PduCommand::FPRD,
            SlaveAddress::Logical => PduCommand::LRD,
            };
        let mut buffer = T::Packed::zeroed();
        let answers = self.addressed(command, slave, memory.byte, field_slice(buffer.as_mut(), memory.len)?)?;
        Ok(PduAnswer {
			answers,
			value: T::unpack(buffer.as_ref())?,
			})
    }
	/// maps to a *wr command
	pub fn write<T: PduData>(&self, slave: SlaveAddress, memory: Field<T>, data: T) -> EthercatResult<PduAnswer<()>> {
        let command = match slave {
            SlaveAddress::Broadcast => PduCommand::BWR,
            SlaveAddress::AutoIncremented(_) => PduCommand::APWR,
            SlaveAddress::Fixed(_) => PduCommand::FPWR,
            SlaveAddress::Logical => PduCommand::LWR,
            };
        let mut buffer = T::Packed::zeroed();
        data.pack(buffer.as_mut())?;
		Ok(PduAnswer {
			answers: self.addressed(command, slave, memory.byte, field_slice(buffer.as_mut(), memory.len)?)?,
			value: (),
			})
	}
	/// maps to a *rw command
	pub fn exchange<T: PduData>(&self, slave: SlaveAddress, memory: Field<T>, data: T) -> EthercatResult<PduAnswer<T>> {
        let command = match slave {
            SlaveAddress::Broadcast => PduCommand::BRW,
            SlaveAddress::AutoIncremented(_) => PduCommand::APRW,
            SlaveAddress::Fixed(_) => PduCommand::FPRW,
            SlaveAddress::Logical => PduCommand::LRW,
            };
        let mut buffer = T::Packed::zeroed();
        data.pack(buffer.as_mut())?;
        let answers = self.addressed(command, slave, memory.byte, field_slice(buffer.as_mut(), memory.len)?)?;
        Ok(PduAnswer {
			answers,
			value: T::unpack(buffer.as_ref())?,
			})
	}

	/**
		send a logical memory command with data of arbitrary size

		The logical address is 32 bits, it is split between the slave and memory address fields of the PDU.
		`data` is sent and replaced by the answer. Returns the working counter.
	*/
	pub fn logical(&self, command: PduCommand, address: u32, data: &mut [u8]) -> EthercatResult<u16> {
		self.pdu(command, address as u16, (address >> 16) as u16, data)
	}

	fn addressed(&self, command: PduCommand, slave: SlaveAddress, memory: usize, data: &mut [u8]) -> EthercatResult<u16> {
		match slave {
			SlaveAddress::Broadcast => self.pdu(command, 0, memory as u16, data),
			// auto-incremented addresses are negative positions in the loop, each slave increments it and the one seeing 0 executes
			SlaveAddress::AutoIncremented(position) => self.pdu(command, 0u16.wrapping_sub(position), memory as u16, data),
			SlaveAddress::Fixed(address) => self.pdu(command, address, memory as u16, data),
			SlaveAddress::Logical => self.logical(command, memory as u32, data),
		}
	}

	/**
		send a PDU on the ethercat bus and wait for its answer

		`data` is sent and replaced by the content of the answer.
		returns the number of slaves who processed the command (the working counter)
	*/
	pub fn pdu(&self, command: PduCommand, slave_address: u16, memory_address: u16, data: &mut [u8]) -> EthercatResult<u16> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let state = state.deref_mut();

        // the token identifies our answer among frames possibly still travelling from earlier timed out requests
        let token = state.token;
        state.token = state.token.wrapping_add(1);

        let header = PduHeader {
            command: u8::from(command),
            token,
            slave_address,
            memory_address,
            flags: PduFlags::new(u11::new(0), false, false),
            interrupt: 0,
            };
        let size = pack_frame(&mut state.send, header, data)?;
        if size > self.socket.max_frame()
            {return Err(EthercatError::Master("PDU too big for the socket"))}
        self.socket.send(&state.send[.. size])?;

        let deadline = Instant::now() + self.timeout;
        loop {
            let remaining = deadline.checked_duration_since(Instant::now())
                .filter(|remaining| ! remaining.is_zero())
                .ok_or(EthercatError::Timeout("no answer to PDU"))?;
            self.socket.set_timeout(remaining)?;
            let size = match self.socket.receive(&mut state.receive) {
                Ok(size) => size,
                Err(error) if is_timeout(&error) => return Err(EthercatError::Timeout("no answer to PDU")),
                Err(error) => return Err(error.into()),
                };
            match unpack_frame(&state.receive[.. size], command, token, data) {
                Ok(Some(answers)) => return Ok(answers),
                // not our answer, may be a late answer to a previous request
                Ok(None) => continue,
                Err(error) => {
                    log::debug!("ignoring malformed frame: {}", error);
                    continue
                    },
            }
        }
	}
}

/// restrict a packing buffer to the size given by a field
fn field_slice(buffer: &mut [u8], len: usize) -> EthercatResult<&mut [u8]> {
	buffer.get_mut(.. len).ok_or(EthercatError::Master("field is bigger than its data type"))
}

/// write a complete ethercat frame holding one PDU in the given buffer, returns the frame size
fn pack_frame(frame: &mut [u8], mut header: PduHeader, data: &[u8]) -> PackingResult<usize> {
	if data.len() > MAX_PDU_DATA
		{return Err(data::PackingError::BadSize(data.len(), "PDU data too big for an ethercat frame"))}
	header.flags.set_len(u11::new(data.len() as u16));

	let mut cursor = Cursor::new(frame);
	cursor.pack(&EthercatHeader::new(
		u11::new((PDU_HEADER_SIZE + data.len() + 2) as u16),
		EthercatType::PDU,
		))?;
	cursor.pack(&header)?;
	cursor.write(data)?;
	cursor.pack(&0u16)?;
	Ok(cursor.position())
}

/**
	extract the answer of the given PDU from a received frame, and copy its content into `data`

	returns `None` if the frame is not the answer to this PDU, else the working counter
*/
fn unpack_frame(frame: &[u8], command: PduCommand, token: u8, data: &mut [u8]) -> EthercatResult<Option<u16>> {
	let mut frame = Cursor::new(frame);
	let header = frame.unpack::<EthercatHeader>()?;
	// no mailbox gateway frame shall transit to this master, ignore it
	if header.ty() != EthercatType::PDU
		{return Ok(None)}
	let pdu = frame.unpack::<PduHeader>()?;
	if pdu.token != token || pdu.command != u8::from(command)
		{return Ok(None)}
	let len = usize::from(u16::from(pdu.flags.len()));
	if len != data.len()
		{return Err(EthercatError::Protocol("PDU answer has not the requested size"))}
	data.copy_from_slice(frame.read(len)?);
	// the working count in the footer is incremented by each slave executing the command
	Ok(Some(frame.unpack::<u16>()?))
}


/// dynamically specifies a destination address on the ethercat loop
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SlaveAddress {
	/// every slave will receive and execute
	Broadcast,
	/// address will be determined by the topology (index of the slave in the ethernet loop)
	AutoIncremented(u16),
	/// address has been set by the master previously
	Fixed(u16),
	/// the logical memory is the destination, all slaves are concerned
	Logical,
}

/// value returned by a PDU, with the number of slaves who processed the command
#[derive(Clone, Debug)]
pub struct PduAnswer<T> {
	pub answers: u16,
	pub value: T,
}
impl<T> PduAnswer<T> {
    /// return the value if exactly one slave answered
    pub fn one(self) -> EthercatResult<T> {
        self.exact(1)
    }
    /// return the value if exactly `n` slaves answered
    pub fn exact(self, n: u16) -> EthercatResult<T> {
        if self.answers != n
            {return Err(EthercatError::Protocol("wrong working counter"))}
        Ok(self.value)
    }
}


/// ethercat frame header (common to ethernet or UDP mediums) as described in ETG 1000.4 table 11
#[bitsize(16)]
#[derive(TryFromBits, DebugBits, Copy, Clone)]
struct EthercatHeader {
    /// length of the ethercat frame (minus 2 bytes, which is the header)
    len: u11,
    reserved: u1,
    /// frame type
    ty: EthercatType,
}
data::bilge_pdudata!(EthercatHeader, u16);

/// type of ethercat frame
#[bitsize(4)]
#[derive(TryFromBits, Debug, Copy, Clone, Eq, PartialEq)]
enum EthercatType {
    /// process data unit, use to exchange with physical and logical memory in realtime or not
    /// the mailbox content sent to slaves shall be written to the physical memory through these
    ///
    /// See ETG.1000.4
    PDU = 0x1,

    NetworkVariable = 0x4,

    /// mailbox gateway communication, between the master and non-slave devices, allowing non-slave devices to mailbox with the slaves
    ///
    /// See ETG.8200
    Mailbox = 0x5,
}


/// header of a PDU frame, this one of the possible ethercat frames
#[derive(Copy, Clone, Debug)]
struct PduHeader {
    /// PDU command, specifying whether logical or physical memory is accesses, addressing type, and what read/write operation
    command: u8,
    /// PDU task request identifier
    token: u8,
    /// slave address, its meaning depend on the command
    slave_address: u16,
    /// memory address of the data to access, which memory is accessed depend on the command
    memory_address: u16,
    flags: PduFlags,
    interrupt: u16,
}
impl PduData for PduHeader {
	type Packed = [u8; PDU_HEADER_SIZE];

	fn pack(&self, dst: &mut [u8]) -> PackingResult<()> {
		let mut cursor = Cursor::new(dst);
		cursor.pack(&self.command)?;
		cursor.pack(&self.token)?;
		cursor.pack(&self.slave_address)?;
		cursor.pack(&self.memory_address)?;
		cursor.pack(&self.flags)?;
		cursor.pack(&self.interrupt)?;
		Ok(())
	}
	fn unpack(src: &[u8]) -> PackingResult<Self> {
		let mut cursor = Cursor::new(src);
		Ok(Self {
			command: cursor.unpack()?,
			token: cursor.unpack()?,
			slave_address: cursor.unpack()?,
			memory_address: cursor.unpack()?,
			flags: cursor.unpack()?,
			interrupt: cursor.unpack()?,
		})
	}
}

#[bitsize(16)]
#[derive(FromBits, DebugBits, Copy, Clone)]
struct PduFlags {
    /// data length following the header, excluding the footer. starting from `memory_address` in the addressed memory
    len: u11,
    reserved: u3,
    circulating: bool,
    /// true if there is an other PDU in the same PDU frame
    next: bool,
}
data::bilge_pdudata!(PduFlags, u16);

/// the possible PDU commands
#[bitsize(8)]
#[derive(FromBits, Debug, Copy, Clone, Default, Eq, PartialEq)]
pub enum PduCommand {
    /// no operation
    #[fallback]
    #[default]
    NOP = 0x0,

    /// broadcast read
    BRD = 0x07,
    /// broadcast write
    BWR = 0x08,
    /// broadcast read & write
    BRW = 0x09,

    /// auto-incremented slave read
    APRD = 0x01,
    /// auto-incremented slave write
    APWR = 0x02,
    /// auto-incremented slave read & write
    APRW = 0x03,

    /// fixed slave read
    FPRD = 0x04,
    /// fixed slave write
    FPWR = 0x05,
    /// fixed slave read & write
    FPRW = 0x06,

    /// logical memory read
    LRD = 0x0A,
    /// logical memory write
    LWR = 0x0B,
    /// logical memory read & write
    LRW = 0x0C,

    /// auto-incremented slave read multiple write
    ARMW = 0x0D,
    /// fixed slave read multiple write
    FRMW = 0x0E,
}


#[cfg(test)]
mod tests {
    use super::*;

    fn header(command: PduCommand, token: u8, slave_address: u16, memory_address: u16) -> PduHeader {
        PduHeader {
            command: u8::from(command),
            token,
            slave_address,
            memory_address,
            flags: PduFlags::new(u11::new(0), false, false),
            interrupt: 0,
        }
    }

    #[test]
    fn frame_layout() {
        let mut frame = [0u8; 32];
        let size = pack_frame(&mut frame, header(PduCommand::FPRD, 5, 0x1001, 0x0130), &[0, 0]).unwrap();
        assert_eq!(size, 16);
        assert_eq!(&frame[.. size], &[
            0x0e, 0x10,  // 14 bytes of PDU frame, type PDU
            0x04, 5,  0x01, 0x10,  0x30, 0x01,  0x02, 0x00,  0x00, 0x00,
            0x00, 0x00,  // data
            0x00, 0x00,  // working counter
            ]);
    }

    #[test]
    fn answer_matching() {
        let mut frame = [0u8; 32];
        let size = pack_frame(&mut frame, header(PduCommand::FPRD, 5, 0x1001, 0x0130), &[0, 0]).unwrap();
        // what the slave would send back
        frame[12] = 0x08;
        frame[14] = 1;

        let mut data = [0u8; 2];
        assert_eq!(unpack_frame(&frame[.. size], PduCommand::FPRD, 5, &mut data).unwrap(), Some(1));
        assert_eq!(data, [0x08, 0]);

        let mut data = [0u8; 2];
        assert_eq!(unpack_frame(&frame[.. size], PduCommand::FPRD, 6, &mut data).unwrap(), None);
        assert_eq!(unpack_frame(&frame[.. size], PduCommand::FPWR, 5, &mut data).unwrap(), None);
        assert!(unpack_frame(&frame[.. size], PduCommand::FPRD, 5, &mut [0u8; 4]).is_err());
    }

    #[test]
    fn working_counter() {
        let answer = PduAnswer {answers: 2, value: 3u8};
        assert!(answer.clone().one().is_err());
        assert_eq!(answer.exact(2).unwrap(), 3);
    }

    #[test]
    fn oversized_pdu() {
        let mut frame = [0u8; MAX_ETHERCAT_FRAME];
        assert!(pack_frame(&mut frame, header(PduCommand::LRW, 0, 0, 0), &[0; MAX_PDU_DATA + 1]).is_err());
    }
}
