//! implementation of CoE (Canopen Over Ethercat)

use core::fmt;
use std::time::Duration;
use bilge::prelude::*;
use crate::{
	mailbox::{Mailbox, MailboxType},
	rawmaster::RawMaster,
	data::{self, PduData, PackingResult, Cursor},
	error::{EthercatError, EthercatResult},
	};


/// maximum byte size of sdo data that can be expedited
const EXPEDITED_MAX_SIZE: usize = 4;
/// minimum size of segment data, shorter segments are padded
const SEGMENT_MIN_SIZE: usize = 7;

/**
    implementation of CoE (Canopen Over Ethercat) SDO client

    It works exactly as in a Can bus, except each of its frame is encapsulated in an ethercat mailbox frame, and PDOs access is therefore not realtime.
    For realtime PDOs exchange, they must be mapped to the logical memory using a SM (Sync Manager) channel.

    Canopen protocol exposes 2 data structures:

    - a dictionnary of simple values or single level structures, for non-realtime access

        these are named SDO (Service Data Object).
        See [crate::sdo] for more details

    - several buffers gathering dictionnary objects for realtime access

        these are named PDO (Process Data Object)

    Transfers are expedited when the data fits in 4 bytes, else normal and segmented when the data does not fit in the mailbox.
*/
pub struct Can<'a> {
    master: &'a RawMaster,
    mailbox: &'a mut Mailbox,
    timeout: Duration,
}
impl<'a> Can<'a> {
    /// `timeout` is the maximum delay for each mailbox exchange
    pub fn new(master: &'a RawMaster, mailbox: &'a mut Mailbox, timeout: Duration) -> Self {
        Self {master, mailbox, timeout}
    }

    /// read an SDO into the given buffer, returns the number of bytes received
	pub fn sdo_read(&mut self, index: u16, sub: u8, data: &mut [u8]) -> EthercatResult<usize, SdoAbortCode>   {
        let mut buffer = vec![0; self.mailbox.read_capacity().max(self.mailbox.write_capacity())];

        // generic request
        self.send(&mut buffer, |frame| {
            frame.pack(&SdoHeader::new(
                    false,
                    false,
                    u2::new(0),
                    false,
                    u3::from(SdoCommandRequest::Upload),
                    index,
                    sub,
                ))?;
            frame.write(&[0; 4])
        })?;

        // receive data
        let (header, content) = self.receive_response(&mut buffer, SdoCommandResponse::Upload, index, sub)?;
        let mut content = Cursor::new(content);

        if header.expedited() {
            // expedited transfer
            let size = if header.sized()
                {EXPEDITED_MAX_SIZE - usize::from(header.size().value())}
                else {EXPEDITED_MAX_SIZE};
            let received = content.read(size)?;
            data.get_mut(.. size)
                .ok_or(EthercatError::Master("SDO bigger than the given buffer"))?
                .copy_from_slice(received);
            return Ok(size)
        }

        // normal transfer, eventually segmented
        let total = usize::try_from(content.unpack::<u32>()?)
            .map_err(|_| EthercatError::Master("SDO too big for master memory"))?;
        let mut received = Cursor::new(
            data.get_mut(.. total)
                .ok_or(EthercatError::Master("SDO bigger than the given buffer"))?
            );
        let first = content.remain();
        received.write(&first[.. first.len().min(total)])?;

        // receive more data from segments
        let mut toggle = false;
        while received.remain().len() != 0 {
            // send segment request
            self.send(&mut buffer, |frame| {
                frame.pack(&SdoSegmentHeader::new(
                        false,
                        u3::new(0),
                        toggle,
                        u3::from(SdoCommandRequest::UploadSegment),
                    ))?;
                frame.write(&[0; SEGMENT_MIN_SIZE])
            })?;

            // receive segment
            let (header, segment) = self.receive_segment(&mut buffer, SdoCommandResponse::UploadSegment, toggle)?;
            let size = if segment.len() == SEGMENT_MIN_SIZE
                {SEGMENT_MIN_SIZE - usize::from(header.size().value())}
                else {segment.len()};
            let segment = &segment[.. size.min(segment.len())];
            received.write(segment)
                .map_err(|_| EthercatError::Protocol("received more SDO data than announced"))?;

            if ! header.more()  {break}
            toggle = ! toggle;
        }
        if received.remain().len() != 0
            {return Err(EthercatError::Protocol("received less SDO data than announced"))}
        Ok(total)
	}

	/// write an SDO from the given bytes
	pub fn sdo_write(&mut self, index: u16, sub: u8, data: &[u8]) -> EthercatResult<(), SdoAbortCode>  {
        let mut buffer = vec![0; self.mailbox.read_capacity().max(self.mailbox.write_capacity())];

		if data.len() <= EXPEDITED_MAX_SIZE {
			// expedited transfer
			// send data in the 4 bytes instead of data size
            self.send(&mut buffer, |frame| {
                frame.pack(&SdoHeader::new(
                        true,
                        true,
                        u2::new((EXPEDITED_MAX_SIZE - data.len()) as u8),
                        false,
                        u3::from(SdoCommandRequest::Download),
                        index,
                        sub,
                    ))?;
                frame.write(data)?;
                frame.write(&[0; EXPEDITED_MAX_SIZE][data.len() ..])
            })?;
            // receive acknowledge
            self.receive_response(&mut buffer, SdoCommandResponse::Download, index, sub)?;
            return Ok(())
		}

        // normal transfer, eventually segmented
        let total = u32::try_from(data.len())
            .map_err(|_| EthercatError::Master("SDO too big for CoE"))?;
        let mut data = Cursor::new(data);

        // send one download request with the start of data
        let capacity = self.mailbox.write_capacity()
            - CoeHeader::packed_size()
            - SdoHeader::packed_size()
            - <u32 as PduData>::packed_size();
        let first = data.read(data.remain().len().min(capacity))?;
        self.send(&mut buffer, |frame| {
            frame.pack(&SdoHeader::new(
                    true,
                    false,
                    u2::new(0),
                    false,
                    u3::from(SdoCommandRequest::Download),
                    index,
                    sub,
                ))?;
            frame.pack(&total)?;
            frame.write(first)
        })?;
        // receive acknowledge
        self.receive_response(&mut buffer, SdoCommandResponse::Download, index, sub)?;

        // send many segments for the rest of the data, aknowledge each time
        let capacity = self.mailbox.write_capacity()
            - CoeHeader::packed_size()
            - SdoSegmentHeader::packed_size();
        let mut toggle = false;
        while data.remain().len() != 0 {
            let segment = data.read(data.remain().len().min(capacity))?;
            let more = data.remain().len() != 0;
            self.send(&mut buffer, |frame| {
                frame.pack(&SdoSegmentHeader::new(
                        more,
                        u3::new(SEGMENT_MIN_SIZE.saturating_sub(segment.len()) as u8),
                        toggle,
                        u3::from(SdoCommandRequest::DownloadSegment),
                    ))?;
                frame.write(segment)?;
                frame.write(&[0; SEGMENT_MIN_SIZE][segment.len().min(SEGMENT_MIN_SIZE) ..])
            })?;
            // receive aknowledge
            self.receive_segment(&mut buffer, SdoCommandResponse::DownloadSegment, toggle)?;
            toggle = !toggle;
        }
        Ok(())
	}

	/// write a CoE SDO request in the mailbox, `content` packs what follows the CoE header
	fn send<F>(&mut self, buffer: &mut [u8], content: F) -> EthercatResult<(), SdoAbortCode>
	where F: FnOnce(&mut Cursor<&mut [u8]>) -> PackingResult<()>
	{
        let mut frame = Cursor::new(buffer);
        frame.pack(&CoeHeader::new(u9::new(0), CanService::SdoRequest))?;
        content(&mut frame)?;
        self.mailbox.write(self.master, MailboxType::Can, frame.finish(), self.timeout)
            .map_err(EthercatError::upgrade)
	}

	/// read the next CoE SDO frame in the mailbox, ignoring emergency messages
	fn receive<'b>(&mut self, buffer: &'b mut [u8]) -> EthercatResult<(CanService, &'b [u8]), SdoAbortCode> {
        loop {
            let size = self.mailbox.read(self.master, MailboxType::Can, buffer, self.timeout)
                .map_err(EthercatError::upgrade)?
                .len();
            let mut frame = Cursor::new(&buffer[.. size]);
            let header = frame.unpack::<CoeHeader>()?;
            match header.service() {
                CanService::Emergency => {
                    log::warn!("slave {} sent emergency message {:02x?}", self.mailbox.slave(), frame.remain());
                    continue
                    },
                service => {
                    // check for an abort, which may come as a request or response
                    let remain = frame.remain();
                    if let Ok(sdo) = SdoHeader::unpack(remain) {
                        if sdo.command() == u3::from(SdoCommandRequest::Abort) {
                            let code = SdoAbortCode::unpack(&remain[SdoHeader::packed_size() ..])?;
                            log::debug!("slave {} aborted SDO 0x{:04x}.{}: {}", self.mailbox.slave(), sdo.index(), sdo.sub(), code);
                            return Err(EthercatError::Slave(code))
                        }
                    }
                    return Ok((service, &buffer[CoeHeader::packed_size() .. size]))
                    },
            }
        }
	}

	fn receive_response<'b>(&mut self, buffer: &'b mut [u8], expected: SdoCommandResponse, index: u16, sub: u8)
        -> EthercatResult<(SdoHeader, &'b [u8]), SdoAbortCode>
    {
        let (service, frame) = self.receive(buffer)?;
        if service != CanService::SdoResponse
            {return Err(EthercatError::Protocol("unexpected COE service during SDO operation"))}
        let mut frame = Cursor::new(frame);
        let header = frame.unpack::<SdoHeader>()?;
        if header.command() != u3::from(expected)
            {return Err(EthercatError::Protocol("slave answered with wrong operation"))}
        if header.index() != index        {return Err(EthercatError::Protocol("slave answered about wrong item"))}
        if header.sub() != sub            {return Err(EthercatError::Protocol("slave answered about wrong subitem"))}
        Ok((header, frame.remain()))
	}

	fn receive_segment<'b>(&mut self, buffer: &'b mut [u8], expected: SdoCommandResponse, toggle: bool)
        -> EthercatResult<(SdoSegmentHeader, &'b [u8]), SdoAbortCode>
    {
        let (service, frame) = self.receive(buffer)?;
        if service != CanService::SdoResponse
            {return Err(EthercatError::Protocol("unexpected COE service during SDO operation"))}
        let mut frame = Cursor::new(frame);
        let header = frame.unpack::<SdoSegmentHeader>()?;
        if header.command() != u3::from(expected)
            {return Err(EthercatError::Protocol("slave answered with wrong operation"))}
        if header.toggle() != toggle
            {return Err(EthercatError::Protocol("bad toggle bit in segment received"))}
        Ok((header, frame.remain()))
	}
}



#[bitsize(16)]
#[derive(TryFromBits, DebugBits, Copy, Clone)]
pub struct CoeHeader {
    /// present in the Can protocol, but not used in CoE
    pub number: u9,
    reserved: u3,
    /// Can command
    pub service: CanService,
}
data::bilge_pdudata!(CoeHeader, u16);

/**
    Type of can service

    receiving and transmiting is from the point of view of the slave:
        - transmitting is slave -> master
        - receiving is master -> slave
*/
#[bitsize(4)]
#[derive(TryFromBits, Debug, Copy, Clone, Eq, PartialEq)]
pub enum CanService {
    Emergency = 0x1,
    SdoRequest = 0x2,
    SdoResponse = 0x3,
    TransmitPdo = 0x4,
    ReceivePdo = 0x5,
    TransmitPdoRemoteRequest = 0x6,
    ReceivePdoRemoteRequest = 0x7,
    SdoInformation = 0x8,
}


/// Header for operations with SDOs
///
/// ETG.1000.6 5.6.2
#[bitsize(32)]
#[derive(FromBits, DebugBits, Copy, Clone)]
pub struct SdoHeader {
    /// true if field `size` is used
    pub sized: bool,
    /// true in case of an expedited transfer (the data size specified by `size`)
    pub expedited: bool,
    /// indicate the data size but not as an integer.
    /// this value shall be `4 - data.len()`
    pub size: u2,
    /// true if a complete SDO is accessed
    pub complete: bool,
    /// operation to perform with the indexed SDO, this should be a value of [SdoCommandRequest] or [SdoCommandResponse]
    pub command: u3,
    /// SDO index
    pub index: u16,
    /// SDO subindex
    pub sub: u8,
}
data::bilge_pdudata!(SdoHeader, u32);

#[bitsize(8)]
#[derive(FromBits, DebugBits, Copy, Clone)]
pub struct SdoSegmentHeader {
    pub more: bool,
    /// number of padding bytes in a segment shorter than 7 bytes
    pub size: u3,
    pub toggle: bool,
    pub command: u3,
}
data::bilge_pdudata!(SdoSegmentHeader, u8);

/// request operation to perform with an SDO in CoE
///
/// ETG.1000.6 5.6.2.1-7
#[bitsize(3)]
#[derive(TryFromBits, Debug, Copy, Clone, Eq, PartialEq)]
pub enum SdoCommandRequest {
    Download = 0x1,
    DownloadSegment = 0x0,
    Upload = 0x2,
    UploadSegment = 0x3,
    Abort = 0x4,
}

/// response operation to perform with an SDO in CoE
///
/// ETG.1000.6 5.6.2.1-7
#[bitsize(3)]
#[derive(TryFromBits, Debug, Copy, Clone, Eq, PartialEq)]
pub enum SdoCommandResponse {
    Download = 0x3,
    DownloadSegment = 0x1,
    Upload = 0x2,
    UploadSegment = 0x0,
    Abort = 0x4,
}

/**
    reason given by a slave for aborting an SDO transfer

    ETG.1000.6 table 41
*/
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct SdoAbortCode(pub u32);

impl SdoAbortCode {
    /// Toggle bit not changed
    pub const BAD_TOGGLE: Self = Self(0x05_03_00_00);
    /// SDO protocol timeout
    pub const TIMEOUT: Self = Self(0x05_04_00_00);
    /// Attempt to write to a read only object
    pub const READ_ONLY: Self = Self(0x06_01_00_02);
    /// The object does not exist in the object directory
    pub const INVALID_INDEX: Self = Self(0x06_02_00_00);
    /// Data type does not match, length of service parameter does not match
    pub const INVALID_LENGTH: Self = Self(0x06_07_00_10);
    /// Subindex does not exist
    pub const INVALID_SUB_INDEX: Self = Self(0x06_09_00_11);
    /// Value range of parameter exceeded (only for write access)
    pub const VALUE_OUT_OF_RANGE: Self = Self(0x06_09_00_30);
    /// Data cannot be transferred or stored to the application because of the present device state
    pub const STATE_REFUSED: Self = Self(0x08_00_00_22);

    pub fn object_related(self) -> bool   {self.0 >> 24 == 0x06}
    pub fn subitem_related(self) -> bool  {self.0 >> 16 == 0x06_09}
    pub fn mapping_related(self) -> bool  {self.0 >> 16 == 0x06_04}
    pub fn device_related(self) -> bool   {self.0 >> 24 == 0x08}
    pub fn protocol_related(self) -> bool {self.0 >> 24 == 0x05}

    /// human readable explanation of the code
    pub fn description(&self) -> &'static str {
        match self.0 {
            0x05_03_00_00 => "Toggle bit not changed",
            0x05_04_00_00 => "SDO protocol timeout",
            0x05_04_00_01 => "Client/Server command specifier not valid or unknown",
            0x05_04_00_05 => "Out of memory",
            0x06_01_00_00 => "Unsupported access to an object",
            0x06_01_00_01 => "Attempt to read to a write only object",
            0x06_01_00_02 => "Attempt to write to a read only object",
            0x06_01_00_03 => "Subindex cannot be written, SI0 must be 0 for write access",
            0x06_01_00_04 => "SDO Complete access not supported for objects of variable length",
            0x06_01_00_05 => "Object length exceeds mailbox size",
            0x06_01_00_06 => "Object mapped to RxPDO, SDO Download blocked",
            0x06_02_00_00 => "The object does not exist in the object directory",
            0x06_04_00_41 => "The object can not be mapped into the PDO",
            0x06_04_00_42 => "The number and length of the objects to be mapped would exceed the PDO length",
            0x06_04_00_43 => "General parameter incompatibility reason",
            0x06_04_00_47 => "General internal incompatibility in the device",
            0x06_06_00_00 => "Access failed due to a hardware error",
            0x06_07_00_10 => "Data type does not match, length of service parameter does not match",
            0x06_07_00_12 => "Data type does not match, length of service parameter too high",
            0x06_07_00_13 => "Data type does not match, length of service parameter too low",
            0x06_09_00_11 => "Subindex does not exist",
            0x06_09_00_30 => "Value range of parameter exceeded",
            0x06_09_00_31 => "Value of parameter written too high",
            0x06_09_00_32 => "Value of parameter written too low",
            0x06_09_00_36 => "Maximum value is less than minimum value",
            0x08_00_00_00 => "General error",
            0x08_00_00_20 => "Data cannot be transferred or stored to the application",
            0x08_00_00_21 => "Data cannot be transferred or stored to the application because of local control",
            0x08_00_00_22 => "Data cannot be transferred or stored to the application because of the present device state",
            0x08_00_00_23 => "Object dictionary dynamic generation fails or no object dictionary is present",
            _ => "Unknown abort code",
        }
    }
}
impl fmt::Display for SdoAbortCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x{:08x} {}", self.0, self.description())
    }
}
impl PduData for SdoAbortCode {
	type Packed = [u8; 4];

	fn pack(&self, dst: &mut [u8]) -> PackingResult<()>  {self.0.pack(dst)}
	fn unpack(src: &[u8]) -> PackingResult<Self>  {Ok(Self(u32::unpack(src)?))}
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expedited_download_header() {
        let mut packed = [0u8; 4];
        SdoHeader::new(true, true, u2::new(2), false, u3::from(SdoCommandRequest::Download), 0x6060, 0)
            .pack(&mut packed).unwrap();
        // 0x2b is the usual command byte of a 2 bytes expedited download
        assert_eq!(packed, [0x2b, 0x60, 0x60, 0x00]);

        let mut packed = [0u8; 2];
        CoeHeader::new(u9::new(0), CanService::SdoRequest).pack(&mut packed).unwrap();
        assert_eq!(packed, [0x00, 0x20]);
    }

    #[test]
    fn abort_codes() {
        let code = SdoAbortCode::unpack(&[0x00, 0x00, 0x02, 0x06]).unwrap();
        assert_eq!(code, SdoAbortCode::INVALID_INDEX);
        assert!(code.object_related());
        assert!(! code.device_related());
        assert_eq!(code.to_string(), "0x06020000 The object does not exist in the object directory");
        assert_eq!(SdoAbortCode(0x1234).description(), "Unknown abort code");
    }

    #[test]
    fn segment_header() {
        let header = SdoSegmentHeader::unpack(&[0x0b]).unwrap();
        assert!(header.more());
        assert_eq!(header.size().value(), 5);
        assert!(! header.toggle());
        assert_eq!(header.command(), u3::from(SdoCommandResponse::UploadSegment));
    }
}
