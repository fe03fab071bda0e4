use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use core::time::Duration;
use packed_struct::prelude::*;
use super::{EthercatSocket, ETHERCAT_PROTOCOL};

/// size of an ethernet header without vlan tag
const HEADER_SIZE: usize = 14;
/// minimum size of an ethernet frame (without checksum), smaller frames are padded
const MIN_FRAME: usize = 60;
/// maximum size of an ethernet frame (without checksum)
const MAX_FRAME: usize = 1514;
/// `sll_pkttype` of frames emitted by this host, captured back by the packet socket
const PACKET_OUTGOING: u8 = 4;
/// source address of sent frames, slaves flip the locally administered bit when forwarding
const MASTER_ADDRESS: [u8; 6] = [0x10, 0x10, 0x10, 0x10, 0x10, 0x10];
const BROADCAST: [u8; 6] = [0xff; 6];


/**
    Raw socket allowing direct ethercat com, but only one segment on the ethernet network

    Raw sockets are not implemented in std::net, so here is an implementation found in `smoltcp` and `ethercrab`.
    This implementation is linux-specific
*/
#[derive(Debug)]
pub struct EthernetSocket {
    lower: libc::c_int,
    ifreq: ifreq,
}

impl EthernetSocket {
    pub fn new(interface: &str) -> io::Result<Self> {
        if interface.len() >= libc::IF_NAMESIZE
            {return Err(io::Error::new(io::ErrorKind::InvalidInput, "interface name too long"))}

        // create
        let lower = unsafe {
            let lower = libc::socket(
                // Ethernet II frames
                libc::AF_PACKET,
                libc::SOCK_RAW,
                ETHERCAT_PROTOCOL.to_be() as i32,
            );
            if lower == -1 {
                return Err(io::Error::last_os_error());
            }
            lower
        };

        let mut new = EthernetSocket {
            lower,
            ifreq: ifreq_for(interface),
        };

        // bind
        let sockaddr = libc::sockaddr_ll {
            sll_family: libc::AF_PACKET as u16,
            sll_protocol: ETHERCAT_PROTOCOL.to_be(),
            sll_ifindex: ifreq_ioctl(new.lower, &mut new.ifreq, libc::SIOCGIFINDEX)?,
            sll_hatype: 1,
            sll_pkttype: 0,
            sll_halen: 6,
            sll_addr: [0; 8],
        };

        unsafe {
            #[allow(trivial_casts)]
            let res = libc::bind(
                new.lower,
                &sockaddr as *const libc::sockaddr_ll as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            );
            if res == -1 {
                return Err(io::Error::last_os_error());
            }
        }

        Ok(new)
    }
}

impl Drop for EthernetSocket {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.lower);
        }
    }
}

impl AsRawFd for EthernetSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.lower
    }
}

impl EthercatSocket for EthernetSocket {
    fn receive(&self, data: &mut [u8]) -> io::Result<usize> {
        let mut packed = [0u8; MAX_FRAME];
        loop {
            let mut source: libc::sockaddr_ll = unsafe {std::mem::zeroed()};
            let mut source_len = std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t;
            let len = unsafe {
                libc::recvfrom(
                    self.as_raw_fd(),
                    packed.as_mut_ptr() as *mut libc::c_void,
                    packed.len(),
                    0,
                    &mut source as *mut libc::sockaddr_ll as *mut libc::sockaddr,
                    &mut source_len,
                )
            };
            if len < 0
                {return Err(io::Error::last_os_error())}
            // our own frames are looped back by the packet socket, they are not answers
            if source.sll_pkttype == PACKET_OUTGOING
                {continue}
            let len = len as usize;
            if len < HEADER_SIZE
                {continue}

            let header = EthernetHeader::unpack_from_slice(&packed[.. HEADER_SIZE])
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "malformed ethernet header"))?;
            if header.ty != ETHERCAT_PROTOCOL
                {continue}

            let content = &packed[HEADER_SIZE .. len];
            let size = content.len().min(data.len());
            data[.. size].copy_from_slice(&content[.. size]);
            return Ok(size)
        }
    }
    fn send(&self, data: &[u8]) -> io::Result<()> {
        let mut packed = heapless::Vec::<u8, MAX_FRAME>::new();
        let header = EthernetHeader {
            dst: BROADCAST,
            src: MASTER_ADDRESS,
            // vlan is said to be optional and this is not present in most ethercat frames, so will not be used here
            ty: ETHERCAT_PROTOCOL,
            }.pack()
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "cannot pack ethernet header"))?;
        packed.extend_from_slice(&header)
            .and_then(|_| packed.extend_from_slice(data))
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "ethercat frame too big for ethernet"))?;
        // the ethernet checksum is appended by the network card
        if packed.len() < MIN_FRAME {
            packed.resize(MIN_FRAME, 0)
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "cannot pad ethernet frame"))?;
        }
        let data = packed.as_slice();

        let len = unsafe {
            libc::write(
                self.as_raw_fd(),
                data.as_ptr() as *const libc::c_void,
                data.len(),
            )
        };
        if len < 0 {
            Err(io::Error::last_os_error())
        } else if (len as usize) != data.len() {
            Err(io::Error::new(io::ErrorKind::WriteZero, "ethernet frame partially sent"))
        } else {
            Ok(())
        }
    }
    fn set_timeout(&self, timeout: Duration) -> io::Result<()> {
        let value = libc::timeval {
            tv_sec: timeout.as_secs() as libc::time_t,
            tv_usec: timeout.subsec_micros() as libc::suseconds_t,
        };
        let res = unsafe {
            libc::setsockopt(
                self.lower,
                libc::SOL_SOCKET,
                libc::SO_RCVTIMEO,
                &value as *const libc::timeval as *const libc::c_void,
                std::mem::size_of::<libc::timeval>() as libc::socklen_t,
            )
        };
        if res == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
    fn max_frame(&self) -> usize  {MAX_FRAME - HEADER_SIZE}
}


// intermediate C-like structures and functions

#[repr(C)]
#[derive(Debug)]
struct ifreq {
    ifr_name: [libc::c_char; libc::IF_NAMESIZE],
    ifr_data: libc::c_int, /* ifr_ifindex or ifr_mtu */
}

fn ifreq_ioctl(
    lower: libc::c_int,
    ifreq: &mut ifreq,
    cmd: libc::c_ulong,
) -> io::Result<libc::c_int> {
    unsafe {
        #[allow(trivial_casts)]
        let res = libc::ioctl(lower, cmd as _, ifreq as *mut ifreq);

        if res == -1 {
            return Err(io::Error::last_os_error());
        }
    }

    Ok(ifreq.ifr_data)
}

fn ifreq_for(name: &str) -> ifreq {
    let mut ifreq = ifreq {
        ifr_name: [0; libc::IF_NAMESIZE],
        ifr_data: 0,
    };
    for (i, byte) in name.as_bytes().iter().enumerate() {
        ifreq.ifr_name[i] = *byte as libc::c_char
    }
    ifreq
}



#[derive(PackedStruct, Clone, Debug)]
#[packed_struct(size_bytes="14", bit_numbering = "msb0", endian = "msb")]
struct EthernetHeader {
    #[packed_field(bytes="0:5")]  dst: [u8;6],
    #[packed_field(bytes="6:11")]  src: [u8;6],
    // vlan is said to be optional and this is not present in most ethercat frames, so will not be used here
    #[packed_field(bytes="12:13")]  ty: u16,
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ethernet_header() {
        let header = EthernetHeader {
            dst: BROADCAST,
            src: MASTER_ADDRESS,
            ty: ETHERCAT_PROTOCOL,
            }.pack().unwrap();
        assert_eq!(&header[.. 6], &[0xff; 6]);
        assert_eq!(&header[6 .. 12], &MASTER_ADDRESS);
        assert_eq!(&header[12 ..], &[0x88, 0xa4]);
        assert_eq!(EthernetHeader::unpack_from_slice(&header).unwrap().ty, ETHERCAT_PROTOCOL);
    }
}
