use std::io;
use std::net::{SocketAddr, IpAddr, Ipv4Addr};
use core::time::Duration;
use super::{EthercatSocket, ETHERCAT_PROTOCOL};

/**
    UDP socket with fixed port, allowing ethercat com through a regular switch
*/
pub struct UdpSocket {
    socket: std::net::UdpSocket,
    address: SocketAddr,

    filter_address: bool,
}

impl UdpSocket {
    /// according to ETG.1000.4 only IPv4 is supported, and port is fixed, hence this function only requires the host address
    pub fn new(segment: Ipv4Addr) -> io::Result<Self> {
        let address = SocketAddr::new(IpAddr::V4(segment), ETHERCAT_PROTOCOL);
        let socket = std::net::UdpSocket::bind(SocketAddr::new(
                IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                ETHERCAT_PROTOCOL,
                ))?;
        Ok(Self {
            address,
            socket,
            filter_address: false,
        })
    }
    /// ignore frames not coming from the segment address
    pub fn set_filter_address(&mut self, enable: bool) {
        self.filter_address = enable;
    }
}

impl EthercatSocket for UdpSocket {
    fn receive(&self, data: &mut [u8]) -> io::Result<usize> {
        loop {
            let (size, src) = self.socket.recv_from(data)?;
            // ignore wrong hosts
            if self.filter_address && self.address != src  {continue}
            return Ok(size)
        }
    }
    fn send(&self, data: &[u8]) -> io::Result<()> {
        let sent = self.socket.send_to(data, self.address)?;
        if sent != data.len()
            {return Err(io::Error::new(io::ErrorKind::WriteZero, "ethercat frame partially sent"))}
        Ok(())
    }
    fn set_timeout(&self, timeout: Duration) -> io::Result<()> {
        self.socket.set_read_timeout(Some(timeout))
    }
    fn max_frame(&self) -> usize  {1472}
}
