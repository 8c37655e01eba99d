use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use log::{debug, info};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

use crate::error::{DemuxError, Result};
use crate::interfaces::OutputFactory;
use crate::processor::Demuxer;

/// Largest datagram we expect; a full UDP payload.
const MAX_DATAGRAM: usize = 65_536;

/// Non-blocking IPv4 datagram socket bound to `addr`; multicast groups
/// are joined on the default interface.
pub fn create_udp_socket(addr: &str) -> Result<Socket> {
    let sock_addr: SocketAddr = addr
        .parse()
        .map_err(|e| DemuxError::InvalidConfig(format!("bad UDP address {addr}: {e}")))?;
    let ip = match sock_addr.ip() {
        IpAddr::V4(v4) => v4,
        _ => return Err(DemuxError::InvalidConfig("only IPv4 is supported".into())),
    };

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&sock_addr.into())?;

    if ip.is_multicast() {
        socket.join_multicast_v4(&ip, &Ipv4Addr::UNSPECIFIED)?;
        info!("joined multicast group {ip}");
    }

    socket.set_nonblocking(true)?;
    Ok(socket)
}

/// Bind `addr` as a tokio socket. Must be called inside a runtime.
pub fn bind_udp(addr: &str) -> Result<UdpSocket> {
    let socket = create_udp_socket(addr)?;
    Ok(UdpSocket::from_std(socket.into())?)
}

/// Push every datagram into `demuxer` until `shutdown` resolves, then
/// finish the session.
pub async fn receive_udp<F, S>(demuxer: &mut Demuxer<F>, socket: &UdpSocket, shutdown: S) -> Result<()>
where
    F: OutputFactory,
    S: Future<Output = ()>,
{
    let mut buf = vec![0u8; MAX_DATAGRAM];
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                debug!("UDP receive stopped");
                break;
            }
            received = socket.recv(&mut buf) => {
                let n = received?;
                demuxer.push(&buf[..n])?;
            }
        }
    }
    demuxer.finish()
}
