//! Socket setup around the router.

use std::{
    io,
    net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket},
};
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Binds `ip:start_port`, moving up one port at a time while ports are taken.
pub async fn bind_first_free(ip: IpAddr, start_port: u16) -> io::Result<TcpListener> {
    let mut port = start_port;
    loop {
        match TcpListener::bind(SocketAddr::new(ip, port)).await {
            Ok(listener) => return Ok(listener),
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                if port == u16::MAX {
                    return Err(io::Error::new(
                        io::ErrorKind::AddrInUse,
                        format!("no available ports found in range {}-{}", start_port, u16::MAX),
                    ));
                }
                info!("Port {} is in use, trying next port...", port);
                port += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Best guess at this host's LAN address, for the startup banner.
///
/// Connecting a UDP socket only selects a route; nothing is sent.
pub fn local_ip() -> IpAddr {
    let lookup = || -> io::Result<IpAddr> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.connect((Ipv4Addr::new(10, 255, 255, 255), 1))?;
        Ok(socket.local_addr()?.ip())
    };
    lookup().unwrap_or_else(|e| {
        warn!("Failed to get local IP address: {}", e);
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    })
}
