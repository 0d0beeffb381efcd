//! Node address discovery

use std::net::{IpAddr, Ipv4Addr, UdpSocket};

/// Resolves the address this node is reachable at
pub trait IpResolver {
    fn resolve(&self) -> String;
}

/// Asks the OS which interface would route to a public address
///
/// No packet is sent: connecting a UDP socket only selects a route.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemIpResolver;

impl IpResolver for SystemIpResolver {
    fn resolve(&self) -> String {
        get_ip().to_string()
    }
}

/// Returns the outbound interface address, or loopback if none is routable
pub fn get_ip() -> IpAddr {
    let discover = || -> std::io::Result<IpAddr> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect("8.8.8.8:80")?;
        Ok(socket.local_addr()?.ip())
    };

    match discover() {
        Ok(ip) if !ip.is_unspecified() => ip,
        Ok(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
        Err(e) => {
            tracing::debug!("IP discovery failed, falling back to loopback: {}", e);
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}
