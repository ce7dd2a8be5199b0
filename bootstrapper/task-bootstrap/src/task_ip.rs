use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use thiserror::Error;
use tracing::debug;

use crate::env::EnvSnapshot;

pub const LIBPROCESS_IP: &str = "LIBPROCESS_IP";
pub const MESOS_CONTAINER_IP: &str = "MESOS_CONTAINER_IP";

/// Routing target; nothing is sent, connecting a UDP socket only
/// selects the outbound interface.
const ROUTE_TARGET: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)), 53);

#[derive(Error, Debug)]
pub enum TaskIpError {
    #[error("Cannot find the container's IP address: {source}")]
    Route { source: io::Error },

    #[error("Cannot find the container's IP address: outbound interface reports {addr}")]
    Unspecified { addr: IpAddr },
}

/// The container's own address: `MESOS_CONTAINER_IP`, then a specific
/// `LIBPROCESS_IP`, then the address of the default outbound interface.
pub fn discover_container_ip(env: &EnvSnapshot) -> Result<IpAddr, TaskIpError> {
    if let Some(ip) = parse_var(env, MESOS_CONTAINER_IP) {
        return Ok(ip);
    }
    if let Some(ip) = parse_var(env, LIBPROCESS_IP).filter(|ip| !ip.is_unspecified()) {
        return Ok(ip);
    }

    let addr = outbound_address().map_err(|source| TaskIpError::Route { source })?;
    if addr.is_unspecified() {
        return Err(TaskIpError::Unspecified { addr });
    }
    Ok(addr)
}

fn parse_var(env: &EnvSnapshot, key: &str) -> Option<IpAddr> {
    let raw = env.get(key)?;
    match raw.trim().parse() {
        Ok(ip) => Some(ip),
        Err(e) => {
            debug!("Ignoring {}={}: {}", key, raw, e);
            None
        }
    }
}

fn outbound_address() -> io::Result<IpAddr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    socket.connect(ROUTE_TARGET)?;
    Ok(socket.local_addr()?.ip())
}

/// Exports the address so later stages and the workload inherit it.
pub fn publish_container_ip(ip: IpAddr) {
    let value = ip.to_string();
    std::env::set_var(LIBPROCESS_IP, &value);
    std::env::set_var(MESOS_CONTAINER_IP, &value);
}
