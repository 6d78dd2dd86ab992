//! LAN discovery of Broadlink devices
//!
//! A hello datagram carrying the local time and the address to answer to is
//! broadcast on port 80; every device on the segment answers with its type, mac
//! and name. Answers are collected until the timeout runs out.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use chrono::{DateTime, Datelike, FixedOffset, Local, Timelike};
use tracing::{debug, info, warn};

use super::protocol::{checksum, ProtocolError};

const HELLO_LEN: usize = 0x30;
const RESPONSE_MIN_LEN: usize = 0x40;
const BROADCAST: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), 80);

/// One discovery answer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub host: SocketAddr,
    pub devtype: u16,
    pub mac: [u8; 6],
    pub name: String,
}

pub fn hello_packet(local_ip: Ipv4Addr, port: u16, now: &DateTime<FixedOffset>) -> [u8; HELLO_LEN] {
    let mut packet = [0u8; HELLO_LEN];

    let tz_hours = now.offset().local_minus_utc() / 3600;
    packet[0x08..0x0c].copy_from_slice(&tz_hours.to_le_bytes());
    packet[0x0c..0x0e].copy_from_slice(&(now.year() as u16).to_le_bytes());
    packet[0x0e] = now.minute() as u8;
    packet[0x0f] = now.hour() as u8;
    packet[0x10] = (now.year() % 100) as u8;
    packet[0x11] = now.weekday().number_from_monday() as u8;
    packet[0x12] = now.day() as u8;
    packet[0x13] = now.month() as u8;

    let mut address = local_ip.octets();
    address.reverse();
    packet[0x18..0x1c].copy_from_slice(&address);
    packet[0x1c..0x1e].copy_from_slice(&port.to_le_bytes());
    packet[0x26] = 6;

    let sum = checksum(&packet);
    packet[0x20..0x22].copy_from_slice(&sum.to_le_bytes());
    packet
}

pub fn parse_response(response: &[u8], from: SocketAddr) -> Result<DiscoveredDevice, ProtocolError> {
    if response.len() < RESPONSE_MIN_LEN {
        return Err(ProtocolError::Truncated {
            got: response.len(),
            need: RESPONSE_MIN_LEN,
        });
    }

    let devtype = u16::from_le_bytes([response[0x34], response[0x35]]);
    let mut mac = [0u8; 6];
    mac.copy_from_slice(&response[0x3a..0x40]);
    mac.reverse();
    let name_bytes = response[0x40..].split(|b| *b == 0).next().unwrap_or_default();

    Ok(DiscoveredDevice {
        host: from,
        devtype,
        mac,
        name: String::from_utf8_lossy(name_bytes).into_owned(),
    })
}

/// Address of the interface that routes to the internet
pub fn default_local_ip() -> Result<Ipv4Addr, ProtocolError> {
    let probe = UdpSocket::bind(("0.0.0.0", 0))?;
    probe.connect(("8.8.8.8", 53))?;
    match probe.local_addr()?.ip() {
        IpAddr::V4(ip) => Ok(ip),
        IpAddr::V6(_) => Err(ProtocolError::Io(std::io::Error::new(
            std::io::ErrorKind::AddrNotAvailable,
            "no IPv4 route",
        ))),
    }
}

/// Broadcasts a hello and gathers answers until `timeout` has passed
pub fn discover(
    timeout: Duration,
    local_ip: Option<Ipv4Addr>,
) -> Result<Vec<DiscoveredDevice>, ProtocolError> {
    let local_ip = match local_ip {
        Some(ip) => ip,
        None => default_local_ip()?,
    };
    let socket = UdpSocket::bind((local_ip, 0))?;
    socket.set_broadcast(true)?;
    let port = socket.local_addr()?.port();

    info!("Discovering broadlink devices from {}:{}", local_ip, port);
    let hello = hello_packet(local_ip, port, &Local::now().fixed_offset());
    socket.send_to(&hello, BROADCAST)?;

    let deadline = Instant::now() + timeout;
    let mut found = Vec::new();
    let mut buffer = [0u8; 1024];

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        socket.set_read_timeout(Some(remaining))?;

        match socket.recv_from(&mut buffer) {
            Ok((len, from)) => match parse_response(&buffer[..len], from) {
                Ok(device) => {
                    debug!(
                        "Found {:#06x} at {} named {:?}",
                        device.devtype, device.host, device.name
                    );
                    found.push(device);
                }
                Err(e) => warn!("Ignoring discovery answer from {}: {}", from, e),
            },
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                break;
            }
            Err(e) => return Err(e.into()),
        }
    }

    info!("Discovery finished with {} answer(s)", found.len());
    Ok(found)
}
