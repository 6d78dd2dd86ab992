//! Broadlink packet codec and session
//!
//! Every exchange is one UDP datagram each way. Packets carry a 0x38 byte clear
//! header followed by an AES-128-CBC encrypted payload:
//!
//! ```text
//! 0x00..0x08  magic
//! 0x20..0x22  packet checksum (LE)
//! 0x22..0x24  device error code (responses, LE)
//! 0x24..0x26  device type (LE)
//! 0x26..0x28  command (LE)
//! 0x28..0x2a  packet counter (LE)
//! 0x2a..0x30  mac, reversed
//! 0x30..0x34  session id (LE)
//! 0x34..0x36  payload checksum (LE)
//! 0x38..      encrypted payload, zero padded to 16 bytes
//! ```

use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use aes::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use tracing::{debug, warn};

use crate::device::DeviceError;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

pub const BOOTSTRAP_KEY: [u8; 16] = [
    0x09, 0x76, 0x28, 0x34, 0x3f, 0xe9, 0x9e, 0x23, 0x76, 0x5c, 0x15, 0x13, 0xac, 0xcf, 0x8b, 0x02,
];
pub const IV: [u8; 16] = [
    0x56, 0x2e, 0x17, 0x99, 0x6d, 0x09, 0x3d, 0x28, 0xdd, 0xb3, 0xba, 0x69, 0x5a, 0x2e, 0x6f, 0x58,
];
const MAGIC: [u8; 8] = [0x5a, 0xa5, 0xaa, 0x55, 0x5a, 0xa5, 0xaa, 0x55];
pub const HEADER_LEN: usize = 0x38;
const CHECKSUM_SEED: u16 = 0xbeaf;

pub const CMD_AUTH: u16 = 0x65;
pub const CMD_REQUEST: u16 = 0x6a;

const SEND_ATTEMPTS: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No answer after {0} attempts")]
    Timeout(usize),

    #[error("Response too short: {got} bytes, need {need}")]
    Truncated { got: usize, need: usize },

    #[error("Checksum mismatch: expected {expected:#06x}, got {actual:#06x}")]
    Checksum { expected: u16, actual: u16 },

    #[error("Device reported error {0:#06x}")]
    Device(i16),

    #[error("Payload cannot be decrypted")]
    Decrypt,
}

impl From<ProtocolError> for DeviceError {
    fn from(e: ProtocolError) -> Self {
        match e {
            ProtocolError::Io(_) | ProtocolError::Timeout(_) => DeviceError::Io(e.to_string()),
            other => DeviceError::Protocol(other.to_string()),
        }
    }
}

/// `0xbeaf` plus the wrapping byte sum
pub fn checksum(bytes: &[u8]) -> u16 {
    bytes
        .iter()
        .fold(CHECKSUM_SEED, |sum, byte| sum.wrapping_add(u16::from(*byte)))
}

pub fn encrypt(key: &[u8; 16], plaintext: &[u8]) -> Vec<u8> {
    let mut padded = plaintext.to_vec();
    padded.resize(plaintext.len().div_ceil(16) * 16, 0);
    Aes128CbcEnc::new(key.into(), (&IV).into()).encrypt_padded_vec_mut::<NoPadding>(&padded)
}

pub fn decrypt(key: &[u8; 16], ciphertext: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    Aes128CbcDec::new(key.into(), (&IV).into())
        .decrypt_padded_vec_mut::<NoPadding>(ciphertext)
        .map_err(|_| ProtocolError::Decrypt)
}

/// Session state of one authenticated (or authenticating) device
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    pub devtype: u16,
    pub mac: [u8; 6],
    pub count: u16,
    pub id: u32,
    pub key: [u8; 16],
}

impl Session {
    pub fn new(devtype: u16, mac: [u8; 6], count: u16) -> Self {
        Self {
            devtype,
            mac,
            count,
            id: 0,
            key: BOOTSTRAP_KEY,
        }
    }

    /// Builds the next command packet; advances the counter
    pub fn encode(&mut self, command: u16, payload: &[u8]) -> Vec<u8> {
        self.count = self.count.wrapping_add(1);

        let mut packet = vec![0u8; HEADER_LEN];
        packet[0x00..0x08].copy_from_slice(&MAGIC);
        packet[0x24..0x26].copy_from_slice(&self.devtype.to_le_bytes());
        packet[0x26..0x28].copy_from_slice(&command.to_le_bytes());
        packet[0x28..0x2a].copy_from_slice(&self.count.to_le_bytes());
        let mut mac = self.mac;
        mac.reverse();
        packet[0x2a..0x30].copy_from_slice(&mac);
        packet[0x30..0x34].copy_from_slice(&self.id.to_le_bytes());
        packet[0x34..0x36].copy_from_slice(&checksum(payload).to_le_bytes());

        packet.extend(encrypt(&self.key, payload));
        let sum = checksum(&packet);
        packet[0x20..0x22].copy_from_slice(&sum.to_le_bytes());
        packet
    }

    /// Verifies a response and returns its decrypted payload
    pub fn decode(&self, response: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        if response.len() < HEADER_LEN {
            return Err(ProtocolError::Truncated {
                got: response.len(),
                need: HEADER_LEN,
            });
        }

        let expected = u16::from_le_bytes([response[0x20], response[0x21]]);
        let actual = checksum(response)
            .wrapping_sub(u16::from(response[0x20]))
            .wrapping_sub(u16::from(response[0x21]));
        if expected != actual {
            return Err(ProtocolError::Checksum { expected, actual });
        }

        let code = i16::from_le_bytes([response[0x22], response[0x23]]);
        if code != 0 {
            return Err(ProtocolError::Device(code));
        }

        decrypt(&self.key, &response[HEADER_LEN..])
    }
}

/// Payload of the authentication request
pub fn auth_payload() -> Vec<u8> {
    let mut payload = vec![0u8; 0x50];
    payload[0x04..0x14].fill(0x31);
    payload[0x1e] = 0x01;
    payload[0x2d] = 0x01;
    payload[0x30..0x36].copy_from_slice(b"Test 1");
    payload
}

/// Extracts `(session id, session key)` from a decrypted auth response
pub fn parse_auth_response(payload: &[u8]) -> Result<(u32, [u8; 16]), ProtocolError> {
    if payload.len() < 0x14 {
        return Err(ProtocolError::Truncated {
            got: payload.len(),
            need: 0x14,
        });
    }
    let id = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
    let mut key = [0u8; 16];
    key.copy_from_slice(&payload[0x04..0x14]);
    Ok((id, key))
}

/// Blocking UDP connection to one device
#[derive(Debug)]
pub struct Connection {
    socket: UdpSocket,
    host: SocketAddr,
    timeout: Duration,
    session: Session,
}

impl Connection {
    pub fn open(
        host: SocketAddr,
        devtype: u16,
        mac: [u8; 6],
        timeout: Duration,
    ) -> Result<Self, ProtocolError> {
        let socket = UdpSocket::bind(("0.0.0.0", 0))?;
        Ok(Self {
            socket,
            host,
            timeout,
            session: Session::new(devtype, mac, rand::random()),
        })
    }

    /// Runs the key exchange and switches the session to the device's key
    pub fn authenticate(&mut self) -> Result<(), ProtocolError> {
        self.session.id = 0;
        self.session.key = BOOTSTRAP_KEY;
        let payload = self.send(CMD_AUTH, &auth_payload())?;
        let (id, key) = parse_auth_response(&payload)?;
        self.session.id = id;
        self.session.key = key;
        debug!("Authenticated {} with session {:#010x}", self.host, id);
        Ok(())
    }

    /// Sends one command and returns the decrypted response payload
    pub fn send(&mut self, command: u16, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        let packet = self.session.encode(command, payload);

        for attempt in 1..=SEND_ATTEMPTS {
            self.socket.send_to(&packet, self.host)?;
            if let Some(response) = self.receive()? {
                return self.session.decode(&response);
            }
            debug!("No answer from {} (attempt {})", self.host, attempt);
        }
        Err(ProtocolError::Timeout(SEND_ATTEMPTS))
    }

    /// Waits up to the timeout for the answer to the packet last sent.
    ///
    /// Datagrams from other hosts and late answers carrying an older counter are
    /// dropped without restarting the wait.
    fn receive(&self) -> Result<Option<Vec<u8>>, ProtocolError> {
        let deadline = Instant::now() + self.timeout;
        let mut buffer = [0u8; 2048];

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            self.socket.set_read_timeout(Some(remaining))?;

            let (len, from) = match self.socket.recv_from(&mut buffer) {
                Ok(received) => received,
                Err(e)
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                    ) =>
                {
                    return Ok(None)
                }
                Err(e) => return Err(e.into()),
            };

            if from != self.host {
                warn!("Ignoring datagram from {}", from);
                continue;
            }
            if len >= 0x2a {
                let count = u16::from_le_bytes([buffer[0x28], buffer[0x29]]);
                if count != self.session.count {
                    warn!(
                        "Dropping stale answer from {} (counter {:#06x}, expected {:#06x})",
                        self.host, count, self.session.count
                    );
                    continue;
                }
            }
            return Ok(Some(buffer[..len].to_vec()));
        }
    }
}
