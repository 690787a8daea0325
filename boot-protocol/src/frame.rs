//! Frame construction, extraction and decoding.
//!
//! Every frame, in both directions, has the same shape:
//!
//! ```text
//! offset  size  field
//! 0       2     header: {0xAA,0x55} master→slave, {0x55,0xAA} slave→master
//! 2       1     slave id
//! 3       2     length, big-endian, value = 8 + payload size
//! 5       1     message type
//! 6       1     response flag (the host always sends 0xFE)
//! 7       N     payload
//! 7+N     2     CRC16-MODBUS over bytes [2 .. 7+N), big-endian
//! ```
//!
//! The length field counts 8 + payload bytes, one short of the full frame;
//! extraction therefore takes `length + 1` bytes from the first header byte.
//! All multi-byte fields are big-endian.

use thiserror::Error;

use crate::crc::crc16;
use crate::message::{MessageType, ResponseFlag, UpgradeFlags};

/// 上位机帧头1
pub const MASTER_HEADER1: u8 = 0xAA;
/// 上位机帧头2
pub const MASTER_HEADER2: u8 = 0x55;
/// 下位机帧头1
pub const SLAVE_HEADER1: u8 = 0x55;
/// 下位机帧头2
pub const SLAVE_HEADER2: u8 = 0xAA;

/// Shortest decodable frame: header, id, length, type, flag, one payload
/// byte and the CRC. Every protocol message carries at least one payload
/// byte.
pub const MIN_FRAME_LEN: usize = 10;

/// Fixed framing overhead added to the payload by the length field.
const LENGTH_BASE: usize = 8;

/// Errors returned by [`parse_frame`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The byte slice is shorter than the smallest valid frame.
    #[error("frame too short: {actual} bytes")]
    TooShort { actual: usize },
    /// The trailing CRC does not match the frame contents.
    #[error("crc mismatch: computed 0x{computed:04x}, received 0x{received:04x}")]
    CrcMismatch { computed: u16, received: u16 },
}

/// A decoded frame.
///
/// The type and flag bytes are kept raw so that frames carrying values this
/// host does not know about still reach the session layer (where they act as
/// keep-alives); [`Frame::message_type`] and [`Frame::response_flag`] give the
/// catalog views.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub slave_id: u8,
    pub msg_type: u8,
    pub flag: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Catalog view of the message type byte, if known.
    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::try_from(self.msg_type).ok()
    }

    /// Catalog view of the response flag byte.
    pub fn response_flag(&self) -> ResponseFlag {
        ResponseFlag::from(self.flag)
    }
}

fn build(header: [u8; 2], slave_id: u8, msg_type: u8, flag: u8, payload: &[u8]) -> Vec<u8> {
    let length = (LENGTH_BASE + payload.len()) as u16;

    let mut frame = Vec::with_capacity(payload.len() + MIN_FRAME_LEN);
    frame.extend_from_slice(&header);
    frame.push(slave_id);
    frame.extend_from_slice(&length.to_be_bytes());
    frame.push(msg_type);
    frame.push(flag);
    frame.extend_from_slice(payload);

    // CRC covers everything from the slave id through the payload
    let crc = crc16(&frame[2..]);
    frame.extend_from_slice(&crc.to_be_bytes());

    frame
}

fn build_master(slave_id: u8, msg_type: MessageType, payload: &[u8]) -> Vec<u8> {
    build(
        [MASTER_HEADER1, MASTER_HEADER2],
        slave_id,
        msg_type.into(),
        ResponseFlag::RequestFlag.into(),
        payload,
    )
}

/// Builds the upgrade request announcing which devices will be flashed.
pub fn build_upgrade_request(slave_id: u8, flags: UpgradeFlags) -> Vec<u8> {
    build_master(slave_id, MessageType::UpgradeRequest, &[flags.to_byte()])
}

/// Builds the system reset command.
pub fn build_system_reset(slave_id: u8) -> Vec<u8> {
    build_master(slave_id, MessageType::SystemReset, &[0x00])
}

/// Builds a per-device upgrade command.
///
/// `msg_type` must be one of the `*Command` types; the payload is the file
/// size (u32), packet count (u16) and file CRC16 (u16), all big-endian.
pub fn build_upgrade_command(
    slave_id: u8,
    msg_type: MessageType,
    file_size: u32,
    packet_count: u16,
    file_crc: u16,
) -> Vec<u8> {
    let mut payload = Vec::with_capacity(8);
    payload.extend_from_slice(&file_size.to_be_bytes());
    payload.extend_from_slice(&packet_count.to_be_bytes());
    payload.extend_from_slice(&file_crc.to_be_bytes());
    build_master(slave_id, msg_type, &payload)
}

/// Builds a per-device data packet.
///
/// `packet_num` is 1-based; `chunk` is the slice of the firmware file carried
/// by this packet.
pub fn build_upgrade_data(
    slave_id: u8,
    msg_type: MessageType,
    packet_num: u16,
    chunk: &[u8],
) -> Vec<u8> {
    let mut payload = Vec::with_capacity(2 + chunk.len());
    payload.extend_from_slice(&packet_num.to_be_bytes());
    payload.extend_from_slice(chunk);
    build_master(slave_id, msg_type, &payload)
}

/// Builds a per-device upgrade end frame.
pub fn build_upgrade_end(slave_id: u8, msg_type: MessageType) -> Vec<u8> {
    build_master(slave_id, msg_type, &[0x00])
}

/// Builds the total end frame closing the whole upgrade.
pub fn build_total_end(slave_id: u8) -> Vec<u8> {
    build_master(slave_id, MessageType::TotalEnd, &[0x00])
}

/// Builds a device-originated response frame.
///
/// The host never sends these; they exist for device simulators and tests.
pub fn build_response(
    slave_id: u8,
    msg_type: MessageType,
    flag: ResponseFlag,
    payload: &[u8],
) -> Vec<u8> {
    build(
        [SLAVE_HEADER1, SLAVE_HEADER2],
        slave_id,
        msg_type.into(),
        flag.into(),
        payload,
    )
}

/// Reassembles frames out of an arbitrary byte stream.
///
/// The framer owns a rolling buffer; [`Framer::feed`] appends the incoming
/// bytes and extracts every complete frame, tolerating leading garbage and
/// fragmented arrivals. Frames come out in arrival order.
#[derive(Debug, Default)]
pub struct Framer {
    buffer: Vec<u8>,
}

impl Framer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `data` to the receive buffer and returns every complete frame
    /// now available.
    pub fn feed(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();

        while self.buffer.len() >= 5 {
            // 查找帧头（两种方向均可）
            let header = self.buffer.windows(2).position(|w| {
                matches!(
                    w,
                    [MASTER_HEADER1, MASTER_HEADER2] | [SLAVE_HEADER1, SLAVE_HEADER2]
                )
            });

            let Some(pos) = header else {
                // 没有任何帧头，剩余数据无法恢复
                debug!("no frame header in {} buffered bytes, discarding", self.buffer.len());
                self.buffer.clear();
                break;
            };

            if pos > 0 {
                debug!("discarding {pos} bytes before frame header");
                self.buffer.drain(..pos);
            }

            if self.buffer.len() < 5 {
                break;
            }

            let length = u16::from_be_bytes([self.buffer[3], self.buffer[4]]) as usize;
            // the length field is one short of the full on-wire frame
            let total = length + 1;

            if self.buffer.len() < total {
                break;
            }

            let frame: Vec<u8> = self.buffer.drain(..total).collect();
            frames.push(frame);
        }

        frames
    }
}

/// Validates and decodes a single complete frame.
///
/// The CRC is recomputed over the slave id through the payload and compared
/// against the trailing big-endian word; mismatching frames are reported as
/// [`FrameError::CrcMismatch`] and are expected to be dropped silently by the
/// caller.
pub fn parse_frame(frame: &[u8]) -> Result<Frame, FrameError> {
    if frame.len() < MIN_FRAME_LEN {
        return Err(FrameError::TooShort {
            actual: frame.len(),
        });
    }

    let crc_start = frame.len() - 2;
    let computed = crc16(&frame[2..crc_start]);
    let received = u16::from_be_bytes([frame[crc_start], frame[crc_start + 1]]);
    if computed != received {
        return Err(FrameError::CrcMismatch { computed, received });
    }

    Ok(Frame {
        slave_id: frame[2],
        msg_type: frame[5],
        flag: frame[6],
        payload: frame[7..crc_start].to_vec(),
    })
}
