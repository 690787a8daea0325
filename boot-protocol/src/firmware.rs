//! Firmware image loading and chunking.
//!
//! Each enabled device contributes one image file, read fully into memory,
//! chunked by the configured packet size and summarized with a CRC16 that the
//! target verifies after the transfer.

use std::fs;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::crc::crc16;
use crate::message::{DeviceKind, UpgradeFlags};

/// Largest allowed packet size in bytes.
pub const MAX_PACKET_SIZE: usize = 4096;

/// Errors raised while preparing firmware images.
#[derive(Debug, Error)]
pub enum FirmwareError {
    #[error("数据包大小无效: {0}")]
    InvalidPacketSize(usize),
    #[error("无法读取 {device} 固件文件: {source}")]
    Io {
        device: &'static str,
        source: io::Error,
    },
    #[error("{device} 固件文件为空")]
    EmptyFile { device: &'static str },
    #[error("{device} 固件需要的数据包数量超出协议限制")]
    TooManyPackets { device: &'static str },
    #[error("未选择任何固件文件")]
    NoImages,
}

/// One device's firmware image, chunked for transfer.
#[derive(Debug, Clone)]
pub struct FirmwareImage {
    pub kind: DeviceKind,
    data: Vec<u8>,
    pub packet_size: u16,
    pub packet_count: u16,
    pub file_crc: u16,
    /// Number of packets acknowledged so far (0..=packet_count).
    pub current_packet: u16,
}

impl FirmwareImage {
    /// Wraps raw firmware bytes, validating the packet arithmetic.
    pub fn from_bytes(
        kind: DeviceKind,
        data: Vec<u8>,
        packet_size: usize,
    ) -> Result<Self, FirmwareError> {
        if packet_size == 0 || packet_size > MAX_PACKET_SIZE {
            return Err(FirmwareError::InvalidPacketSize(packet_size));
        }
        if data.is_empty() {
            return Err(FirmwareError::EmptyFile {
                device: kind.name(),
            });
        }

        let packet_count = data.len().div_ceil(packet_size);
        if packet_count == 0 || packet_count > u16::MAX as usize {
            return Err(FirmwareError::TooManyPackets {
                device: kind.name(),
            });
        }

        let file_crc = crc16(&data);

        Ok(Self {
            kind,
            data,
            packet_size: packet_size as u16,
            packet_count: packet_count as u16,
            file_crc,
            current_packet: 0,
        })
    }

    /// Size of the firmware file in bytes.
    pub fn file_size(&self) -> u32 {
        self.data.len() as u32
    }

    /// Returns the 0-based chunk at `index`; the last chunk may be short.
    pub fn chunk(&self, index: u16) -> Option<&[u8]> {
        let offset = index as usize * self.packet_size as usize;
        if index >= self.packet_count || offset >= self.data.len() {
            return None;
        }
        let end = (offset + self.packet_size as usize).min(self.data.len());
        Some(&self.data[offset..end])
    }
}

/// The ordered set of firmware images for one upgrade session.
///
/// Images always appear in the fixed device order FPGA → DSP1 → DSP2 → ARM,
/// restricted to the enabled devices.
#[derive(Debug)]
pub struct FirmwareSet {
    pub images: Vec<FirmwareImage>,
}

impl FirmwareSet {
    /// Reads every enabled image file and validates it.
    ///
    /// `specs` lists the four devices in order; a `None` path disables the
    /// device. Refuses to produce an empty set.
    pub fn load(
        packet_size: usize,
        specs: &[(DeviceKind, Option<PathBuf>)],
    ) -> Result<Self, FirmwareError> {
        if packet_size == 0 || packet_size > MAX_PACKET_SIZE {
            return Err(FirmwareError::InvalidPacketSize(packet_size));
        }

        let mut images = Vec::new();
        for (kind, path) in specs {
            let Some(path) = path else {
                continue;
            };
            let data = fs::read(path).map_err(|source| FirmwareError::Io {
                device: kind.name(),
                source,
            })?;
            let image = FirmwareImage::from_bytes(*kind, data, packet_size)?;
            info!(
                "加载 {} 固件: {} 字节, {} 包, CRC16=0x{:04x}",
                image.kind.name(),
                image.file_size(),
                image.packet_count,
                image.file_crc
            );
            images.push(image);
        }

        Self::from_images(images)
    }

    /// Wraps already-loaded images, rejecting an empty set.
    pub fn from_images(images: Vec<FirmwareImage>) -> Result<Self, FirmwareError> {
        if images.is_empty() {
            return Err(FirmwareError::NoImages);
        }
        Ok(Self { images })
    }

    /// Sum of the packet counts across all images.
    pub fn total_packets(&self) -> u32 {
        self.images.iter().map(|i| i.packet_count as u32).sum()
    }

    /// The request bitfield for the enabled devices.
    pub fn upgrade_flags(&self) -> UpgradeFlags {
        let mut flags = UpgradeFlags::default();
        for image in &self.images {
            flags.set(image.kind);
        }
        flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunking_covers_the_whole_file() {
        let data: Vec<u8> = (0..=250).collect();
        let image = FirmwareImage::from_bytes(DeviceKind::Fpga, data.clone(), 100).unwrap();

        assert_eq!(image.packet_count, 3);
        assert_eq!(image.chunk(0).unwrap().len(), 100);
        assert_eq!(image.chunk(1).unwrap().len(), 100);
        assert_eq!(image.chunk(2).unwrap().len(), 51);
        assert!(image.chunk(3).is_none());

        let mut reassembled = Vec::new();
        for i in 0..image.packet_count {
            reassembled.extend_from_slice(image.chunk(i).unwrap());
        }
        assert_eq!(reassembled, data);
    }

    #[test]
    fn exact_multiple_has_no_short_chunk() {
        let image = FirmwareImage::from_bytes(DeviceKind::Arm, vec![0xAB; 512], 128).unwrap();
        assert_eq!(image.packet_count, 4);
        assert_eq!(image.chunk(3).unwrap().len(), 128);
        assert!(image.chunk(4).is_none());
    }

    #[test]
    fn single_byte_file_is_one_packet() {
        let image = FirmwareImage::from_bytes(DeviceKind::Dsp1, vec![0x42], 4096).unwrap();
        assert_eq!(image.packet_count, 1);
        assert_eq!(image.chunk(0).unwrap(), &[0x42]);
    }

    #[test]
    fn empty_file_is_rejected() {
        let err = FirmwareImage::from_bytes(DeviceKind::Fpga, vec![], 1024).unwrap_err();
        assert!(matches!(err, FirmwareError::EmptyFile { device: "FPGA" }));
    }

    #[test]
    fn packet_size_bounds() {
        assert!(matches!(
            FirmwareImage::from_bytes(DeviceKind::Fpga, vec![1], 0).unwrap_err(),
            FirmwareError::InvalidPacketSize(0)
        ));
        assert!(matches!(
            FirmwareImage::from_bytes(DeviceKind::Fpga, vec![1], 4097).unwrap_err(),
            FirmwareError::InvalidPacketSize(4097)
        ));
        assert!(FirmwareImage::from_bytes(DeviceKind::Fpga, vec![1], 4096).is_ok());
    }

    #[test]
    fn oversized_packet_count_is_rejected() {
        // 65536 one-byte packets exceed the u16 packet counter
        let err = FirmwareImage::from_bytes(DeviceKind::Dsp2, vec![0; 65536], 1).unwrap_err();
        assert!(matches!(err, FirmwareError::TooManyPackets { device: "DSP2" }));
        assert!(FirmwareImage::from_bytes(DeviceKind::Dsp2, vec![0; 65535], 1).is_ok());
    }

    #[test]
    fn file_crc_matches_crc16_of_contents() {
        let data = vec![0xDE, 0xAD, 0xBE];
        let image = FirmwareImage::from_bytes(DeviceKind::Fpga, data.clone(), 2).unwrap();
        assert_eq!(image.file_crc, crc16(&data));
    }

    #[test]
    fn empty_set_is_rejected() {
        assert!(matches!(
            FirmwareSet::from_images(vec![]).unwrap_err(),
            FirmwareError::NoImages
        ));
    }

    #[test]
    fn set_totals_and_flags() {
        let fpga = FirmwareImage::from_bytes(DeviceKind::Fpga, vec![1; 10], 4).unwrap();
        let arm = FirmwareImage::from_bytes(DeviceKind::Arm, vec![2; 4], 4).unwrap();
        let set = FirmwareSet::from_images(vec![fpga, arm]).unwrap();

        assert_eq!(set.total_packets(), 4);
        assert_eq!(set.upgrade_flags().to_byte(), 0x09);
    }
}
