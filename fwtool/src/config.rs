//! Host configuration.
//!
//! Configuration is read from a TOML file and can be overridden field by
//! field on the command line.
//!
//! # Configuration File Format
//!
//! ```toml
//! link = "serial"            # or "tcp"
//! packet_size = 1024
//! slave_id = 1               # serial mode only; tcp derives it from the IP
//!
//! [serial]
//! port = "/dev/ttyUSB0"
//! baud = 115200
//! data_bits = 8              # 5/6/7/8
//! stop_bits = "1"            # "1" | "1.5" | "2"
//! parity = "none"            # none/even/odd/mark/space
//!
//! [tcp]
//! host = "192.168.1.42"
//! port = 5000
//!
//! [images]
//! fpga = "top.rbf"           # listing a file enables the device
//! dsp1 = "dsp1.bin"
//! dsp2 = "dsp2.bin"
//! arm  = "app.bin"
//! ```

use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use boot_protocol::message::DeviceKind;
use serde::Deserialize;

/// Default slave id when nothing else is configured or derivable.
pub const DEFAULT_SLAVE_ID: u8 = 1;

/// Which link the upgrade runs over.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkKind {
    #[default]
    Serial,
    Tcp,
}

/// Serial line parameters. Flow control is always off.
#[derive(Debug, Clone, Deserialize)]
pub struct SerialConfig {
    pub port: String,
    #[serde(default = "default_baud")]
    pub baud: u32,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default)]
    pub stop_bits: StopBits,
    #[serde(default)]
    pub parity: Parity,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud: default_baud(),
            data_bits: default_data_bits(),
            stop_bits: StopBits::default(),
            parity: Parity::default(),
        }
    }
}

fn default_baud() -> u32 {
    115_200
}

fn default_data_bits() -> u8 {
    8
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum StopBits {
    #[default]
    #[serde(rename = "1")]
    One,
    #[serde(rename = "1.5")]
    OneAndHalf,
    #[serde(rename = "2")]
    Two,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
    Mark,
    Space,
}

/// TCP client parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct TcpConfig {
    pub host: String,
    pub port: u16,
}

/// Firmware file per device; listing a file enables the device.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageConfig {
    pub fpga: Option<PathBuf>,
    pub dsp1: Option<PathBuf>,
    pub dsp2: Option<PathBuf>,
    pub arm: Option<PathBuf>,
}

/// Root configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct UpgradeConfig {
    #[serde(default)]
    pub link: LinkKind,
    #[serde(default = "default_packet_size")]
    pub packet_size: usize,
    pub slave_id: Option<u8>,
    pub serial: Option<SerialConfig>,
    pub tcp: Option<TcpConfig>,
    #[serde(default)]
    pub images: ImageConfig,
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        Self {
            link: LinkKind::default(),
            packet_size: default_packet_size(),
            slave_id: None,
            serial: None,
            tcp: None,
            images: ImageConfig::default(),
        }
    }
}

fn default_packet_size() -> usize {
    1024
}

impl UpgradeConfig {
    /// Parses the TOML configuration file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("无法读取配置文件 {}", path.display()))?;
        let config: Self = toml::from_str(&text)
            .with_context(|| format!("配置文件格式错误 {}", path.display()))?;
        Ok(config)
    }

    /// The bus address of the target.
    ///
    /// Serial mode uses the configured integer. TCP mode derives the id from
    /// the last octet of the IPv4 host address. Either way the fallback is
    /// [`DEFAULT_SLAVE_ID`].
    pub fn slave_id(&self) -> u8 {
        match self.link {
            LinkKind::Serial => self.slave_id.unwrap_or(DEFAULT_SLAVE_ID),
            LinkKind::Tcp => self
                .tcp
                .as_ref()
                .and_then(|tcp| tcp.host.parse::<Ipv4Addr>().ok())
                .map(|ip| ip.octets()[3])
                .unwrap_or(DEFAULT_SLAVE_ID),
        }
    }

    /// The four devices in upgrade order with their enabled image paths.
    pub fn image_specs(&self) -> Vec<(DeviceKind, Option<PathBuf>)> {
        vec![
            (DeviceKind::Fpga, self.images.fpga.clone()),
            (DeviceKind::Dsp1, self.images.dsp1.clone()),
            (DeviceKind::Dsp2, self.images.dsp2.clone()),
            (DeviceKind::Arm, self.images.arm.clone()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_full_config() {
        let text = r#"
            link = "serial"
            packet_size = 512
            slave_id = 3

            [serial]
            port = "/dev/ttyUSB1"
            baud = 230400
            data_bits = 7
            stop_bits = "2"
            parity = "even"

            [images]
            fpga = "top.rbf"
            arm = "app.bin"
        "#;
        let config: UpgradeConfig = toml::from_str(text).unwrap();

        assert_eq!(config.link, LinkKind::Serial);
        assert_eq!(config.packet_size, 512);
        assert_eq!(config.slave_id(), 3);

        let serial = config.serial.as_ref().unwrap();
        assert_eq!(serial.port, "/dev/ttyUSB1");
        assert_eq!(serial.baud, 230_400);
        assert_eq!(serial.data_bits, 7);
        assert_eq!(serial.stop_bits, StopBits::Two);
        assert_eq!(serial.parity, Parity::Even);

        let specs = config.image_specs();
        assert_eq!(specs[0].0, DeviceKind::Fpga);
        assert!(specs[0].1.is_some());
        assert!(specs[1].1.is_none());
        assert!(specs[2].1.is_none());
        assert!(specs[3].1.is_some());
    }

    #[test]
    fn serial_defaults() {
        let config: UpgradeConfig = toml::from_str(
            r#"
            [serial]
            port = "COM3"
            "#,
        )
        .unwrap();
        let serial = config.serial.unwrap();
        assert_eq!(serial.baud, 115_200);
        assert_eq!(serial.data_bits, 8);
        assert_eq!(serial.stop_bits, StopBits::One);
        assert_eq!(serial.parity, Parity::None);
        assert_eq!(config.packet_size, 1024);
    }

    #[test]
    fn tcp_slave_id_is_the_last_ipv4_octet() {
        let config: UpgradeConfig = toml::from_str(
            r#"
            link = "tcp"

            [tcp]
            host = "192.168.1.42"
            port = 5000
            "#,
        )
        .unwrap();
        assert_eq!(config.slave_id(), 42);
    }

    #[test]
    fn unparseable_tcp_host_falls_back_to_default_id() {
        let config: UpgradeConfig = toml::from_str(
            r#"
            link = "tcp"

            [tcp]
            host = "target.local"
            port = 5000
            "#,
        )
        .unwrap();
        assert_eq!(config.slave_id(), DEFAULT_SLAVE_ID);
    }

    #[test]
    fn serial_slave_id_defaults_to_one() {
        let config: UpgradeConfig = toml::from_str(r#"link = "serial""#).unwrap();
        assert_eq!(config.slave_id(), DEFAULT_SLAVE_ID);
    }

    #[test]
    fn default_config_matches_file_defaults() {
        let config = UpgradeConfig::default();
        assert_eq!(config.link, LinkKind::Serial);
        assert_eq!(config.packet_size, 1024);
        assert!(config.slave_id.is_none());
    }

    #[test]
    fn stop_bits_one_and_half_parses() {
        let config: UpgradeConfig = toml::from_str(
            r#"
            [serial]
            port = "COM1"
            stop_bits = "1.5"
            "#,
        )
        .unwrap();
        assert_eq!(config.serial.unwrap().stop_bits, StopBits::OneAndHalf);
    }
}
