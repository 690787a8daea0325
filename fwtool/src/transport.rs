//! Serial and TCP transport adapters.
//!
//! Both links share one shape: the writer half implements [`Transport`]
//! (synchronous `send` with an eager flush), and a spawned reader thread
//! pushes [`TransportEvent`]s into an mpsc channel that the runner drains.
//! The upgrade session never learns which link it is talking over.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::mpsc::Sender;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::config::{Parity, SerialConfig, StopBits, TcpConfig};

/// Poll interval for the blocking reads on the reader thread.
const READ_TIMEOUT: Duration = Duration::from_millis(20);

/// TCP connect timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Inbound half of a link, delivered over the runner's channel.
#[derive(Debug)]
pub enum TransportEvent {
    Connected,
    Bytes(Vec<u8>),
    Disconnected(String),
}

/// Outbound half of a link.
pub trait Transport: Send {
    /// Writes the whole buffer and flushes, returning the byte count.
    fn send(&mut self, bytes: &[u8]) -> io::Result<usize>;

    /// Tears the link down; the reader thread notices and exits.
    fn close(&mut self);
}

struct SerialTransport {
    port: Box<dyn serialport::SerialPort>,
}

impl Transport for SerialTransport {
    fn send(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.port.write_all(bytes)?;
        self.port.flush()?;
        Ok(bytes.len())
    }

    fn close(&mut self) {
        // dropping the handle closes the port; nothing to do eagerly
    }
}

/// Opens the serial port described by `config` and starts its reader thread.
pub fn open_serial(
    config: &SerialConfig,
    events: Sender<TransportEvent>,
) -> Result<Box<dyn Transport>> {
    let data_bits = match config.data_bits {
        5 => serialport::DataBits::Five,
        6 => serialport::DataBits::Six,
        7 => serialport::DataBits::Seven,
        8 => serialport::DataBits::Eight,
        other => bail!("无效的数据位: {other}"),
    };

    let stop_bits = match config.stop_bits {
        StopBits::One => serialport::StopBits::One,
        StopBits::Two => serialport::StopBits::Two,
        StopBits::OneAndHalf => {
            // the serialport crate has no 1.5 stop bit mode
            warn!("串口驱动不支持 1.5 停止位，改用 2 停止位");
            serialport::StopBits::Two
        }
    };

    let parity = match config.parity {
        Parity::None => serialport::Parity::None,
        Parity::Even => serialport::Parity::Even,
        Parity::Odd => serialport::Parity::Odd,
        Parity::Mark | Parity::Space => {
            bail!("串口驱动不支持 Mark/Space 校验位")
        }
    };

    let port = serialport::new(&config.port, config.baud)
        .data_bits(data_bits)
        .stop_bits(stop_bits)
        .parity(parity)
        .flow_control(serialport::FlowControl::None)
        .timeout(READ_TIMEOUT)
        .open()
        .with_context(|| format!("无法打开串口 {}", config.port))?;

    let reader = port
        .try_clone()
        .with_context(|| format!("无法复制串口句柄 {}", config.port))?;
    spawn_reader(reader, events.clone());

    let _ = events.send(TransportEvent::Connected);
    info!("串口已连接: {} @ {}", config.port, config.baud);

    Ok(Box::new(SerialTransport { port }))
}

struct TcpTransport {
    stream: TcpStream,
}

impl Transport for TcpTransport {
    fn send(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.stream.write_all(bytes)?;
        self.stream.flush()?;
        Ok(bytes.len())
    }

    fn close(&mut self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

/// Connects to the target over TCP and starts its reader thread.
pub fn open_tcp(config: &TcpConfig, events: Sender<TransportEvent>) -> Result<Box<dyn Transport>> {
    let addr = (config.host.as_str(), config.port)
        .to_socket_addrs()
        .with_context(|| format!("无法解析地址 {}:{}", config.host, config.port))?
        .next()
        .ok_or_else(|| anyhow!("无法解析地址 {}:{}", config.host, config.port))?;

    let stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)
        .with_context(|| format!("无法连接 {}:{}", config.host, config.port))?;
    stream.set_nodelay(true)?;
    stream.set_read_timeout(Some(READ_TIMEOUT))?;

    let reader = stream.try_clone().context("无法复制TCP连接句柄")?;
    spawn_reader(reader, events.clone());

    let _ = events.send(TransportEvent::Connected);
    info!("网口已连接: {}:{}", config.host, config.port);

    Ok(Box::new(TcpTransport { stream }))
}

fn spawn_reader(mut reader: impl Read + Send + 'static, events: Sender<TransportEvent>) {
    thread::spawn(move || {
        let mut buffer = [0u8; 4096];
        loop {
            match reader.read(&mut buffer) {
                Ok(0) => {
                    let _ = events.send(TransportEvent::Disconnected("连接已关闭".to_string()));
                    break;
                }
                Ok(n) => {
                    if events.send(TransportEvent::Bytes(buffer[..n].to_vec())).is_err() {
                        // the runner is gone
                        break;
                    }
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::TimedOut
                            | io::ErrorKind::WouldBlock
                            | io::ErrorKind::Interrupted
                    ) =>
                {
                    // a read timeout is just the poll interval elapsing
                    continue;
                }
                Err(e) => {
                    let _ = events.send(TransportEvent::Disconnected(e.to_string()));
                    break;
                }
            }
        }
    });
}
