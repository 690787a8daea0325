//! The event loop wiring transport, framer and session together.
//!
//! One thread drives everything: transport events arrive over an mpsc
//! channel, the receive timeout is computed from the session's watchdog
//! deadline, and the session reacts to exactly three stimuli — an inbound
//! frame, a timer expiry, or a cancellation. Nothing in the session blocks.

use std::io;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use anyhow::Result;
use boot_protocol::firmware::FirmwareSet;
use boot_protocol::frame::{Framer, parse_frame};
use boot_protocol::session::{FrameSink, Observer, UpgradeSession};
use indicatif::{ProgressBar, ProgressStyle};

use crate::transport::{Transport, TransportEvent};

/// Receive timeout while the session watchdog is not armed.
const IDLE_POLL: Duration = Duration::from_millis(200);

/// How many leading bytes of a frame the debug log shows.
const LOG_PREVIEW_LEN: usize = 20;

/// Renders at most [`LOG_PREVIEW_LEN`] bytes as spaced hex.
pub fn hex_preview(data: &[u8]) -> String {
    let shown = &data[..data.len().min(LOG_PREVIEW_LEN)];
    let mut out = shown
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ");
    if data.len() > LOG_PREVIEW_LEN {
        out.push_str(" ...");
    }
    out
}

/// Adapts a [`Transport`] writer into the session's outbound capability,
/// logging every frame on the way out. The link is closed when the sink is
/// dropped, so every way out of [`run_upgrade`] tears the transport down.
struct TransportSink {
    inner: Box<dyn Transport>,
}

impl Drop for TransportSink {
    fn drop(&mut self) {
        self.inner.close();
    }
}

impl FrameSink for TransportSink {
    fn send(&mut self, frame: &[u8], description: &str) -> io::Result<()> {
        debug!(
            "TX | ID={:02} | {:<16} | {}",
            frame.get(2).copied().unwrap_or(0),
            description,
            hex_preview(frame)
        );
        self.inner.send(frame)?;
        Ok(())
    }
}

/// Console observer: info lines above an overall progress bar, and the
/// terminal outcome captured for the caller.
pub struct CliObserver {
    bar: ProgressBar,
    result: Option<(bool, String)>,
}

impl CliObserver {
    fn new() -> Self {
        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::with_template("{bar:40.cyan/blue} {pos:>3}% {msg}").unwrap(),
        );
        Self { bar, result: None }
    }

    /// The captured `finished` outcome, if the session reached one.
    pub fn result(&self) -> Option<&(bool, String)> {
        self.result.as_ref()
    }
}

impl Observer for CliObserver {
    fn info(&mut self, message: &str) {
        self.bar.println(message);
    }

    fn progress(&mut self, device_percent: u32, total_percent: u32) {
        self.bar.set_position(total_percent as u64);
        self.bar.set_message(format!("设备 {device_percent}%"));
    }

    fn finished(&mut self, success: bool, message: &str) {
        if success {
            self.bar.set_position(100);
        }
        self.bar.finish_and_clear();
        self.result = Some((success, message.to_string()));
    }
}

/// Runs one upgrade session to completion over an open transport.
///
/// Returns `Ok(())` only when the target reported overall success; every
/// other outcome (device rejection, timeout, link loss, cancellation) is an
/// error carrying the operator-facing message.
pub fn run_upgrade(
    transport: Box<dyn Transport>,
    events: Receiver<TransportEvent>,
    slave_id: u8,
    firmware: FirmwareSet,
) -> Result<()> {
    let sink = TransportSink { inner: transport };
    let mut session = UpgradeSession::new(slave_id, firmware, sink, CliObserver::new());
    let mut framer = Framer::new();

    if !session.start() {
        bail!("升级启动失败");
    }

    while session.is_active() {
        let timeout = session
            .deadline()
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
            .unwrap_or(IDLE_POLL);

        match events.recv_timeout(timeout) {
            Ok(TransportEvent::Bytes(data)) => {
                for raw in framer.feed(&data) {
                    match parse_frame(&raw) {
                        Ok(frame) => {
                            debug!(
                                "RX | ID={:02} | {:<16} | {}",
                                frame.slave_id,
                                frame.response_flag().description(),
                                hex_preview(&raw)
                            );
                            session.handle_frame(&frame);
                        }
                        Err(e) => {
                            // corrupt frames are dropped; the watchdog covers the gap
                            debug!("RX | dropped frame: {e}");
                        }
                    }
                }
            }
            Ok(TransportEvent::Connected) => {
                debug!("link established");
            }
            Ok(TransportEvent::Disconnected(reason)) => {
                // a dropped link is a failure, not a cancellation
                session.transport_lost(&reason);
            }
            Err(RecvTimeoutError::Timeout) => {
                if let Some(deadline) = session.deadline()
                    && Instant::now() >= deadline
                {
                    session.handle_timeout();
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                session.transport_lost("通信线程已退出");
            }
        }
    }

    match session.observer().result() {
        Some((true, _)) => Ok(()),
        Some((false, message)) => bail!("{message}"),
        None => bail!("升级已取消"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_preview_formats_and_truncates() {
        assert_eq!(hex_preview(&[0xAA, 0x55, 0x01]), "AA 55 01");

        let long = vec![0xFF; 24];
        let preview = hex_preview(&long);
        assert!(preview.ends_with(" ..."));
        assert_eq!(preview.matches("FF").count(), 20);
    }

    #[test]
    fn hex_preview_of_empty_input() {
        assert_eq!(hex_preview(&[]), "");
    }
}
