//! The upgrade session state machine.
//!
//! A session drives one complete upgrade: announce the enabled devices, reset
//! the target, then for each device in the fixed order FPGA → DSP1 → DSP2 →
//! ARM run the command/data/end handshake, and finally exchange the total-end
//! frame. Every outbound frame expects a reply; a shared 10 second watchdog
//! re-sends the frame for the current state up to three times before the
//! session terminates.
//!
//! The session is a pure reactor. It never blocks and owns no threads or
//! timers; the host loop feeds it decoded frames via
//! [`UpgradeSession::handle_frame`], fires [`UpgradeSession::handle_timeout`]
//! once [`UpgradeSession::deadline`] elapses, and may cancel with
//! [`UpgradeSession::stop`]. Outbound frames leave through the [`FrameSink`]
//! capability and all operator-facing reporting goes through [`Observer`].

use std::io;
use std::time::{Duration, Instant};

use crate::firmware::{FirmwareImage, FirmwareSet};
use crate::frame::{self, Frame};
use crate::message::{MessageType, ResponseFlag, UpgradeFlags};

/// Watchdog interval for every frame that expects a reply.
pub const TIMEOUT_INTERVAL: Duration = Duration::from_millis(10_000);

/// Consecutive resends of one frame before the session gives up.
pub const MAX_RETRIES: u32 = 3;

/// 升级状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeState {
    Idle,
    WaitUpgradeRequest,
    WaitSystemReset,
    WaitUpgradeCommand,
    WaitUpgradeData,
    WaitUpgradeEnd,
    WaitTotalEnd,
    Success,
    Failed,
}

/// Outbound capability handed to the session.
///
/// Implementations write the frame to the link and flush eagerly. The
/// description is the operator-facing label of the frame being sent.
pub trait FrameSink {
    fn send(&mut self, frame: &[u8], description: &str) -> io::Result<()>;
}

/// Reporting capability handed to the session.
///
/// `info` and `progress` are informational; `finished` fires exactly once per
/// session, with the terminal outcome.
pub trait Observer {
    fn info(&mut self, message: &str);
    fn progress(&mut self, device_percent: u32, total_percent: u32);
    fn finished(&mut self, success: bool, message: &str);
}

/// One live upgrade session.
pub struct UpgradeSession<S, O> {
    sink: S,
    observer: O,
    slave_id: u8,
    images: Vec<FirmwareImage>,
    current: Option<usize>,
    state: UpgradeState,
    retry_count: u32,
    total_packets: u32,
    sent_packets: u32,
    deadline: Option<Instant>,
}

impl<S: FrameSink, O: Observer> UpgradeSession<S, O> {
    /// Creates an idle session over the prepared firmware set.
    pub fn new(slave_id: u8, firmware: FirmwareSet, sink: S, observer: O) -> Self {
        let total_packets = firmware.total_packets();
        Self {
            sink,
            observer,
            slave_id,
            images: firmware.images,
            current: None,
            state: UpgradeState::Idle,
            retry_count: 0,
            total_packets,
            sent_packets: 0,
            deadline: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> UpgradeState {
        self.state
    }

    /// Whether a session is in flight.
    pub fn is_active(&self) -> bool {
        !matches!(
            self.state,
            UpgradeState::Idle | UpgradeState::Success | UpgradeState::Failed
        )
    }

    /// Instant at which [`UpgradeSession::handle_timeout`] should fire, when
    /// the watchdog is armed.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Shared view of the observer, e.g. to read a captured result.
    pub fn observer(&self) -> &O {
        &self.observer
    }

    /// Kicks off the upgrade by sending the upgrade request.
    ///
    /// Returns `false` when a session is already in flight.
    pub fn start(&mut self) -> bool {
        if self.state != UpgradeState::Idle {
            self.observer.info(">>> 升级正在进行中...");
            return false;
        }

        self.current = None;
        self.sent_packets = 0;
        self.retry_count = 0;

        self.observer.info("========================================");
        self.observer.info(">>> 开始升级流程");

        self.send_upgrade_request();
        true
    }

    /// Feeds one decoded inbound frame to the state machine.
    ///
    /// Every well-formed frame feeds the watchdog: the timer stops and the
    /// retry counter clears on entry, and the timer re-arms on exit while the
    /// session is still in flight. Frames whose message type does not match
    /// the current expectation (debug frames included) change nothing else.
    pub fn handle_frame(&mut self, frame: &Frame) {
        self.deadline = None;
        self.retry_count = 0;

        debug!(
            "rx frame in {:?}: type=0x{:02x} flag=0x{:02x} payload={}B",
            self.state,
            frame.msg_type,
            frame.flag,
            frame.payload.len()
        );

        if let Some(msg_type) = frame.message_type() {
            self.dispatch(msg_type, frame.response_flag(), &frame.payload);
        }

        self.arm_timer();
    }

    /// Fires the watchdog: re-sends the frame for the current state, or fails
    /// the session after [`MAX_RETRIES`] consecutive timeouts.
    pub fn handle_timeout(&mut self) {
        if !self.is_active() {
            return;
        }

        self.deadline = None;
        self.retry_count += 1;

        if self.retry_count <= MAX_RETRIES {
            self.observer
                .info(&format!(">>> 通信超时，第 {} 次重发...", self.retry_count));

            match self.state {
                UpgradeState::WaitUpgradeRequest => self.send_upgrade_request(),
                UpgradeState::WaitSystemReset => self.send_system_reset(),
                UpgradeState::WaitUpgradeCommand => self.send_upgrade_command(),
                UpgradeState::WaitUpgradeData => self.send_upgrade_data(),
                UpgradeState::WaitUpgradeEnd => self.send_upgrade_end(),
                UpgradeState::WaitTotalEnd => self.send_total_end(),
                _ => {}
            }
        } else {
            self.complete(false, "通信超时，目标无响应，请检查设备状态");
        }
    }

    /// Cancels a session in flight.
    ///
    /// Cancellation is not a failure: no `finished` event is published, the
    /// watchdog stops and the session returns to idle. Calling this while
    /// idle is a no-op.
    pub fn stop(&mut self) {
        if self.state == UpgradeState::Idle {
            return;
        }
        self.observer.info(">>> 升级已取消");
        self.reset_state();
    }

    /// Terminates a session in flight because the transport dropped.
    ///
    /// Unlike [`UpgradeSession::stop`] this is a failure: the observer
    /// receives its single `finished(false, ..)` event carrying `reason`
    /// before the session returns to idle. Calling this while idle is a
    /// no-op.
    pub fn transport_lost(&mut self, reason: &str) {
        if !self.is_active() {
            return;
        }
        self.complete(false, &format!("连接断开：{reason}"));
    }

    fn dispatch(&mut self, msg_type: MessageType, flag: ResponseFlag, payload: &[u8]) {
        match self.state {
            UpgradeState::WaitUpgradeRequest => {
                if msg_type == MessageType::UpgradeRequest {
                    if flag == ResponseFlag::AllowUpgrade && payload.first() == Some(&0x00) {
                        self.observer.info(">>> 设备允许升级");
                        self.send_system_reset();
                    } else {
                        self.complete(false, "设备禁止升级或状态异常");
                    }
                }
            }

            UpgradeState::WaitSystemReset => {
                if msg_type == MessageType::SystemReset {
                    if flag == ResponseFlag::RestartSuccess && payload.first() == Some(&0x00) {
                        self.observer.info(">>> 系统重启成功");
                        // 从第一个已启用设备开始依次升级
                        self.current = Some(0);
                        self.begin_device();
                    } else {
                        self.complete(false, "系统重启失败");
                    }
                }
            }

            UpgradeState::WaitUpgradeCommand => {
                let Some(idx) = self.current else {
                    return;
                };
                if msg_type != self.images[idx].kind.command_type() {
                    return;
                }

                match flag {
                    ResponseFlag::PrepareErase => {
                        // 擦除进行中，保持状态继续等待
                        self.observer.info(">>> 准备擦除Flash...");
                    }
                    ResponseFlag::EraseSuccess if payload.first() == Some(&0x00) => {
                        self.observer.info(">>> 擦除Flash成功，开始传输数据");
                        self.send_upgrade_data();
                    }
                    other => {
                        let reason = other.description();
                        self.complete(false, &format!("擦除Flash失败：{reason}"));
                    }
                }
            }

            UpgradeState::WaitUpgradeData => {
                let Some(idx) = self.current else {
                    return;
                };
                if msg_type != self.images[idx].kind.data_type() {
                    return;
                }

                if flag != ResponseFlag::Success {
                    let reason = failure_reason(flag);
                    self.complete(false, &format!("数据传输失败：{reason}"));
                    return;
                }

                if payload.len() < 5 {
                    self.complete(false, "数据传输失败：应答长度异常");
                    return;
                }

                let status = payload[0];
                let packet_num = u16::from_be_bytes([payload[1], payload[2]]);
                let received_count = u16::from_be_bytes([payload[3], payload[4]]);
                let expected_packet = self.images[idx].current_packet + 1;
                let packet_count = self.images[idx].packet_count;

                if status != 0x00 {
                    self.complete(false, "数据传输失败：目标设备上报错误状态");
                    return;
                }
                if packet_num != expected_packet {
                    self.complete(
                        false,
                        &format!(
                            "数据传输失败：包序号不匹配 (期望 {expected_packet}, 实际 {packet_num})"
                        ),
                    );
                    return;
                }
                if received_count < packet_num || received_count > packet_count {
                    self.complete(false, "数据传输失败：目标设备接收计数异常");
                    return;
                }

                self.images[idx].current_packet += 1;
                self.sent_packets += 1;
                self.update_progress();

                if self.images[idx].current_packet < packet_count {
                    self.send_upgrade_data();
                } else {
                    self.observer.info(">>> 所有数据包发送完成");
                    self.send_upgrade_end();
                }
            }

            UpgradeState::WaitUpgradeEnd => {
                let Some(idx) = self.current else {
                    return;
                };
                if msg_type != self.images[idx].kind.end_type() {
                    return;
                }

                let accepted = matches!(
                    flag,
                    ResponseFlag::Success
                        | ResponseFlag::UpgradeEnd
                        | ResponseFlag::FpgaConfigSuccess
                );

                if accepted {
                    if payload.first() == Some(&0x00) {
                        self.observer.info(">>> 设备升级完成");
                        self.advance_device();
                    } else {
                        self.complete(false, "设备升级校验失败：目标设备状态异常");
                    }
                } else {
                    let reason = failure_reason(flag);
                    self.complete(false, &format!("设备升级失败：{reason}"));
                }
            }

            UpgradeState::WaitTotalEnd => {
                if msg_type == MessageType::TotalEnd {
                    if flag == ResponseFlag::Success {
                        if payload.first() == Some(&0x00) {
                            self.complete(true, "所有设备升级成功");
                        } else {
                            self.complete(false, "总体结束失败：目标设备状态异常");
                        }
                    } else {
                        let reason = failure_reason(flag);
                        self.complete(false, &format!("总体结束失败：{reason}"));
                    }
                }
            }

            UpgradeState::Idle | UpgradeState::Success | UpgradeState::Failed => {}
        }
    }

    fn send_upgrade_request(&mut self) {
        self.state = UpgradeState::WaitUpgradeRequest;

        let mut flags = UpgradeFlags::default();
        for image in &self.images {
            flags.set(image.kind);
        }

        let frame = frame::build_upgrade_request(self.slave_id, flags);
        self.send(&frame, "发送升级请求");
    }

    fn send_system_reset(&mut self) {
        self.state = UpgradeState::WaitSystemReset;
        let frame = frame::build_system_reset(self.slave_id);
        self.send(&frame, "发送系统复位命令");
    }

    fn begin_device(&mut self) {
        let Some(idx) = self.current else {
            self.complete(false, "内部错误：固件索引无效");
            return;
        };
        if idx >= self.images.len() {
            self.send_total_end();
            return;
        }

        let name = self.images[idx].kind.name();
        self.observer.info(&format!("\n>>> 准备升级 {name}"));
        self.images[idx].current_packet = 0;

        self.send_upgrade_command();
    }

    fn advance_device(&mut self) {
        match self.current {
            Some(idx) if idx + 1 < self.images.len() => {
                self.current = Some(idx + 1);
                self.begin_device();
            }
            // 最后一个设备已完成
            _ => self.send_total_end(),
        }
    }

    fn send_upgrade_command(&mut self) {
        let Some(idx) = self.current.filter(|i| *i < self.images.len()) else {
            self.complete(false, "内部错误：固件索引无效");
            return;
        };

        self.state = UpgradeState::WaitUpgradeCommand;

        let fw = &self.images[idx];
        let frame = frame::build_upgrade_command(
            self.slave_id,
            fw.kind.command_type(),
            fw.file_size(),
            fw.packet_count,
            fw.file_crc,
        );
        self.send(&frame, "发送升级指令");
    }

    fn send_upgrade_data(&mut self) {
        let Some(idx) = self.current.filter(|i| *i < self.images.len()) else {
            self.complete(false, "内部错误：固件索引无效");
            return;
        };

        self.state = UpgradeState::WaitUpgradeData;

        let fw = &self.images[idx];
        let packet_num = fw.current_packet + 1;
        let description = format!("发送数据包 {}/{}", packet_num, fw.packet_count);

        let Some(chunk) = fw.chunk(fw.current_packet) else {
            self.complete(false, "内部错误：数据包偏移无效");
            return;
        };

        let frame =
            frame::build_upgrade_data(self.slave_id, fw.kind.data_type(), packet_num, chunk);
        self.send(&frame, &description);
    }

    fn send_upgrade_end(&mut self) {
        let Some(idx) = self.current.filter(|i| *i < self.images.len()) else {
            self.complete(false, "内部错误：固件索引无效");
            return;
        };

        self.state = UpgradeState::WaitUpgradeEnd;

        let end_type = self.images[idx].kind.end_type();
        let frame = frame::build_upgrade_end(self.slave_id, end_type);
        self.send(&frame, "发送升级结束");
    }

    fn send_total_end(&mut self) {
        self.state = UpgradeState::WaitTotalEnd;
        let frame = frame::build_total_end(self.slave_id);
        self.send(&frame, "发送总体结束");
    }

    fn send(&mut self, frame: &[u8], description: &str) {
        if let Err(e) = self.sink.send(frame, description) {
            self.complete(false, &format!("发送数据失败：{e}"));
            return;
        }
        self.arm_timer();
    }

    fn arm_timer(&mut self) {
        if self.is_active() {
            self.deadline = Some(Instant::now() + TIMEOUT_INTERVAL);
        }
    }

    fn update_progress(&mut self) {
        let Some(idx) = self.current else {
            return;
        };
        let fw = &self.images[idx];

        let device = if fw.packet_count > 0 {
            fw.current_packet as u32 * 100 / fw.packet_count as u32
        } else {
            0
        };
        let total = if self.total_packets > 0 {
            self.sent_packets * 100 / self.total_packets
        } else {
            0
        };

        self.observer.progress(device, total);
    }

    fn complete(&mut self, success: bool, message: &str) {
        self.deadline = None;

        if success {
            self.state = UpgradeState::Success;
            self.observer.info(&format!("\n>>> 升级完成！{message}"));
        } else {
            self.state = UpgradeState::Failed;
            self.observer.info(&format!("\n>>> 升级失败：{message}"));
        }
        self.observer.info("========================================");

        self.observer.finished(success, message);

        self.reset_state();
    }

    fn reset_state(&mut self) {
        self.state = UpgradeState::Idle;
        self.current = None;
        self.retry_count = 0;
        self.deadline = None;
    }
}

/// Short operator-facing reason embedded in terminal failure messages.
fn failure_reason(flag: ResponseFlag) -> String {
    match flag {
        ResponseFlag::Failed => "命令执行失败".to_string(),
        ResponseFlag::CrcError | ResponseFlag::DataCrcError => "数据校验错误".to_string(),
        ResponseFlag::Timeout => "接收超时".to_string(),
        ResponseFlag::ForbidUpgrade => "禁止升级".to_string(),
        ResponseFlag::EraseFailed => "擦除Flash失败".to_string(),
        ResponseFlag::RestartFailed => "重启失败".to_string(),
        ResponseFlag::SizeError => "数据大小出错".to_string(),
        ResponseFlag::FlashWriteFailed => "Flash数据写入失败".to_string(),
        ResponseFlag::FpgaConfigFailed => "FPGA配置失败".to_string(),
        ResponseFlag::FpgaFileDamaged => "FPGA配置文件损坏".to_string(),
        ResponseFlag::FpgaStatusError => "FPGA状态异常".to_string(),
        ResponseFlag::FpgaFlagWriteFailed => "写FPGA固件标志位失败".to_string(),
        ResponseFlag::PacketSizeExceed => "数据包大小超限".to_string(),
        other => other.description(),
    }
}
