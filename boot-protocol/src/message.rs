//! Message type and response flag catalog.
//!
//! Byte values mirror the target bootloader firmware and must not be
//! renumbered. Note the FPGA end code is 0x09, not 0x08; the gap is part of
//! the deployed wire contract.

/// 报文类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// 升级请求报文
    UpgradeRequest = 0x01,
    /// 系统复位命令
    SystemReset = 0x02,

    /// ARM升级命令
    ArmCommand = 0x03,
    /// ARM升级数据
    ArmData = 0x04,
    /// ARM升级结束
    ArmEnd = 0x05,

    /// FPGA升级命令
    FpgaCommand = 0x06,
    /// FPGA升级数据
    FpgaData = 0x07,
    /// FPGA升级结束
    FpgaEnd = 0x09,

    /// DSP1升级命令
    Dsp1Command = 0x0A,
    /// DSP1升级数据
    Dsp1Data = 0x0B,
    /// DSP1升级结束
    Dsp1End = 0x0C,

    /// DSP2升级命令
    Dsp2Command = 0x0D,
    /// DSP2升级数据
    Dsp2Data = 0x0E,
    /// DSP2升级结束
    Dsp2End = 0x0F,

    /// 总体结束
    TotalEnd = 0x10,
    /// 调试信息显示
    DebugInfo = 0x1F,
}

impl MessageType {
    /// Returns the human-readable label used in operator-facing output.
    pub fn description(&self) -> &'static str {
        match self {
            MessageType::UpgradeRequest => "升级请求",
            MessageType::SystemReset => "系统复位",
            MessageType::ArmCommand => "ARM升级命令",
            MessageType::ArmData => "ARM升级数据",
            MessageType::ArmEnd => "ARM升级结束",
            MessageType::FpgaCommand => "FPGA升级命令",
            MessageType::FpgaData => "FPGA升级数据",
            MessageType::FpgaEnd => "FPGA升级结束",
            MessageType::Dsp1Command => "DSP1升级命令",
            MessageType::Dsp1Data => "DSP1升级数据",
            MessageType::Dsp1End => "DSP1升级结束",
            MessageType::Dsp2Command => "DSP2升级命令",
            MessageType::Dsp2Data => "DSP2升级数据",
            MessageType::Dsp2End => "DSP2升级结束",
            MessageType::TotalEnd => "总体结束",
            MessageType::DebugInfo => "调试信息",
        }
    }
}

impl From<MessageType> for u8 {
    fn from(value: MessageType) -> Self {
        value as u8
    }
}

impl TryFrom<u8> for MessageType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(MessageType::UpgradeRequest),
            0x02 => Ok(MessageType::SystemReset),
            0x03 => Ok(MessageType::ArmCommand),
            0x04 => Ok(MessageType::ArmData),
            0x05 => Ok(MessageType::ArmEnd),
            0x06 => Ok(MessageType::FpgaCommand),
            0x07 => Ok(MessageType::FpgaData),
            0x09 => Ok(MessageType::FpgaEnd),
            0x0A => Ok(MessageType::Dsp1Command),
            0x0B => Ok(MessageType::Dsp1Data),
            0x0C => Ok(MessageType::Dsp1End),
            0x0D => Ok(MessageType::Dsp2Command),
            0x0E => Ok(MessageType::Dsp2Data),
            0x0F => Ok(MessageType::Dsp2End),
            0x10 => Ok(MessageType::TotalEnd),
            0x1F => Ok(MessageType::DebugInfo),
            other => Err(other),
        }
    }
}

/// 应答标识
///
/// Unlisted byte values decode to [`ResponseFlag::Unknown`] so a newer
/// bootloader can report codes this host does not know about without the
/// frame being dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFlag {
    /// 命令执行成功
    Success,
    /// 命令执行失败
    Failed,
    /// 数据校验错误
    CrcError,
    /// 接收超时
    Timeout,
    /// 允许升级
    AllowUpgrade,
    /// 禁止升级
    ForbidUpgrade,
    /// 退出升级流程
    ExitUpgrade,
    /// 解锁成功
    UnlockSuccess,
    /// 解锁失败
    UnlockFailed,
    /// 准备擦除Flash
    PrepareErase,
    /// 擦除Flash成功
    EraseSuccess,
    /// 擦除Flash失败
    EraseFailed,
    /// 重启成功
    RestartSuccess,
    /// 重启失败
    RestartFailed,
    /// 升级结束
    UpgradeEnd,
    /// 升级失败，数据大小出错
    SizeError,
    /// 升级失败，数据校验错误
    DataCrcError,
    /// FPGA配置文件自检通过
    FpgaCheckPass,
    /// FPGA配置文件损坏
    FpgaFileDamaged,
    /// FPGA就绪
    FpgaReady,
    /// FPGA状态异常
    FpgaStatusError,
    /// FPGA配置加载完成
    FpgaLoadComplete,
    /// FPGA配置成功
    FpgaConfigSuccess,
    /// 启动应用程序
    StartApp,
    /// DSP版本号
    DspVersion,
    /// Flash数据写入失败
    FlashWriteFailed,
    /// FPGA配置失败
    FpgaConfigFailed,
    /// 写FPGA固件标志位失败
    FpgaFlagWriteFailed,
    /// 数据包大小超限
    PacketSizeExceed,
    /// 开始编程FPGA
    StartProgramFpga,
    /// 请求标识，上位机发出的每个报文固定填充此值
    RequestFlag,
    /// 未收录的应答码
    Unknown(u8),
}

impl ResponseFlag {
    /// Returns the operator-facing description of this flag.
    pub fn description(&self) -> String {
        match self {
            ResponseFlag::Success => "命令执行成功".to_string(),
            ResponseFlag::Failed => "命令执行失败".to_string(),
            ResponseFlag::CrcError => "数据校验错误".to_string(),
            ResponseFlag::Timeout => "接收超时".to_string(),
            ResponseFlag::AllowUpgrade => "允许升级".to_string(),
            ResponseFlag::ForbidUpgrade => "禁止升级".to_string(),
            ResponseFlag::ExitUpgrade => "退出升级流程".to_string(),
            ResponseFlag::UnlockSuccess => "解锁成功".to_string(),
            ResponseFlag::UnlockFailed => "解锁失败".to_string(),
            ResponseFlag::PrepareErase => "准备擦除Flash".to_string(),
            ResponseFlag::EraseSuccess => "擦除Flash成功".to_string(),
            ResponseFlag::EraseFailed => "擦除Flash失败".to_string(),
            ResponseFlag::RestartSuccess => "重启成功".to_string(),
            ResponseFlag::RestartFailed => "重启失败".to_string(),
            ResponseFlag::UpgradeEnd => "升级结束，所有数据包发送成功".to_string(),
            ResponseFlag::SizeError => "升级失败，数据大小出错".to_string(),
            ResponseFlag::DataCrcError => "升级失败，数据校验错误".to_string(),
            ResponseFlag::FpgaCheckPass => "FPGA配置文件自检通过".to_string(),
            ResponseFlag::FpgaFileDamaged => "FPGA配置文件损坏".to_string(),
            ResponseFlag::FpgaReady => "FPGA就绪，等待配置".to_string(),
            ResponseFlag::FpgaStatusError => "FPGA状态异常".to_string(),
            ResponseFlag::FpgaLoadComplete => "FPGA配置加载完成".to_string(),
            ResponseFlag::FpgaConfigSuccess => "FPGA配置成功".to_string(),
            ResponseFlag::StartApp => "启动应用程序".to_string(),
            ResponseFlag::DspVersion => "DSP版本号".to_string(),
            ResponseFlag::FlashWriteFailed => "Flash数据写入失败".to_string(),
            ResponseFlag::FpgaConfigFailed => "FPGA配置失败".to_string(),
            ResponseFlag::FpgaFlagWriteFailed => "写FPGA固件标志位失败".to_string(),
            ResponseFlag::PacketSizeExceed => "数据包大小超限".to_string(),
            ResponseFlag::StartProgramFpga => "开始编程FPGA".to_string(),
            ResponseFlag::RequestFlag => "请求标识".to_string(),
            ResponseFlag::Unknown(raw) => format!("未知响应(0x{raw:02x})"),
        }
    }
}

impl From<u8> for ResponseFlag {
    fn from(value: u8) -> Self {
        match value {
            0x00 => ResponseFlag::Success,
            0x01 => ResponseFlag::Failed,
            0x02 => ResponseFlag::CrcError,
            0x03 => ResponseFlag::Timeout,
            0x04 => ResponseFlag::AllowUpgrade,
            0x05 => ResponseFlag::ForbidUpgrade,
            0x06 => ResponseFlag::ExitUpgrade,
            0x07 => ResponseFlag::UnlockSuccess,
            0x08 => ResponseFlag::UnlockFailed,
            0x09 => ResponseFlag::PrepareErase,
            0x0A => ResponseFlag::EraseSuccess,
            0x0B => ResponseFlag::EraseFailed,
            0x0C => ResponseFlag::RestartSuccess,
            0x0D => ResponseFlag::RestartFailed,
            0x0E => ResponseFlag::UpgradeEnd,
            0x0F => ResponseFlag::SizeError,
            0x10 => ResponseFlag::DataCrcError,
            0x11 => ResponseFlag::FpgaCheckPass,
            0x12 => ResponseFlag::FpgaFileDamaged,
            0x13 => ResponseFlag::FpgaReady,
            0x14 => ResponseFlag::FpgaStatusError,
            0x15 => ResponseFlag::FpgaLoadComplete,
            0x16 => ResponseFlag::FpgaConfigSuccess,
            0x17 => ResponseFlag::StartApp,
            0x18 => ResponseFlag::DspVersion,
            0x19 => ResponseFlag::FlashWriteFailed,
            0x20 => ResponseFlag::FpgaConfigFailed,
            0x21 => ResponseFlag::FpgaFlagWriteFailed,
            0x22 => ResponseFlag::PacketSizeExceed,
            0x23 => ResponseFlag::StartProgramFpga,
            0xFE => ResponseFlag::RequestFlag,
            other => ResponseFlag::Unknown(other),
        }
    }
}

impl From<ResponseFlag> for u8 {
    fn from(flag: ResponseFlag) -> Self {
        match flag {
            ResponseFlag::Success => 0x00,
            ResponseFlag::Failed => 0x01,
            ResponseFlag::CrcError => 0x02,
            ResponseFlag::Timeout => 0x03,
            ResponseFlag::AllowUpgrade => 0x04,
            ResponseFlag::ForbidUpgrade => 0x05,
            ResponseFlag::ExitUpgrade => 0x06,
            ResponseFlag::UnlockSuccess => 0x07,
            ResponseFlag::UnlockFailed => 0x08,
            ResponseFlag::PrepareErase => 0x09,
            ResponseFlag::EraseSuccess => 0x0A,
            ResponseFlag::EraseFailed => 0x0B,
            ResponseFlag::RestartSuccess => 0x0C,
            ResponseFlag::RestartFailed => 0x0D,
            ResponseFlag::UpgradeEnd => 0x0E,
            ResponseFlag::SizeError => 0x0F,
            ResponseFlag::DataCrcError => 0x10,
            ResponseFlag::FpgaCheckPass => 0x11,
            ResponseFlag::FpgaFileDamaged => 0x12,
            ResponseFlag::FpgaReady => 0x13,
            ResponseFlag::FpgaStatusError => 0x14,
            ResponseFlag::FpgaLoadComplete => 0x15,
            ResponseFlag::FpgaConfigSuccess => 0x16,
            ResponseFlag::StartApp => 0x17,
            ResponseFlag::DspVersion => 0x18,
            ResponseFlag::FlashWriteFailed => 0x19,
            ResponseFlag::FpgaConfigFailed => 0x20,
            ResponseFlag::FpgaFlagWriteFailed => 0x21,
            ResponseFlag::PacketSizeExceed => 0x22,
            ResponseFlag::StartProgramFpga => 0x23,
            ResponseFlag::RequestFlag => 0xFE,
            ResponseFlag::Unknown(raw) => raw,
        }
    }
}

/// One of the four co-processors on the target.
///
/// Devices always upgrade in the order FPGA → DSP1 → DSP2 → ARM; each has a
/// dedicated command/data/end message triplet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Fpga,
    Dsp1,
    Dsp2,
    Arm,
}

impl DeviceKind {
    /// Fixed upgrade order.
    pub const ORDER: [DeviceKind; 4] = [
        DeviceKind::Fpga,
        DeviceKind::Dsp1,
        DeviceKind::Dsp2,
        DeviceKind::Arm,
    ];

    /// Display name of the device.
    pub fn name(&self) -> &'static str {
        match self {
            DeviceKind::Fpga => "FPGA",
            DeviceKind::Dsp1 => "DSP1",
            DeviceKind::Dsp2 => "DSP2",
            DeviceKind::Arm => "ARM",
        }
    }

    /// Upgrade command message type for this device.
    pub fn command_type(&self) -> MessageType {
        match self {
            DeviceKind::Fpga => MessageType::FpgaCommand,
            DeviceKind::Dsp1 => MessageType::Dsp1Command,
            DeviceKind::Dsp2 => MessageType::Dsp2Command,
            DeviceKind::Arm => MessageType::ArmCommand,
        }
    }

    /// Upgrade data message type for this device.
    pub fn data_type(&self) -> MessageType {
        match self {
            DeviceKind::Fpga => MessageType::FpgaData,
            DeviceKind::Dsp1 => MessageType::Dsp1Data,
            DeviceKind::Dsp2 => MessageType::Dsp2Data,
            DeviceKind::Arm => MessageType::ArmData,
        }
    }

    /// Upgrade end message type for this device.
    pub fn end_type(&self) -> MessageType {
        match self {
            DeviceKind::Fpga => MessageType::FpgaEnd,
            DeviceKind::Dsp1 => MessageType::Dsp1End,
            DeviceKind::Dsp2 => MessageType::Dsp2End,
            DeviceKind::Arm => MessageType::ArmEnd,
        }
    }
}

/// 升级目标标识
///
/// Packed into the single payload byte of the upgrade request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpgradeFlags {
    pub fpga: bool,
    pub dsp1: bool,
    pub dsp2: bool,
    pub arm: bool,
}

impl UpgradeFlags {
    /// Marks `kind` as enabled.
    pub fn set(&mut self, kind: DeviceKind) {
        match kind {
            DeviceKind::Fpga => self.fpga = true,
            DeviceKind::Dsp1 => self.dsp1 = true,
            DeviceKind::Dsp2 => self.dsp2 = true,
            DeviceKind::Arm => self.arm = true,
        }
    }

    /// Packs the flags into the wire byte: bit0 FPGA, bit1 DSP1, bit2 DSP2,
    /// bit3 ARM.
    pub fn to_byte(self) -> u8 {
        (self.fpga as u8)
            | ((self.dsp1 as u8) << 1)
            | ((self.dsp2 as u8) << 2)
            | ((self.arm as u8) << 3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_codes() {
        assert_eq!(u8::from(MessageType::UpgradeRequest), 0x01);
        assert_eq!(u8::from(MessageType::SystemReset), 0x02);
        assert_eq!(u8::from(MessageType::ArmEnd), 0x05);
        // the FPGA end code skips 0x08 on the wire
        assert_eq!(u8::from(MessageType::FpgaEnd), 0x09);
        assert!(MessageType::try_from(0x08).is_err());
        assert_eq!(u8::from(MessageType::TotalEnd), 0x10);
        assert_eq!(u8::from(MessageType::DebugInfo), 0x1F);
    }

    #[test]
    fn message_type_roundtrip() {
        for raw in 0x01..=0x1F_u8 {
            if let Ok(ty) = MessageType::try_from(raw) {
                assert_eq!(u8::from(ty), raw);
            }
        }
    }

    #[test]
    fn response_flag_roundtrip() {
        for raw in 0x00..=0xFF_u8 {
            let flag = ResponseFlag::from(raw);
            assert_eq!(u8::from(flag), raw);
        }
    }

    #[test]
    fn reserved_flag_bytes_are_unknown() {
        assert_eq!(ResponseFlag::from(0x24), ResponseFlag::Unknown(0x24));
        assert_eq!(ResponseFlag::from(0x2F), ResponseFlag::Unknown(0x2F));
        assert_eq!(
            ResponseFlag::Unknown(0x2F).description(),
            "未知响应(0x2f)"
        );
    }

    #[test]
    fn upgrade_flags_packing() {
        let mut flags = UpgradeFlags::default();
        assert_eq!(flags.to_byte(), 0x00);
        flags.set(DeviceKind::Fpga);
        assert_eq!(flags.to_byte(), 0x01);
        flags.set(DeviceKind::Arm);
        assert_eq!(flags.to_byte(), 0x09);
        flags.set(DeviceKind::Dsp1);
        flags.set(DeviceKind::Dsp2);
        assert_eq!(flags.to_byte(), 0x0F);
    }

    #[test]
    fn device_message_triplets() {
        assert_eq!(DeviceKind::Fpga.command_type(), MessageType::FpgaCommand);
        assert_eq!(DeviceKind::Fpga.end_type(), MessageType::FpgaEnd);
        assert_eq!(DeviceKind::Dsp1.data_type(), MessageType::Dsp1Data);
        assert_eq!(DeviceKind::Dsp2.end_type(), MessageType::Dsp2End);
        assert_eq!(DeviceKind::Arm.command_type(), MessageType::ArmCommand);
    }
}
