use std::path::PathBuf;
use std::sync::mpsc;

use anyhow::{Result, anyhow, bail};
use clap::{Args, Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use colored::Colorize;
use log::debug;

use boot_protocol::firmware::FirmwareSet;
use fwtool::config::{LinkKind, SerialConfig, TcpConfig, UpgradeConfig};
use fwtool::{runner, transport};

/// 多MCU固件升级上位机工具 (FPGA/DSP1/DSP2/ARM)
#[derive(Parser)]
#[command(name = "fwtool", version)]
struct Cli {
    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 执行固件升级流程
    Upgrade(UpgradeArgs),
}

#[derive(Args)]
struct UpgradeArgs {
    /// TOML 配置文件路径
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 串口设备名（串口模式）
    #[arg(long, conflicts_with = "tcp")]
    port: Option<String>,

    /// 串口波特率
    #[arg(long)]
    baud: Option<u32>,

    /// 目标地址 host:port（网口模式）
    #[arg(long)]
    tcp: Option<String>,

    /// 数据包大小（1..=4096 字节）
    #[arg(long)]
    packet_size: Option<usize>,

    /// 下位机地址（网口模式默认取IP末字节）
    #[arg(long)]
    slave_id: Option<u8>,

    /// FPGA 固件文件
    #[arg(long)]
    fpga: Option<PathBuf>,

    /// DSP1 固件文件
    #[arg(long)]
    dsp1: Option<PathBuf>,

    /// DSP2 固件文件
    #[arg(long)]
    dsp2: Option<PathBuf>,

    /// ARM 固件文件
    #[arg(long)]
    arm: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(cli.verbose.log_level_filter())
        .init();

    match cli.command {
        Commands::Upgrade(args) => upgrade(args),
    }
}

fn upgrade(args: UpgradeArgs) -> Result<()> {
    let config = build_config(&args)?;
    debug!("effective config: {config:?}");

    let firmware = FirmwareSet::load(config.packet_size, &config.image_specs())?;
    let slave_id = config.slave_id();

    let (events_tx, events_rx) = mpsc::channel();
    let transport = match config.link {
        LinkKind::Serial => {
            let serial = config
                .serial
                .as_ref()
                .ok_or_else(|| anyhow!("串口模式缺少 [serial] 配置或 --port 参数"))?;
            transport::open_serial(serial, events_tx)?
        }
        LinkKind::Tcp => {
            let tcp = config
                .tcp
                .as_ref()
                .ok_or_else(|| anyhow!("网口模式缺少 [tcp] 配置或 --tcp 参数"))?;
            transport::open_tcp(tcp, events_tx)?
        }
    };

    runner::run_upgrade(transport, events_rx, slave_id, firmware)?;

    println!("{}", "所有设备升级成功".green().bold());
    Ok(())
}

/// Merges the configuration file (if any) with the CLI overrides.
fn build_config(args: &UpgradeArgs) -> Result<UpgradeConfig> {
    let mut config = match &args.config {
        Some(path) => UpgradeConfig::load(path)?,
        None => UpgradeConfig::default(),
    };

    if let Some(tcp) = &args.tcp {
        let (host, port) = tcp
            .rsplit_once(':')
            .ok_or_else(|| anyhow!("--tcp 参数格式应为 host:port"))?;
        let port: u16 = port.parse().map_err(|_| anyhow!("无效的端口号: {port}"))?;
        if port == 0 {
            bail!("无效的端口号: 0");
        }
        config.link = LinkKind::Tcp;
        config.tcp = Some(TcpConfig {
            host: host.to_string(),
            port,
        });
    }

    if let Some(port) = &args.port {
        config.link = LinkKind::Serial;
        let serial = config.serial.get_or_insert_with(SerialConfig::default);
        serial.port = port.clone();
    }
    if let Some(baud) = args.baud {
        let serial = config.serial.get_or_insert_with(SerialConfig::default);
        serial.baud = baud;
    }

    if let Some(packet_size) = args.packet_size {
        config.packet_size = packet_size;
    }
    if let Some(slave_id) = args.slave_id {
        config.slave_id = Some(slave_id);
    }

    if args.fpga.is_some() {
        config.images.fpga = args.fpga.clone();
    }
    if args.dsp1.is_some() {
        config.images.dsp1 = args.dsp1.clone();
    }
    if args.dsp2.is_some() {
        config.images.dsp2 = args.dsp2.clone();
    }
    if args.arm.is_some() {
        config.images.arm = args.arm.clone();
    }

    Ok(config)
}
