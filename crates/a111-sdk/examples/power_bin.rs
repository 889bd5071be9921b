//! Power bin 采集示例
//!
//! 建立 power bin 会话并打印每帧的 bin 幅值，Ctrl-C 停止。
//!
//! # 运行
//!
//! ```bash
//! # 串口模组
//! cargo run --example power_bin -- --serial /dev/ttyUSB0
//!
//! # 运行 exploration server 的主机
//! cargo run --example power_bin -- --host 192.168.1.20
//! ```

use a111_sdk::prelude::*;
use clap::Parser;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// 命令行参数
#[derive(Parser, Debug)]
#[command(name = "power_bin")]
#[command(about = "Power bin 采集示例")]
struct Args {
    /// 串口设备路径
    #[arg(long, conflicts_with = "host")]
    serial: Option<String>,

    /// 串口波特率
    #[arg(long, default_value = "115200")]
    baud_rate: u32,

    /// Socket 服务地址（host 或 host:port）
    #[arg(long)]
    host: Option<String>,

    /// 测距区间（米）
    #[arg(long, num_args = 2, default_values = ["0.2", "0.6"])]
    range: Vec<f64>,

    /// 扫描频率（Hz）
    #[arg(long, default_value = "20")]
    sweep_rate: f64,

    /// 请求的 bin 数量（默认由设备决定）
    #[arg(long)]
    bins: Option<u32>,

    /// 传感器编号
    #[arg(long, default_value = "1")]
    sensor: Vec<u32>,

    /// 采集帧数（默认持续到 Ctrl-C）
    #[arg(long)]
    frames: Option<usize>,
}

fn main() -> anyhow::Result<()> {
    a111_sdk::init_logger("info");
    let args = Args::parse();

    let mut config = PowerBinConfig::new();
    config.set_sensors(args.sensor.clone())?;
    config.set_range_interval([args.range[0], args.range[1]])?;
    config.set_sweep_rate(args.sweep_rate)?;
    if let Some(bins) = args.bins {
        config.set_bin_count(bins)?;
    }
    println!("{}", config);

    let builder = RadarClient::builder();
    let builder = match (&args.serial, &args.host) {
        (Some(path), _) => builder.serial(path.as_str(), args.baud_rate),
        (None, Some(host)) => builder.socket(host.as_str()),
        (None, None) => anyhow::bail!("either --serial or --host is required"),
    };
    let mut client = builder.build()?;

    let info = client.setup_session(config)?;
    println!("Session: {:?}", info);

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    client.start_streaming()?;
    let mut received = 0usize;
    while running.load(Ordering::SeqCst) && args.frames.is_none_or(|n| received < n) {
        match client.get_next() {
            Ok((metadata, frame)) => {
                received += 1;
                let values: Vec<String> = frame
                    .as_amplitude()
                    .map(|arr| arr.iter().map(|v| format!("{:8.1}", v)).collect())
                    .unwrap_or_default();
                println!("#{:<6} {}", metadata.sequence_number, values.join(" "));
            },
            Err(e) if e.is_retryable() => eprintln!("skipped frame: {}", e),
            Err(e) => return Err(e.into()),
        }
    }

    client.stop_streaming()?;
    client.disconnect();
    println!("Received {} frames", received);
    Ok(())
}
