//! scvp-cli - 360 度分块视频码流工具
//!
//! - `probe`: 探测 HEVC 码流的尺寸、tile 网格、帧结构与区域打包 SEI;
//! - `stitch`: 把多路码流按网格拼接为一路;
//! - `merge`: 按视角选出高分辨率 tile, 与低分辨率全景合并为一路.

mod commands;
mod logging;
mod stream;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

use commands::{MergeArgs, check_output, run_merge, run_probe, run_stitch};

/// SCVP 码流工具
#[derive(Parser, Debug)]
#[command(name = "scvp-cli", version, about = "360 度分块 HEVC 码流的选块与合并工具")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// 日志级别 (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// 日志目录
    #[arg(long, default_value = "logs", global = true)]
    log_dir: PathBuf,

    /// 覆盖已存在的输出文件
    #[arg(short = 'y', long, global = true)]
    overwrite: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 探测码流信息
    Probe {
        /// 输入码流 (Annex B)
        input: PathBuf,

        /// 输出 JSON 格式
        #[arg(long)]
        json: bool,

        /// 列出每个访问单元
        #[arg(long)]
        show_frames: bool,
    },

    /// 多路码流拼接
    Stitch {
        /// 会话配置 (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// 输出码流
        #[arg(short, long)]
        output: PathBuf,

        /// 输入码流, 按光栅顺序
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },

    /// 视口选块并合并高低分辨率码流
    Merge {
        /// 会话配置 (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// 高分辨率码流
        #[arg(long)]
        high: PathBuf,

        /// 低分辨率码流
        #[arg(long)]
        low: Option<PathBuf>,

        /// 偏航角 (度), 缺省取配置中的初始视角
        #[arg(long, allow_hyphen_values = true)]
        yaw: Option<f32>,

        /// 俯仰角 (度)
        #[arg(long, allow_hyphen_values = true)]
        pitch: Option<f32>,

        /// 最多处理的帧数
        #[arg(long)]
        frames: Option<usize>,

        /// 输出码流
        #[arg(short, long)]
        output: PathBuf,

        /// 把每帧的区域打包信息写入 JSON 文件
        #[arg(long)]
        rwpk_json: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = logging::init(&cli.log_dir, "scvp-cli", cli.verbose) {
        eprintln!("警告: {e:#}");
    }

    let result = match cli.command {
        Command::Probe {
            input,
            json,
            show_frames,
        } => run_probe(&input, json, show_frames),
        Command::Stitch {
            config,
            output,
            inputs,
        } => check_output(&output, cli.overwrite)
            .and_then(|()| run_stitch(&config, &inputs, &output))
            .map(|frames| eprintln!("已拼接 {frames} 帧 -> {}", output.display())),
        Command::Merge {
            config,
            high,
            low,
            yaw,
            pitch,
            frames,
            output,
            rwpk_json,
        } => {
            let args = MergeArgs {
                config,
                high,
                low,
                yaw,
                pitch,
                frames,
                output,
                rwpk_json,
            };
            check_output(&args.output, cli.overwrite)
                .and_then(|()| run_merge(&args))
                .map(|frames| eprintln!("已合并 {frames} 帧 -> {}", args.output.display()))
        }
    };

    if let Err(e) = result {
        eprintln!("错误: {e:#}");
        process::exit(1);
    }
}
