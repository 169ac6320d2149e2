//! 子命令实现.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use log::{debug, info};

use scvp_geometry::HeadPose;
use scvp_hevc::RegionWisePacking;
use scvp_stitch::{MergeInput, MergeSession, ScvpConfig, UsageMode};

use crate::stream::{print_probe_text, probe, split_access_units};

/// 合并子命令的参数
#[derive(Debug, Clone)]
pub struct MergeArgs {
    pub config: PathBuf,
    pub high: PathBuf,
    pub low: Option<PathBuf>,
    pub yaw: Option<f32>,
    pub pitch: Option<f32>,
    pub frames: Option<usize>,
    pub output: PathBuf,
    pub rwpk_json: Option<PathBuf>,
}

/// 从 JSON 文件加载会话配置
pub fn load_config(path: &Path) -> anyhow::Result<ScvpConfig> {
    let text = fs::read_to_string(path).with_context(|| format!("读取配置 {} 失败", path.display()))?;
    let config: ScvpConfig =
        serde_json::from_str(&text).with_context(|| format!("解析配置 {} 失败", path.display()))?;
    config.validate()?;
    Ok(config)
}

fn read_input(path: &Path) -> anyhow::Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("读取输入 {} 失败", path.display()))
}

/// 输出文件已存在且未指定覆盖时报错
pub fn check_output(path: &Path, overwrite: bool) -> anyhow::Result<()> {
    if !overwrite && path.exists() {
        bail!("输出文件已存在 '{}', 使用 -y 覆盖", path.display());
    }
    Ok(())
}

// ============================================================
// probe
// ============================================================

pub fn run_probe(input: &Path, json: bool, show_frames: bool) -> anyhow::Result<()> {
    let data = read_input(input)?;
    let output = probe(&data, show_frames).with_context(|| format!("探测 {} 失败", input.display()))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_probe_text(&output);
    }
    Ok(())
}

// ============================================================
// stitch
// ============================================================

/// 多路拼接, 返回输出的帧数
pub fn run_stitch(config: &Path, inputs: &[PathBuf], output: &Path) -> anyhow::Result<usize> {
    let config = load_config(config)?;
    if config.mode != UsageMode::StitchOnly {
        bail!("配置的使用方式为 {:?}, stitch 需要 stitch_only", config.mode);
    }
    let buffers = inputs
        .iter()
        .map(|p| read_input(p))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let streams = buffers
        .iter()
        .zip(inputs)
        .map(|(data, path)| {
            split_access_units(data).with_context(|| format!("切分 {} 失败", path.display()))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    let frames = streams.iter().map(Vec::len).min().unwrap_or(0);
    if frames == 0 {
        bail!("输入码流中没有完整的访问单元");
    }

    let mut session = MergeSession::new(config)?;
    let firsts: Vec<&[u8]> = streams.iter().map(|units| units[0]).collect();
    session.init(&firsts).context("拼接会话初始化失败")?;

    let mut out = Vec::new();
    for i in 0..frames {
        let aus: Vec<&[u8]> = streams.iter().map(|units| units[i]).collect();
        let frame = session
            .stitch_streams(&aus)
            .with_context(|| format!("拼接第 {} 帧失败", i))?;
        debug!("第 {} 帧: {:?}, {} 字节", i, frame.slice_type, frame.bitstream.len());
        out.extend_from_slice(&frame.bitstream);
    }
    fs::write(output, &out).with_context(|| format!("写入 {} 失败", output.display()))?;
    info!("拼接完成: {} 路, {} 帧, {} 字节", inputs.len(), frames, out.len());
    Ok(frames)
}

// ============================================================
// merge
// ============================================================

/// 视口合并, 返回输出的帧数
pub fn run_merge(args: &MergeArgs) -> anyhow::Result<usize> {
    let config = load_config(&args.config)?;
    if config.mode != UsageMode::MergeAndViewport {
        bail!("配置的使用方式为 {:?}, merge 需要 merge_and_viewport", config.mode);
    }
    let pose = HeadPose::new(
        args.yaw.unwrap_or(config.viewport.yaw),
        args.pitch.unwrap_or(config.viewport.pitch),
    );

    let high_data = read_input(&args.high)?;
    let low_data = args.low.as_deref().map(read_input).transpose()?;
    let high_units = split_access_units(&high_data).context("切分高分辨率码流失败")?;
    let low_units = low_data
        .as_deref()
        .map(split_access_units)
        .transpose()
        .context("切分低分辨率码流失败")?;

    let mut frames = high_units.len();
    if let Some(low) = &low_units {
        frames = frames.min(low.len());
    }
    if let Some(limit) = args.frames {
        frames = frames.min(limit);
    }
    if frames == 0 {
        bail!("输入码流中没有完整的访问单元");
    }

    let mut session = MergeSession::new(config)?;
    let mut firsts = vec![high_units[0]];
    if let Some(low) = &low_units {
        firsts.push(low[0]);
    }
    session.init(&firsts).context("合并会话初始化失败")?;
    let tiles = session.compute_viewport_tiles(&pose)?;
    info!("视口 yaw={} pitch={}: 选中 {} 个 tile", pose.yaw, pose.pitch, tiles.len());

    let mut out = Vec::new();
    let mut packings: Vec<RegionWisePacking> = Vec::with_capacity(frames);
    for i in 0..frames {
        let input = MergeInput {
            high: high_units[i],
            low: low_units.as_ref().map(|units| units[i]),
        };
        let merged = session
            .merge(input, &tiles)
            .with_context(|| format!("合并第 {} 帧失败", i))?;
        out.extend_from_slice(&merged.bitstream);
        packings.push(merged.rwpk);
    }
    fs::write(&args.output, &out).with_context(|| format!("写入 {} 失败", args.output.display()))?;

    if let Some(path) = &args.rwpk_json {
        let json = serde_json::to_string_pretty(&packings)?;
        fs::write(path, json).with_context(|| format!("写入 {} 失败", path.display()))?;
    }
    info!("合并完成: {} 帧, {} 字节", frames, out.len());
    Ok(frames)
}
