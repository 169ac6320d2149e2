//! 码流文件的访问单元切分与探测.

use serde::Serialize;

use scvp_core::{ScvpError, ScvpResult};
use scvp_hevc::sei::SEI_REGION_WISE_PACKING;
use scvp_hevc::{NalScanner, ParameterSetStore, RegionWisePacking, RwpkCodec, ScanMode};

/// 把 Annex B 码流切分为访问单元
///
/// 每个访问单元包含它前面携带的参数集与 SEI.
pub fn split_access_units(data: &[u8]) -> ScvpResult<Vec<&[u8]>> {
    let scanner = NalScanner::new(ScanMode::ParseAllNals);
    let mut store = ParameterSetStore::new();
    let mut units = Vec::new();
    let mut offset = 0;
    while offset < data.len() {
        let report = scanner.scan(&mut store, &data[offset..])?;
        if report.consumed == 0 {
            return Err(ScvpError::InvalidData(format!("偏移 {} 处无法前进", offset)));
        }
        units.push(&data[offset..offset + report.consumed]);
        offset += report.consumed;
    }
    Ok(units)
}

// ============================================================
// 探测结果
// ============================================================

/// 完整探测结果
#[derive(Debug, Serialize)]
pub struct ProbeOutput {
    pub width: u32,
    pub height: u32,
    pub ctb_size: u32,
    pub tile_columns: u32,
    pub tile_rows: u32,
    pub access_units: usize,
    pub idr_count: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rwpk: Vec<RegionWisePacking>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frames: Option<Vec<FrameInfo>>,
}

/// 单个访问单元
#[derive(Debug, Serialize)]
pub struct FrameInfo {
    pub index: usize,
    pub offset: usize,
    pub size: usize,
    pub slice_type: String,
    pub idr: bool,
    pub poc_lsb: u32,
    pub slices: usize,
}

/// 探测整个码流
pub fn probe(data: &[u8], show_frames: bool) -> ScvpResult<ProbeOutput> {
    let scanner = NalScanner::new(ScanMode::ParseAllNals);
    let mut store = ParameterSetStore::new();
    let mut frames = Vec::new();
    let mut rwpk = Vec::new();
    let mut idr_count = 0;
    let mut offset = 0;

    while offset < data.len() {
        let report = scanner.scan(&mut store, &data[offset..])?;
        if report.consumed == 0 {
            return Err(ScvpError::InvalidData(format!("偏移 {} 处无法前进", offset)));
        }
        for nal in &report.nal_units {
            if nal.sei_payload_type == Some(SEI_REGION_WISE_PACKING) {
                rwpk.push(RwpkCodec::decode_nal(nal.bytes())?);
            }
        }
        if report.is_idr() {
            idr_count += 1;
        }
        frames.push(FrameInfo {
            index: frames.len(),
            offset,
            size: report.consumed,
            slice_type: report
                .slice_type
                .map_or_else(|| "-".to_string(), |t| format!("{:?}", t)),
            idr: report.is_idr(),
            poc_lsb: report.pic_order_cnt_lsb,
            slices: report.slices.len(),
        });
        offset += report.consumed;
    }

    let (sps, pps) = store.active()?;
    Ok(ProbeOutput {
        width: sps.width,
        height: sps.height,
        ctb_size: sps.ctb_size(),
        tile_columns: pps.tiles.columns,
        tile_rows: pps.tiles.rows,
        access_units: frames.len(),
        idr_count,
        rwpk,
        frames: show_frames.then_some(frames),
    })
}

/// 文本格式输出
pub fn print_probe_text(output: &ProbeOutput) {
    println!("[STREAM]");
    println!("width={}", output.width);
    println!("height={}", output.height);
    println!("ctb_size={}", output.ctb_size);
    println!("tiles={}x{}", output.tile_columns, output.tile_rows);
    println!("access_units={}", output.access_units);
    println!("idr_count={}", output.idr_count);
    println!("rwpk_messages={}", output.rwpk.len());
    println!("[/STREAM]");
    if let Some(frames) = &output.frames {
        for f in frames {
            println!(
                "[FRAME] index={} offset={} size={} type={} idr={} poc_lsb={} slices={}",
                f.index, f.offset, f.size, f.slice_type, f.idr, f.poc_lsb, f.slices
            );
        }
    }
}
