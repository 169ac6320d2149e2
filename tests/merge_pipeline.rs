//! 端到端集成测试: 视口选块 → 高低分辨率合并 → 重新扫描输出.
//!
//! 输入码流由 `scvp_hevc::builder` 生成, 条带数据为可识别的字节模式,
//! 用于验证合并后的条带数据原样透传.

use scvp::core::ErrorCode;
use scvp::geometry::{HeadPose, SelectedTile, convert_selected_to_region_index};
use scvp::hevc::builder::StreamParams;
use scvp::hevc::nal::NalUnitType;
use scvp::hevc::{
    NalScanner, ParameterSetStore, RegionWisePacking, RwpkCodec, ScanMode, ScanReport, SliceType,
};
use scvp::stitch::{MergeInput, MergeSession, ScvpConfig, TierConfig, UsageMode};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn tier(width: u32, height: u32, columns: u32, rows: u32) -> TierConfig {
    TierConfig {
        frame_width: width,
        frame_height: height,
        tile_columns: columns,
        tile_rows: rows,
    }
}

fn stream(width: u32, height: u32, columns: u32, rows: u32) -> StreamParams {
    StreamParams {
        tile_columns: columns,
        tile_rows: rows,
        ..StreamParams::new(width, height)
    }
}

/// 第 `i` 个 tile 的载荷为 `[base + i, 0x80]`
fn payloads(base: u8, count: u32) -> Vec<Vec<u8>> {
    (0..count as u8).map(|i| vec![base + i, 0x80]).collect()
}

fn rescan(data: &[u8]) -> (ParameterSetStore, ScanReport<'_>) {
    let mut store = ParameterSetStore::new();
    let report = NalScanner::new(ScanMode::ParseAllNals)
        .scan(&mut store, data)
        .expect("输出码流应可重新扫描");
    (store, report)
}

fn rects_overlap(a: &scvp::hevc::RectRegionPacking, b: &scvp::hevc::RectRegionPacking) -> bool {
    let (ax1, ay1) = (a.packed_reg_left + a.packed_reg_width, a.packed_reg_top + a.packed_reg_height);
    let (bx1, by1) = (b.packed_reg_left + b.packed_reg_width, b.packed_reg_top + b.packed_reg_height);
    a.packed_reg_left < bx1 && b.packed_reg_left < ax1 && a.packed_reg_top < by1 && b.packed_reg_top < ay1
}

// ============================================================
// 等距柱状投影: 正前方视口
// ============================================================

#[test]
fn test_正前方视口合并为两行两列() {
    init_logger();
    let params = stream(3840, 1920, 4, 2);
    let frame = params.frame(true, NalUnitType::IdrWRadl, SliceType::I, 0, &payloads(0x10, 8));

    let mut session = MergeSession::new(ScvpConfig::merge(tier(3840, 1920, 4, 2), None)).unwrap();
    session.init(&[&frame]).unwrap();
    let tiles = session.compute_viewport_tiles(&HeadPose::new(0.0, 0.0)).unwrap();
    assert_eq!(tiles.len(), 4);

    // 选中的 tile 覆盖视口中心两侧各 45 度
    let min_x = tiles.iter().map(|t| t.x).min().unwrap();
    let max_x = tiles.iter().map(|t| t.x + 960).max().unwrap();
    assert!(min_x <= 1920 - 480 && max_x >= 1920 + 480);
    let min_y = tiles.iter().map(|t| t.y).min().unwrap();
    let max_y = tiles.iter().map(|t| t.y + 960).max().unwrap();
    assert!(min_y <= 960 - 480 && max_y >= 960 + 480);

    let out = session.merge(MergeInput { high: &frame, low: None }, &tiles).unwrap();
    assert_eq!(out.rwpk.packed_pic_width, 2 * 960);
    assert_eq!(out.rwpk.packed_pic_height, 2 * 960);
    assert_eq!(out.rwpk.num_regions(), 4);
    assert_eq!(out.rwpk.num_hi_regions, 4);

    let (store, report) = rescan(&out.bitstream);
    let (sps, pps) = store.active().unwrap();
    assert_eq!((sps.width, sps.height), (1920, 1920));
    // 输出只有一个 tile 行, 每列内两个条带
    assert_eq!((pps.tiles.columns, pps.tiles.rows), (2, 1));
    assert_eq!(report.slices.len(), 4);
    assert!(report.is_idr());
}

#[test]
fn test_合并结果的条带数据原样透传() {
    init_logger();
    let params = stream(3840, 1920, 4, 2);
    let frame = params.frame(true, NalUnitType::IdrWRadl, SliceType::I, 0, &payloads(0x20, 8));
    let mut session = MergeSession::new(ScvpConfig::merge(tier(3840, 1920, 4, 2), None)).unwrap();
    session.init(&[&frame]).unwrap();
    let tiles = session.compute_viewport_tiles(&HeadPose::new(0.0, 0.0)).unwrap();

    let out = session.merge(MergeInput { high: &frame, low: None }, &tiles).unwrap();
    let (_, report) = rescan(&out.bitstream);
    let mut merged: Vec<u8> = report
        .slices
        .iter()
        .filter_map(|s| s.nal.slice_data())
        .flatten()
        .copied()
        .collect();
    let mut expected: Vec<u8> = tiles
        .iter()
        .flat_map(|t| payloads(0x20, 8)[t.region_index.unwrap()].clone())
        .collect();
    merged.sort_unstable();
    expected.sort_unstable();
    assert_eq!(merged, expected);
}

// ============================================================
// 高低分辨率合并
// ============================================================

#[test]
fn test_两块高分辨率与低分辨率全景() {
    init_logger();
    let high = stream(2048, 1024, 4, 2).frame(true, NalUnitType::IdrWRadl, SliceType::I, 0, &payloads(0x10, 8));
    let low = stream(1024, 512, 2, 1).frame(true, NalUnitType::IdrWRadl, SliceType::I, 0, &payloads(0x40, 2));
    let mut config = ScvpConfig::merge(tier(2048, 1024, 4, 2), Some(tier(1024, 512, 2, 1)));
    config.embed_rwpk = true;
    config.aud = true;
    let mut session = MergeSession::new(config).unwrap();
    session.init(&[&high, &low]).unwrap();

    let tiles = [SelectedTile::new(512, 0, 0), SelectedTile::new(512, 512, 0)];
    let out = session.merge(MergeInput { high: &high, low: Some(&low) }, &tiles).unwrap();

    let rwpk = &out.rwpk;
    assert_eq!(rwpk.num_regions(), 4);
    assert_eq!(rwpk.num_hi_regions, 2);
    assert_eq!((rwpk.low_res_pic_width, rwpk.low_res_pic_height), (1024, 512));
    for (i, a) in rwpk.regions.iter().enumerate() {
        assert_eq!(a.packed_reg_left % 512, 0);
        assert_eq!(a.packed_reg_top % 512, 0);
        for b in &rwpk.regions[i + 1..] {
            assert!(!rects_overlap(a, b), "{:?} 与 {:?} 重叠", a, b);
        }
    }

    // AUD 在最前, 嵌入的 RWPK 可从输出中解回
    let units = scvp::hevc::nal::split_annex_b(&out.bitstream).unwrap();
    assert_eq!(units[0].nal_type(), NalUnitType::Aud);
    let sei = units
        .iter()
        .find(|n| n.nal_type() == NalUnitType::PrefixSei)
        .expect("应嵌入区域打包 SEI");
    assert_eq!(&RwpkCodec::decode_nal(sei.bytes()).unwrap(), rwpk);

    let (store, _) = rescan(&out.bitstream);
    let (sps, pps) = store.active().unwrap();
    assert_eq!((sps.width, sps.height), (1024, 1024));
    assert_eq!((pps.tiles.columns, pps.tiles.rows), (2, 1));
    assert!(!pps.tiles.uniform_spacing);

    // 会话的图像参数描述输入的高分辨率码流
    let info = session.pic_info().unwrap();
    assert_eq!((info.width, info.height), (2048, 1024));
    assert_eq!((info.tile_columns, info.tile_rows), (4, 2));
}

#[test]
fn test_多帧合并时间戳递增() {
    init_logger();
    let params = stream(2048, 1024, 4, 2);
    let mut session = MergeSession::new(ScvpConfig::merge(tier(2048, 1024, 4, 2), None)).unwrap();
    let first = params.frame(true, NalUnitType::IdrWRadl, SliceType::I, 0, &payloads(0x10, 8));
    session.init(&[&first]).unwrap();
    let tiles = [SelectedTile::new(0, 0, 0), SelectedTile::new(512, 0, 0)];

    let mut stamps = Vec::new();
    for poc in 0..4u32 {
        let frame = if poc == 0 {
            first.clone()
        } else {
            params.frame(false, NalUnitType::TrailR, SliceType::P, poc, &payloads(0x30, 8))
        };
        let out = session.merge(MergeInput { high: &frame, low: None }, &tiles).unwrap();
        stamps.push(out.rwpk.time_stamp);
    }
    assert_eq!(stamps, vec![0, 1, 2, 3]);
}

// ============================================================
// 错误处理
// ============================================================

#[test]
fn test_截断码流返回错误且参数集表不变() {
    init_logger();
    let params = stream(512, 256, 2, 1);
    let mut store = ParameterSetStore::new();
    let scanner = NalScanner::new(ScanMode::ParseAllNals);
    scanner.scan(&mut store, &params.parameter_sets()).unwrap();
    let before = store.clone();

    let mut data = params.frame(true, NalUnitType::IdrWRadl, SliceType::I, 0, &[Vec::new(), Vec::new()]);
    data.pop();
    assert!(scanner.scan(&mut store, &data).is_err());
    assert_eq!(store, before);
}

#[test]
fn test_未初始化与错误码() {
    init_logger();
    let mut session = MergeSession::new(ScvpConfig::merge(tier(2048, 1024, 4, 2), None)).unwrap();
    let err = session.compute_viewport_tiles(&HeadPose::new(0.0, 0.0)).unwrap_err();
    assert_eq!(err.code(), ErrorCode::NoValue);

    let mut config = ScvpConfig::default();
    config.mode = UsageMode::StitchOnly;
    assert_eq!(MergeSession::new(config).unwrap_err().code(), ErrorCode::BadParam);

    let err = session
        .merge(MergeInput { high: &[], low: None }, &[SelectedTile::new(0, 0, 0)])
        .unwrap_err();
    assert_ne!(err.code(), ErrorCode::None);
}

// ============================================================
// 几何与区域打包性质
// ============================================================

#[test]
fn test_序号转换幂等() {
    init_logger();
    let mut session = MergeSession::new(ScvpConfig {
        mode: UsageMode::ViewportOnly,
        ..ScvpConfig::merge(tier(3840, 1920, 4, 2), None)
    })
    .unwrap();
    session.init(&[]).unwrap();
    let mut tiles = session.compute_viewport_tiles(&HeadPose::new(90.0, 30.0)).unwrap();
    let once = tiles.clone();
    let table = session.tile_info().unwrap().clone();
    convert_selected_to_region_index(&mut tiles, &table.high).unwrap();
    assert_eq!(tiles, once);
    assert!(tiles.iter().all(|t| t.region_index.is_some_and(|i| i < 8)));
}

#[test]
fn test_区域打包往返() {
    for n in 1..=12u16 {
        let rwpk = RegionWisePacking {
            proj_pic_width: 3840,
            proj_pic_height: 1920,
            packed_pic_width: 512 * n,
            packed_pic_height: 512,
            regions: (0..n)
                .map(|i| scvp::hevc::RectRegionPacking {
                    transform_type: (i % 8) as u8,
                    proj_reg_width: 960,
                    proj_reg_height: 960,
                    proj_reg_left: u32::from(i % 4) * 960,
                    proj_reg_top: u32::from(i / 4 % 2) * 960,
                    packed_reg_width: 512,
                    packed_reg_height: 512,
                    packed_reg_left: i * 512,
                    ..Default::default()
                })
                .collect(),
            num_hi_regions: n as u8,
            low_res_pic_width: 1920,
            low_res_pic_height: 960,
            time_stamp: u32::from(n) * 1000,
            ..RegionWisePacking::default()
        };
        let nal = RwpkCodec::encode_nal(&rwpk).unwrap();
        assert_eq!(RwpkCodec::decode_nal(&nal).unwrap(), rwpk, "{} 个区域", n);
    }
}
