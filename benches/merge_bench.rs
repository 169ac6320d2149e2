//! SCVP 性能基准测试.
//!
//! 覆盖 NAL 扫描、视口选块、高低分辨率合并与区域打包编解码等核心路径.

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use scvp::geometry::{HeadPose, SelectedTile};
use scvp::hevc::builder::StreamParams;
use scvp::hevc::nal::NalUnitType;
use scvp::hevc::{NalScanner, ParameterSetStore, RwpkCodec, ScanMode, SliceType};
use scvp::stitch::{MergeInput, MergeSession, ScvpConfig, TierConfig, UsageMode};

fn tier(width: u32, height: u32, columns: u32, rows: u32) -> TierConfig {
    TierConfig {
        frame_width: width,
        frame_height: height,
        tile_columns: columns,
        tile_rows: rows,
    }
}

/// 生成一帧 IDR, 每个 tile 的条带数据为 `slice_bytes` 字节
fn make_frame(width: u32, height: u32, columns: u32, rows: u32, slice_bytes: usize) -> Vec<u8> {
    let params = StreamParams {
        tile_columns: columns,
        tile_rows: rows,
        ..StreamParams::new(width, height)
    };
    let payloads: Vec<Vec<u8>> = (0..columns * rows)
        .map(|i| {
            let mut p: Vec<u8> = (0..slice_bytes).map(|j| ((i as usize * 31 + j) % 251) as u8 + 1).collect();
            p.push(0x80);
            p
        })
        .collect();
    params.frame(true, NalUnitType::IdrWRadl, SliceType::I, 0, &payloads)
}

fn bench_scan(c: &mut Criterion) {
    c.bench_function("scan_3840x1920_4x2_access_unit", |b| {
        let frame = make_frame(3840, 1920, 4, 2, 16 * 1024);
        let scanner = NalScanner::new(ScanMode::ParseAllNals);
        b.iter(|| {
            let mut store = ParameterSetStore::new();
            let report = scanner.scan(&mut store, black_box(&frame)).unwrap();
            black_box(report.slices.len());
        });
    });
}

fn bench_viewport(c: &mut Criterion) {
    c.bench_function("viewport_erp_8x4", |b| {
        let mut session = MergeSession::new(ScvpConfig {
            mode: UsageMode::ViewportOnly,
            ..ScvpConfig::merge(tier(7680, 3840, 8, 4), None)
        })
        .unwrap();
        session.init(&[]).unwrap();
        let mut yaw = -180.0f32;
        b.iter(|| {
            yaw = if yaw >= 180.0 { -180.0 } else { yaw + 7.5 };
            let tiles = session.compute_viewport_tiles(&HeadPose::new(yaw, 15.0)).unwrap();
            black_box(tiles.len());
        });
    });
}

fn bench_merge(c: &mut Criterion) {
    c.bench_function("merge_hr4_with_lr_panorama", |b| {
        let high = make_frame(2048, 1024, 4, 2, 8 * 1024);
        let low = make_frame(1024, 512, 2, 1, 4 * 1024);
        let mut session = MergeSession::new(ScvpConfig::merge(
            tier(2048, 1024, 4, 2),
            Some(tier(1024, 512, 2, 1)),
        ))
        .unwrap();
        session.init(&[&high, &low]).unwrap();
        let tiles = [
            SelectedTile::new(512, 0, 0),
            SelectedTile::new(1024, 0, 0),
            SelectedTile::new(512, 512, 0),
            SelectedTile::new(1024, 512, 0),
        ];
        b.iter(|| {
            let out = session
                .merge(MergeInput { high: black_box(&high), low: Some(&low) }, &tiles)
                .unwrap();
            black_box(out.bitstream.len());
        });
    });
}

fn bench_rwpk(c: &mut Criterion) {
    c.bench_function("rwpk_encode_decode_8_regions", |b| {
        let high = make_frame(2048, 1024, 4, 2, 64);
        let mut session = MergeSession::new(ScvpConfig::merge(tier(2048, 1024, 4, 2), None)).unwrap();
        session.init(&[&high]).unwrap();
        let tiles: Vec<SelectedTile> = (0..8)
            .map(|i| SelectedTile::new((i % 4) * 512, (i / 4) * 512, 0))
            .collect();
        let rwpk = session
            .merge(MergeInput { high: &high, low: None }, &tiles)
            .unwrap()
            .rwpk;
        b.iter(|| {
            let nal = RwpkCodec::encode_nal(black_box(&rwpk)).unwrap();
            black_box(RwpkCodec::decode_nal(&nal).unwrap());
        });
    });
}

criterion_group!(benches, bench_scan, bench_viewport, bench_merge, bench_rwpk);
criterion_main!(benches);
