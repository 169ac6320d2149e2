//! 拼接会话.
//!
//! [`MergeSession`] 持有跨帧的全部状态: 参数集表, 两层 tile 网格, tile 信息表,
//! 最近一次的区域打包信息以及 SEI 设置. 每次调用要么完整成功并提交新状态,
//! 要么返回错误且状态保持不变.

use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use log::{Level, Log, Record};
use serde::{Deserialize, Serialize};

use scvp_core::{OutputBuffer, ScvpError, ScvpResult};
use scvp_geometry::{
    ContentCoverage, ErpTileSelection, HeadPose, ProjectionType, SelectedTile, TileInfoTable,
    TileLayout, TileSelection, build_tile_info, convert_selected_to_region_index,
};
use scvp_hevc::nal::NalUnitType;
use scvp_hevc::sei::{
    FramePacking, OmniViewport, ProjectionSei, SEI_REGION_WISE_PACKING, SphereRotation,
};
use scvp_hevc::{
    NalScanner, OutputLayout, ParamSetRewriter, ParameterSetStore, Pps, RegionWisePacking,
    RwpkCodec, ScanMode, ScanReport, SeiMessage, SliceOverrides, SliceType, Sps,
};

use crate::config::{ScvpConfig, UsageMode};
use crate::engine::{HeaderPlan, SlicePlacement, SliceTarget, TileMergeEngine, locate_source};
use crate::packing::{MergeSolution, TierTiles, generate_rwpk};

macro_rules! session_log {
    ($session:expr, $level:ident, $($arg:tt)+) => {
        $session.emit(Level::$level, format_args!($($arg)+))
    };
}

// ============================================================
// 输入与输出
// ============================================================

/// 一帧合并输入
#[derive(Debug, Clone, Copy)]
pub struct MergeInput<'a> {
    /// 高分辨率层的一个访问单元
    pub high: &'a [u8],
    /// 低分辨率层的一个访问单元
    pub low: Option<&'a [u8]>,
}

/// 一帧合并结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutput {
    /// 合并后的 Annex B 访问单元
    pub bitstream: Vec<u8>,
    /// 本帧的区域打包信息
    pub rwpk: RegionWisePacking,
    /// 首条带的类型
    pub slice_type: Option<SliceType>,
}

/// 多路拼接结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StitchOutput {
    /// 拼接后的 Annex B 访问单元
    pub bitstream: Vec<u8>,
    /// 首条带的类型
    pub slice_type: Option<SliceType>,
    /// 首个码流的首条带是否为 IDR
    pub is_idr: bool,
    /// slice_pic_order_cnt_lsb, IDR 为 0
    pub pts: u32,
}

/// 输出图像参数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PicInfo {
    /// CTB 边长 (像素)
    pub ctb_size: u32,
    /// 图像宽度 (像素)
    pub width: u32,
    /// 图像高度 (像素)
    pub height: u32,
    /// tile 列数
    pub tile_columns: u32,
    /// tile 行数
    pub tile_rows: u32,
    /// tile 是否均匀划分
    pub uniform_spacing: bool,
}

/// 逐 NAL 解析的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedNal {
    /// NAL 类型
    pub nal_type: NalUnitType,
    /// 起始码长度 (3 或 4)
    pub start_code_size: usize,
    /// 不含起始码的 NAL 长度
    pub payload_length: usize,
    /// 条带头长度 (转义后字节)
    pub slice_header_len: Option<usize>,
    /// SEI NAL 中首条消息的 payloadType
    pub sei_payload_type: Option<u32>,
    /// 本次消耗的字节数
    pub consumed: usize,
    /// 客户端模式下解出的区域打包信息
    pub rwpk: Option<RegionWisePacking>,
}

/// 参数集就绪状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    /// 已解析到 VPS
    pub vps: bool,
    /// 已解析到 SPS
    pub sps: bool,
    /// 已解析到 PPS
    pub pps: bool,
}

impl Readiness {
    /// 三种参数集均已解析
    pub fn is_ready(&self) -> bool {
        self.vps && self.sps && self.pps
    }
}

/// 随参数集输出的 SEI
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeiSettings {
    /// 投影类型 (等距柱状或立方体)
    pub projection: Option<ProjectionSei>,
    /// 球面旋转
    pub sphere_rotation: Option<SphereRotation>,
    /// 帧打包排列
    pub frame_packing: Option<FramePacking>,
    /// 全景视口
    pub viewport: Option<OmniViewport>,
}

impl SeiSettings {
    fn messages(&self) -> Vec<SeiMessage> {
        let mut out = Vec::new();
        if let Some(p) = self.projection {
            out.push(SeiMessage::Projection(p));
        }
        if let Some(r) = self.sphere_rotation {
            out.push(SeiMessage::SphereRotation(r));
        }
        if let Some(f) = self.frame_packing {
            out.push(SeiMessage::FramePacking(f));
        }
        if let Some(v) = &self.viewport {
            out.push(SeiMessage::Viewport(v.clone()));
        }
        out
    }
}

/// 多路拼接的网格状态
#[derive(Debug, Clone)]
struct StitchGrid {
    /// 首行各路码流的 tile 列数
    column_counts: Vec<u32>,
    /// 首列各路码流的 tile 行数
    row_counts: Vec<u32>,
    /// 每路码流各自的参数集表
    stores: Vec<ParameterSetStore>,
}

/// 初始化的中间结果, 全部成功后才写入会话
struct InitState {
    store: ParameterSetStore,
    low_store: Option<ParameterSetStore>,
    geometry: Option<Geometry>,
    stitch: Option<StitchGrid>,
}

struct Geometry {
    high: TileLayout,
    low: Option<TileLayout>,
    table: TileInfoTable,
}

/// 一帧合并的中间结果, 提交前不修改会话
struct PreparedMerge {
    output: MergeOutput,
    header: Range<usize>,
    high_store: ParameterSetStore,
    low_store: Option<ParameterSetStore>,
    layout: OutputLayout,
    grid: Option<(u32, u32)>,
}

// ============================================================
// 会话
// ============================================================

/// 拼接会话
pub struct MergeSession {
    config: ScvpConfig,
    /// 高分辨率层 (或逐 NAL 解析) 的参数集表
    store: ParameterSetStore,
    low_store: Option<ParameterSetStore>,
    stitch: Option<StitchGrid>,
    high_layout: Option<TileLayout>,
    low_layout: Option<TileLayout>,
    tile_info: Option<Arc<TileInfoTable>>,
    selection: Option<Box<dyn TileSelection>>,
    logger: Option<Arc<dyn Log>>,
    engine: TileMergeEngine,
    sei: SeiSettings,
    rwpk: Option<RegionWisePacking>,
    /// 最近一次写出的参数集与 SEI
    header: Vec<u8>,
    /// 最近一次写出参数集时的输出划分
    written_layout: Option<OutputLayout>,
    readiness: Readiness,
    frame_index: u32,
    initialized: bool,
}

impl fmt::Debug for MergeSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergeSession")
            .field("mode", &self.config.mode)
            .field("initialized", &self.initialized)
            .field("frame_index", &self.frame_index)
            .field("has_selection", &self.selection.is_some())
            .finish_non_exhaustive()
    }
}

impl Clone for MergeSession {
    /// 深拷贝参数集表与网格, 共享 tile 信息表, 不复制选块算法
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            store: self.store.clone(),
            low_store: self.low_store.clone(),
            stitch: self.stitch.clone(),
            high_layout: self.high_layout,
            low_layout: self.low_layout,
            tile_info: self.tile_info.clone(),
            selection: None,
            logger: self.logger.clone(),
            engine: self.engine,
            sei: self.sei.clone(),
            rwpk: self.rwpk.clone(),
            header: self.header.clone(),
            written_layout: self.written_layout.clone(),
            readiness: self.readiness,
            frame_index: self.frame_index,
            initialized: self.initialized,
        }
    }
}

impl MergeSession {
    /// 校验配置并创建会话
    pub fn new(config: ScvpConfig) -> ScvpResult<Self> {
        config.validate()?;
        Ok(Self {
            engine: TileMergeEngine::new(config.aud),
            config,
            store: ParameterSetStore::new(),
            low_store: None,
            stitch: None,
            high_layout: None,
            low_layout: None,
            tile_info: None,
            selection: None,
            logger: None,
            sei: SeiSettings::default(),
            rwpk: None,
            header: Vec::new(),
            written_layout: None,
            readiness: Readiness::default(),
            frame_index: 0,
            initialized: false,
        })
    }

    /// 使用注入的日志器, 缺省时写入全局 `log` 日志器
    pub fn with_logger(mut self, logger: Arc<dyn Log>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// 注入视口选块算法, 需在 [`init`](Self::init) 之前调用
    pub fn set_tile_selection(&mut self, selection: Box<dyn TileSelection>) {
        self.selection = Some(selection);
    }

    fn emit(&self, level: Level, args: fmt::Arguments<'_>) {
        let record = Record::builder()
            .args(args)
            .level(level)
            .target(module_path!())
            .module_path_static(Some(module_path!()))
            .file_static(Some(file!()))
            .build();
        match &self.logger {
            Some(logger) => {
                if logger.enabled(record.metadata()) {
                    logger.log(&record);
                }
            }
            None => {
                if level <= log::max_level() {
                    log::logger().log(&record);
                }
            }
        }
    }

    /// 会话配置
    pub fn config(&self) -> &ScvpConfig {
        &self.config
    }

    /// 使用方式
    pub fn mode(&self) -> UsageMode {
        self.config.mode
    }

    /// 高分辨率层 (或逐 NAL 解析) 的参数集表
    pub fn store(&self) -> &ParameterSetStore {
        &self.store
    }

    /// 是否已成功初始化
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    // ========================================================
    // 初始化
    // ========================================================

    /// 按使用方式初始化.
    ///
    /// - `ViewportOnly`: 建立 tile 信息表并初始化选块算法, 不需要码流;
    /// - `MergeAndViewport`: `streams[0]` 为高分辨率层, 配置了低分辨率层时
    ///   `streams[1]` 为低分辨率层, 各解析一个访问单元;
    /// - `StitchOnly`: 每路码流解析到第一个条带, 得到各自的 tile 网格;
    /// - 逐 NAL 解析的两种方式不做任何事.
    ///
    /// 失败时会话保持调用前的状态.
    pub fn init(&mut self, streams: &[&[u8]]) -> ScvpResult<()> {
        let mut state = InitState {
            store: ParameterSetStore::new(),
            low_store: None,
            geometry: None,
            stitch: None,
        };
        match self.config.mode {
            UsageMode::ViewportOnly => state.geometry = Some(self.build_geometry()?),
            UsageMode::MergeAndViewport => {
                let (store, low_store) = self.scan_tiers(streams)?;
                state.store = store;
                state.low_store = low_store;
                state.geometry = Some(self.build_geometry()?);
            }
            UsageMode::StitchOnly => state.stitch = Some(self.scan_stitch(streams)?),
            UsageMode::ParseOneNal | UsageMode::ParserForClient => {}
        }
        if state.geometry.is_some() {
            self.init_selection()?;
        }

        self.reset_state();
        self.store = state.store;
        self.low_store = state.low_store;
        self.stitch = state.stitch;
        if let Some(geometry) = state.geometry {
            self.high_layout = Some(geometry.high);
            self.low_layout = geometry.low;
            self.tile_info = Some(Arc::new(geometry.table));
        }
        self.initialized = true;
        session_log!(self, Debug, "会话初始化完成: {:?}", self.config.mode);
        Ok(())
    }

    fn scan_tiers(&self, streams: &[&[u8]]) -> ScvpResult<(ParameterSetStore, Option<ParameterSetStore>)> {
        let high_cfg = self
            .config
            .high
            .ok_or_else(|| ScvpError::InvalidArgument("缺少高分辨率层参数".into()))?;
        let high = streams.first().ok_or(ScvpError::EmptyInput("高分辨率码流"))?;
        let scanner = NalScanner::new(ScanMode::ParseAllNals);

        let mut store = ParameterSetStore::new();
        let report = scanner.scan(&mut store, high)?;
        check_tile_grid("高分辨率", &report, high_cfg.tile_columns, high_cfg.tile_rows)?;
        let (high_sps, high_pps) = store.active()?;
        if high_sps.width != high_cfg.frame_width || high_sps.height != high_cfg.frame_height {
            session_log!(
                self,
                Warn,
                "高分辨率码流尺寸 {}x{} 与配置 {}x{} 不一致",
                high_sps.width,
                high_sps.height,
                high_cfg.frame_width,
                high_cfg.frame_height
            );
        }

        let low_store = match self.config.low {
            Some(low_cfg) => {
                let low = streams.get(1).ok_or(ScvpError::EmptyInput("低分辨率码流"))?;
                let mut low_store = ParameterSetStore::new();
                let report = scanner.scan(&mut low_store, low)?;
                check_tile_grid("低分辨率", &report, low_cfg.tile_columns, low_cfg.tile_rows)?;
                let (low_sps, low_pps) = low_store.active()?;
                check_compatible(&high_sps, &high_pps, &low_sps, &low_pps)?;
                Some(low_store)
            }
            None => None,
        };
        Ok((store, low_store))
    }

    fn build_geometry(&self) -> ScvpResult<Geometry> {
        let high_cfg = self
            .config
            .high
            .ok_or_else(|| ScvpError::InvalidArgument("缺少高分辨率层参数".into()))?;
        let high = high_cfg.tile_layout()?;
        let low = self.config.low.map(|t| t.tile_layout()).transpose()?;
        let faces = self.config.faces()?;
        let table = build_tile_info(self.config.projection, &faces, &high, low.as_ref())?;
        Ok(Geometry { high, low, table })
    }

    /// 初始化注入的选块算法, 没有注入时按投影选择内置实现
    fn init_selection(&mut self) -> ScvpResult<()> {
        if self.selection.is_none() {
            if let Some(plugin) = &self.config.plugin {
                return Err(ScvpError::PluginLoad(format!(
                    "配置了选块插件 {}, 但没有注入对应的实现",
                    plugin.library.display()
                )));
            }
        }
        let params = self.config.viewport_params()?;
        let pose = HeadPose::new(self.config.viewport.yaw, self.config.viewport.pitch);
        match self.selection.as_mut() {
            Some(selection) => {
                selection.initialize(&params)?;
                selection.set_viewport_info(&pose)?;
            }
            None if self.config.projection == ProjectionType::Equirect => {
                let mut selection = ErpTileSelection::new();
                selection.initialize(&params)?;
                selection.set_viewport_info(&pose)?;
                self.selection = Some(Box::new(selection));
            }
            None => {
                session_log!(self, Warn, "{:?} 投影没有可用的选块算法", self.config.projection);
            }
        }
        Ok(())
    }

    fn scan_stitch(&self, streams: &[&[u8]]) -> ScvpResult<StitchGrid> {
        let cfg = self
            .config
            .stitch
            .ok_or_else(|| ScvpError::InvalidArgument("拼接模式缺少 stitch 参数".into()))?;
        let expected = cfg.stream_count()?;
        if streams.len() != expected {
            return Err(ScvpError::InvalidArgument(format!(
                "需要 {} 路码流, 实际 {} 路",
                expected,
                streams.len()
            )));
        }
        let scanner = NalScanner::new(self.config.mode.scan_mode());
        let mut stores = Vec::with_capacity(streams.len());
        let mut grids = Vec::with_capacity(streams.len());
        for (i, data) in streams.iter().enumerate() {
            if data.is_empty() {
                return Err(ScvpError::EmptyInput("拼接码流"));
            }
            let mut store = ParameterSetStore::new();
            let report = scanner.scan(&mut store, data)?;
            session_log!(
                self,
                Debug,
                "码流 {}: tile 网格 {}x{}",
                i,
                report.tile_columns,
                report.tile_rows
            );
            grids.push((report.tile_columns, report.tile_rows));
            stores.push(store);
        }

        let wide = cfg.streams_wide as usize;
        let column_counts = grids[..wide].iter().map(|g| g.0).collect();
        let row_counts = grids.iter().step_by(wide).map(|g| g.1).collect();
        Ok(StitchGrid {
            column_counts,
            row_counts,
            stores,
        })
    }

    /// 释放会话状态, 可重复调用, 初始化失败后调用也安全
    pub fn uninit(&mut self) {
        if let Some(selection) = self.selection.as_mut() {
            selection.uninit();
        }
        self.reset_state();
    }

    fn reset_state(&mut self) {
        self.store = ParameterSetStore::new();
        self.low_store = None;
        self.stitch = None;
        self.high_layout = None;
        self.low_layout = None;
        self.tile_info = None;
        self.rwpk = None;
        self.header.clear();
        self.written_layout = None;
        self.readiness = Readiness::default();
        self.frame_index = 0;
        self.initialized = false;
    }

    // ========================================================
    // 视口
    // ========================================================

    /// 计算视口需要的 tile, 并解析出每个 tile 在码流中的序号
    pub fn compute_viewport_tiles(&mut self, pose: &HeadPose) -> ScvpResult<Vec<SelectedTile>> {
        let table = self
            .tile_info
            .clone()
            .ok_or_else(|| ScvpError::NoValue("会话尚未初始化".into()))?;
        let Some(selection) = self.selection.as_mut() else {
            return Err(match &self.config.plugin {
                Some(plugin) => ScvpError::PluginLoad(format!(
                    "选块插件 {} 未注入",
                    plugin.library.display()
                )),
                None => ScvpError::NoValue("没有可用的选块算法".into()),
            });
        };
        selection.set_viewport_info(pose)?;
        let mut tiles = selection.tiles_in_viewport()?;
        convert_selected_to_region_index(&mut tiles, &table.high)?;
        session_log!(
            self,
            Trace,
            "视口 yaw={} pitch={}: {} 个 tile",
            pose.yaw,
            pose.pitch,
            tiles.len()
        );
        Ok(tiles)
    }

    /// 最近一次选块的覆盖范围
    pub fn content_coverage(&self) -> Option<ContentCoverage> {
        self.selection.as_ref()?.content_coverage()
    }

    /// 共享的 tile 信息表
    pub fn tile_info(&self) -> Option<&Arc<TileInfoTable>> {
        self.tile_info.as_ref()
    }

    /// 高分辨率层的 tile 网格
    pub fn high_layout(&self) -> Option<&TileLayout> {
        self.high_layout.as_ref()
    }

    /// 低分辨率层的 tile 网格
    pub fn low_layout(&self) -> Option<&TileLayout> {
        self.low_layout.as_ref()
    }

    // ========================================================
    // 高低分辨率合并
    // ========================================================

    /// 合并一帧
    pub fn merge(&mut self, input: MergeInput<'_>, tiles: &[SelectedTile]) -> ScvpResult<MergeOutput> {
        let prepared = self.prepare_merge(input, tiles)?;
        Ok(self.commit_merge(prepared))
    }

    /// 合并一帧并写入调用方缓冲区, 返回写入的字节数
    ///
    /// 缓冲区不足时返回 `BufferOverflow`, 会话状态不变.
    pub fn merge_into(
        &mut self,
        input: MergeInput<'_>,
        tiles: &[SelectedTile],
        out: &mut [u8],
    ) -> ScvpResult<usize> {
        let prepared = self.prepare_merge(input, tiles)?;
        let mut buf = OutputBuffer::new(out);
        buf.put(&prepared.output.bitstream)?;
        let written = buf.len();
        self.commit_merge(prepared);
        Ok(written)
    }

    fn prepare_merge(&self, input: MergeInput<'_>, tiles: &[SelectedTile]) -> ScvpResult<PreparedMerge> {
        if self.config.mode != UsageMode::MergeAndViewport {
            return Err(ScvpError::Unsupported(format!(
                "{:?} 模式不支持高低分辨率合并",
                self.config.mode
            )));
        }
        let (Some(high_layout), Some(table)) = (self.high_layout, self.tile_info.as_ref()) else {
            return Err(ScvpError::NoValue("会话尚未初始化".into()));
        };

        let mut resolved = tiles.to_vec();
        convert_selected_to_region_index(&mut resolved, &table.high)?;
        let mut indices: Vec<usize> = resolved.iter().filter_map(|t| t.region_index).collect();
        // 列优先
        indices.sort_by_key(|&i| high_layout.position(i));
        indices.dedup();
        if indices.is_empty() && self.low_layout.is_none() {
            return Err(ScvpError::EmptyInput("选中的 tile"));
        }

        let scanner = NalScanner::new(ScanMode::MergeAndViewport);
        let mut high_store = self.store.clone();
        let high_report = scanner.scan(&mut high_store, input.high)?;
        check_slice_count("高分辨率", &high_report, high_layout.original_count())?;
        let (high_sps, high_pps) = high_store.active()?;
        let ctb_size = high_sps.ctb_size();

        let mut low_store = self.low_store.clone();
        let low_report = match (self.low_layout, input.low, low_store.as_mut()) {
            (Some(layout), Some(data), Some(store)) => {
                let report = scanner.scan(store, data)?;
                check_slice_count("低分辨率", &report, layout.original_count())?;
                let (low_sps, low_pps) = store.active()?;
                check_compatible(&high_sps, &high_pps, &low_sps, &low_pps)?;
                Some(report)
            }
            (Some(_), _, _) => return Err(ScvpError::EmptyInput("低分辨率帧")),
            (None, _, _) => None,
        };

        let grid = full_rectangle(&indices, &high_layout);
        let high_tiles = TierTiles {
            count: indices.len() as u32,
            tile_width: high_layout.tile_width,
            tile_height: high_layout.tile_height,
            grid,
        };
        let low_tiles = self.low_layout.map(|l| TierTiles {
            count: l.original_count() as u32,
            tile_width: l.tile_width,
            tile_height: l.tile_height,
            grid: None,
        });
        let solution = MergeSolution::compute(
            (high_tiles.count > 0).then_some(&high_tiles),
            low_tiles.as_ref(),
            ctb_size,
        )?;

        let header_store = low_store.as_ref().unwrap_or(&high_store);
        let (_, output_pps) = header_store.active()?;
        let layout = solution.output_layout(Some(u32::from(output_pps.pps_id)));

        // 参数集跟随输出层码流, 输出划分变化时也需重写
        let header_report = low_report.as_ref().unwrap_or(&high_report);
        let carries_sps = header_report
            .nal_units
            .iter()
            .any(|n| n.nal_type() == NalUnitType::Sps);
        let emit_header = carries_sps || self.written_layout.as_ref() != Some(&layout);

        let positions: Vec<(u32, u32)> = indices
            .iter()
            .map(|&i| {
                let (col, row) = high_layout.position(i);
                (col * high_layout.tile_width, row * high_layout.tile_height)
            })
            .collect();
        let rwpk = generate_rwpk(
            &solution,
            (!positions.is_empty()).then_some((&high_layout, positions.as_slice())),
            self.low_layout.as_ref(),
            self.frame_index,
        )?;

        let mut seis = Vec::new();
        if self.config.embed_rwpk {
            seis.push(SeiMessage::RegionWisePacking(rwpk.clone()));
        }
        if emit_header {
            seis.extend(self.sei.messages());
        }

        let merged = {
            let mut placements = Vec::with_capacity(indices.len() + solution.lr_addresses.len());
            for (&idx, &address) in indices.iter().zip(&solution.hr_addresses) {
                placements.push(SlicePlacement {
                    store: &high_store,
                    slice: &high_report.slices[idx],
                    target: SliceTarget::Address(address),
                });
            }
            if let (Some(report), Some(store)) = (&low_report, low_store.as_ref()) {
                for (slice, &address) in report.slices.iter().zip(&solution.lr_addresses) {
                    placements.push(SlicePlacement {
                        store,
                        slice,
                        target: SliceTarget::Address(address),
                    });
                }
            }
            let plan = HeaderPlan {
                store: low_store.as_ref().unwrap_or(&high_store),
                width: solution.width,
                height: solution.height,
                keep_vui: self.config.vui,
            };
            self.engine
                .merge(&layout, emit_header.then_some(&plan), &seis, &placements)?
        };

        Ok(PreparedMerge {
            output: MergeOutput {
                bitstream: merged.bitstream,
                rwpk,
                slice_type: merged.slice_type,
            },
            header: if emit_header { merged.header } else { 0..0 },
            high_store,
            low_store,
            layout,
            grid,
        })
    }

    fn commit_merge(&mut self, prepared: PreparedMerge) -> MergeOutput {
        let PreparedMerge {
            output,
            header,
            high_store,
            low_store,
            layout,
            grid,
        } = prepared;
        if !header.is_empty() {
            self.header = output.bitstream[header].to_vec();
            self.written_layout = Some(layout);
        }
        if let Some((rows, cols)) = grid {
            let selected = self.high_layout.as_mut().map(|l| l.select(cols, rows));
            if matches!(selected, Some(Err(_))) {
                session_log!(self, Warn, "选中区域 {}x{} 超出原始网格", cols, rows);
            }
        }
        self.store = high_store;
        self.low_store = low_store;
        self.rwpk = Some(output.rwpk.clone());
        self.frame_index = self.frame_index.wrapping_add(1);
        session_log!(
            self,
            Trace,
            "第 {} 帧合并完成, {} 字节",
            self.frame_index,
            output.bitstream.len()
        );
        output
    }

    // ========================================================
    // 多路拼接
    // ========================================================

    /// 把每路码流的一个访问单元拼成一帧, `streams` 按光栅顺序排列
    pub fn stitch_streams(&mut self, streams: &[&[u8]]) -> ScvpResult<StitchOutput> {
        let cfg = self
            .config
            .stitch
            .ok_or_else(|| ScvpError::Unsupported(format!("{:?} 模式不支持多路拼接", self.config.mode)))?;
        let grid = self
            .stitch
            .as_ref()
            .ok_or_else(|| ScvpError::NoValue("会话尚未初始化".into()))?;
        if streams.len() != grid.stores.len() {
            return Err(ScvpError::InvalidArgument(format!(
                "需要 {} 路码流, 实际 {} 路",
                grid.stores.len(),
                streams.len()
            )));
        }

        let scanner = NalScanner::new(ScanMode::ParseAllNals);
        let mut stores = grid.stores.clone();
        let mut reports = Vec::with_capacity(streams.len());
        for (store, data) in stores.iter_mut().zip(streams) {
            reports.push(scanner.scan(store, data)?);
        }
        for store in &stores[1..] {
            let (sps, pps) = store.active()?;
            let (first_sps, first_pps) = stores[0].active()?;
            check_compatible(&first_sps, &first_pps, &sps, &pps)?;
        }

        let column_widths = stream_tile_sizes(&stores, 0..grid.column_counts.len(), true)?;
        let row_heights = stream_tile_sizes(
            &stores,
            (0..grid.row_counts.len()).map(|r| r * grid.column_counts.len()),
            false,
        )?;
        let (first_sps, first_pps) = stores[0].active()?;
        let ctb = first_sps.ctb_size();
        let width_ctbs: u32 = column_widths.iter().sum();
        let height_ctbs: u32 = row_heights.iter().sum();
        if cfg.frame_width.div_ceil(ctb) != width_ctbs || cfg.frame_height.div_ceil(ctb) != height_ctbs {
            return Err(ScvpError::InvalidArgument(format!(
                "输出尺寸 {}x{} 与码流网格 {}x{} CTB 不符",
                cfg.frame_width, cfg.frame_height, width_ctbs, height_ctbs
            )));
        }
        let layout = OutputLayout {
            column_widths,
            row_heights,
            pps_id: Some(u32::from(first_pps.pps_id)),
        };

        let first_report = &reports[0];
        let carries_sps = first_report
            .nal_units
            .iter()
            .any(|n| n.nal_type() == NalUnitType::Sps);
        let emit_header = carries_sps || self.written_layout.as_ref() != Some(&layout);

        let total_cols = layout.column_widths.len() as u32;
        let total_rows = layout.row_heights.len() as u32;
        let mut placements = Vec::with_capacity(layout.tile_count());
        for row in 0..total_rows {
            for col in 0..total_cols {
                let (stream, tile) = locate_source(row, col, &grid.column_counts, &grid.row_counts)
                    .ok_or_else(|| ScvpError::InvalidArgument(format!("tile ({}, {}) 没有来源", row, col)))?;
                let slice = reports
                    .get(stream)
                    .and_then(|r| r.slices.get(tile))
                    .ok_or_else(|| {
                        ScvpError::InvalidData(format!("码流 {} 缺少第 {} 个 tile 的条带", stream, tile))
                    })?;
                placements.push(SlicePlacement {
                    store: &stores[stream],
                    slice,
                    target: SliceTarget::Tile((row * total_cols + col) as usize),
                });
            }
        }
        let plan = HeaderPlan {
            store: &stores[0],
            width: cfg.frame_width,
            height: cfg.frame_height,
            keep_vui: self.config.vui,
        };
        let seis = if emit_header { self.sei.messages() } else { Vec::new() };
        let merged = self
            .engine
            .merge(&layout, emit_header.then_some(&plan), &seis, &placements)?;

        let is_idr = first_report.is_idr();
        let output = StitchOutput {
            slice_type: merged.slice_type,
            is_idr,
            pts: if is_idr { 0 } else { first_report.pic_order_cnt_lsb },
            bitstream: merged.bitstream,
        };
        drop(placements);
        drop(reports);

        if emit_header {
            self.header = output.bitstream[merged.header].to_vec();
            self.written_layout = Some(layout);
        }
        if let Some(grid) = self.stitch.as_mut() {
            grid.stores = stores;
        }
        self.frame_index = self.frame_index.wrapping_add(1);
        Ok(output)
    }

    // ========================================================
    // 逐 NAL 解析
    // ========================================================

    /// 解析输入中的第一个 NAL, 参数集在多次调用之间累积
    ///
    /// 参数集未就绪时遇到条带返回 `NoValue`. 客户端模式下区域打包 SEI 会被解码并保存.
    pub fn parse_nal(&mut self, data: &[u8]) -> ScvpResult<ParsedNal> {
        let scanner = NalScanner::new(ScanMode::ParseOneNal);
        let mut staged = self.store.clone();
        let report = scanner.scan(&mut staged, data)?;
        let nal = *report
            .first_nal()
            .ok_or_else(|| ScvpError::InvalidData("输入中没有 NAL".into()))?;

        let rwpk = if self.config.mode == UsageMode::ParserForClient
            && nal.sei_payload_type == Some(SEI_REGION_WISE_PACKING)
        {
            Some(RwpkCodec::decode_nal(nal.bytes())?)
        } else {
            None
        };

        self.readiness = Readiness {
            vps: staged.last_vps().is_some(),
            sps: staged.last_sps().is_some(),
            pps: staged.last_pps().is_some(),
        };
        self.store = staged;
        if let Some(r) = &rwpk {
            self.rwpk = Some(r.clone());
        }
        Ok(ParsedNal {
            nal_type: nal.nal_type(),
            start_code_size: nal.start_code_size,
            payload_length: nal.payload_length,
            slice_header_len: nal.slice_header_len,
            sei_payload_type: nal.sei_payload_type,
            consumed: report.consumed,
            rwpk,
        })
    }

    /// 逐 NAL 解析时各参数集的就绪状态
    pub fn readiness(&self) -> Readiness {
        self.readiness
    }

    // ========================================================
    // 查询与工具
    // ========================================================

    /// 生效参数集描述的图像参数
    pub fn pic_info(&self) -> ScvpResult<PicInfo> {
        let (sps, pps) = self.store.active()?;
        Ok(PicInfo {
            ctb_size: sps.ctb_size(),
            width: sps.width,
            height: sps.height,
            tile_columns: pps.tiles.columns,
            tile_rows: pps.tiles.rows,
            uniform_spacing: pps.tiles.uniform_spacing,
        })
    }

    /// 最近一次写出的参数集与 SEI
    pub fn bitstream_header(&self) -> &[u8] {
        &self.header
    }

    /// 最近一次的区域打包信息
    pub fn rwpk(&self) -> Option<&RegionWisePacking> {
        self.rwpk.as_ref()
    }

    /// 从 SEI NAL 解码区域打包信息并保存
    pub fn decode_rwpk(&mut self, data: &[u8]) -> ScvpResult<RegionWisePacking> {
        let rwpk = RwpkCodec::decode_nal(data)?;
        self.rwpk = Some(rwpk.clone());
        Ok(rwpk)
    }

    /// 以新尺寸生成 SPS
    pub fn generate_sps(&self, width: u32, height: u32) -> ScvpResult<Vec<u8>> {
        ParamSetRewriter::new(&self.store).rewrite_sps_with_vui(width, height, self.config.vui)
    }

    /// 以显式 tile 划分 (CTB) 生成 PPS
    pub fn generate_pps(&self, column_widths: &[u32], row_heights: &[u32]) -> ScvpResult<Vec<u8>> {
        ParamSetRewriter::new(&self.store).rewrite_pps(column_widths, row_heights)
    }

    /// 改写 `data` 中第一个条带的头部, 返回完整条带 NAL
    ///
    /// `data` 携带的参数集只进入临时副本, 会话的参数集表不变.
    pub fn generate_slice_header(&self, data: &[u8], overrides: &SliceOverrides) -> ScvpResult<Vec<u8>> {
        let mut snapshot = self.store.clone();
        let report = NalScanner::new(ScanMode::ParseAllNals).scan(&mut snapshot, data)?;
        let slice = report
            .slices
            .first()
            .ok_or_else(|| ScvpError::NoValue("输入中没有条带".into()))?;
        ParamSetRewriter::new(&snapshot).rewrite_slice(slice, overrides)
    }

    // ========================================================
    // SEI
    // ========================================================

    /// 当前的 SEI 设置
    pub fn sei_settings(&self) -> &SeiSettings {
        &self.sei
    }

    /// 投影类型 SEI, `None` 关闭
    pub fn set_projection_sei(&mut self, sei: Option<ProjectionSei>) {
        self.sei.projection = sei;
    }

    /// 球面旋转 SEI, `None` 关闭
    pub fn set_sphere_rotation_sei(&mut self, sei: Option<SphereRotation>) {
        self.sei.sphere_rotation = sei;
    }

    /// 帧打包 SEI, `None` 关闭
    pub fn set_frame_packing_sei(&mut self, sei: Option<FramePacking>) {
        self.sei.frame_packing = sei;
    }

    /// 全景视口 SEI, `None` 关闭
    pub fn set_viewport_sei(&mut self, sei: Option<OmniViewport>) {
        self.sei.viewport = sei;
    }

    /// 把开启的 SEI (含最近的区域打包信息) 写入调用方缓冲区, 返回写入的字节数
    pub fn write_sei_into(&self, out: &mut [u8]) -> ScvpResult<usize> {
        let mut messages = Vec::new();
        if let Some(rwpk) = &self.rwpk {
            messages.push(SeiMessage::RegionWisePacking(rwpk.clone()));
        }
        messages.extend(self.sei.messages());
        let mut buf = OutputBuffer::new(out);
        for msg in &messages {
            buf.put(&msg.to_nal()?)?;
        }
        Ok(buf.len())
    }
}

// ============================================================
// 辅助函数
// ============================================================

fn check_tile_grid(tier: &str, report: &ScanReport<'_>, columns: u32, rows: u32) -> ScvpResult<()> {
    if report.tile_columns != columns || report.tile_rows != rows {
        return Err(ScvpError::InvalidArgument(format!(
            "{}码流 tile 网格 {}x{} 与配置 {}x{} 不一致",
            tier, report.tile_columns, report.tile_rows, columns, rows
        )));
    }
    Ok(())
}

fn check_slice_count(tier: &str, report: &ScanReport<'_>, expected: usize) -> ScvpResult<()> {
    if report.slices.len() != expected {
        return Err(ScvpError::InvalidData(format!(
            "{}帧有 {} 个条带, 应为每 tile 一个共 {} 个",
            tier,
            report.slices.len(),
            expected
        )));
    }
    Ok(())
}

/// 两组参数集的条带头语法是否一致.
///
/// 所有输出条带共用一组参数集解析, 影响条带头语法的字段必须相同.
fn check_compatible(a_sps: &Sps, a_pps: &Pps, b_sps: &Sps, b_pps: &Pps) -> ScvpResult<()> {
    if a_sps.ctb_size() != b_sps.ctb_size() {
        return Err(ScvpError::Unsupported(format!(
            "CTB 大小不一致: {} 与 {}",
            a_sps.ctb_size(),
            b_sps.ctb_size()
        )));
    }
    let same_sps = a_sps.log2_max_poc_lsb == b_sps.log2_max_poc_lsb
        && a_sps.sample_adaptive_offset == b_sps.sample_adaptive_offset
        && a_sps.temporal_mvp_enabled == b_sps.temporal_mvp_enabled
        && a_sps.short_term_rps == b_sps.short_term_rps
        && a_sps.long_term_ref_pics_present == b_sps.long_term_ref_pics_present
        && a_sps.chroma_format_idc == b_sps.chroma_format_idc;
    let same_pps = a_pps.dependent_slice_segments_enabled == b_pps.dependent_slice_segments_enabled
        && a_pps.output_flag_present == b_pps.output_flag_present
        && a_pps.num_extra_slice_header_bits == b_pps.num_extra_slice_header_bits
        && a_pps.cabac_init_present == b_pps.cabac_init_present
        && a_pps.slice_chroma_qp_offsets_present == b_pps.slice_chroma_qp_offsets_present
        && a_pps.weighted_pred == b_pps.weighted_pred
        && a_pps.weighted_bipred == b_pps.weighted_bipred
        && a_pps.entropy_coding_sync == b_pps.entropy_coding_sync
        && a_pps.deblocking_filter_override_enabled == b_pps.deblocking_filter_override_enabled
        && a_pps.lists_modification_present == b_pps.lists_modification_present
        && a_pps.slice_header_extension_present == b_pps.slice_header_extension_present;
    if !same_sps || !same_pps {
        return Err(ScvpError::Unsupported(
            "各路码流的条带头语法不一致, 无法共用参数集".into(),
        ));
    }
    Ok(())
}

/// 选中的 tile 是否构成完整矩形, 是则返回 (行, 列)
fn full_rectangle(indices: &[usize], layout: &TileLayout) -> Option<(u32, u32)> {
    if indices.is_empty() {
        return None;
    }
    let mut cols: Vec<u32> = indices.iter().map(|&i| layout.position(i).0).collect();
    let mut rows: Vec<u32> = indices.iter().map(|&i| layout.position(i).1).collect();
    cols.sort_unstable();
    cols.dedup();
    rows.sort_unstable();
    rows.dedup();
    (cols.len() * rows.len() == indices.len()).then_some((rows.len() as u32, cols.len() as u32))
}

/// 指定码流的 tile 列宽 (`columns` 为真) 或行高, 单位 CTB
fn stream_tile_sizes(
    stores: &[ParameterSetStore],
    streams: impl Iterator<Item = usize>,
    columns: bool,
) -> ScvpResult<Vec<u32>> {
    let mut sizes = Vec::new();
    for idx in streams {
        let store = stores
            .get(idx)
            .ok_or_else(|| ScvpError::InvalidArgument(format!("码流 {} 不存在", idx)))?;
        let (sps, pps) = store.active()?;
        let (widths, heights) = pps.tiles.resolve(sps.width_in_ctbs(), sps.height_in_ctbs())?;
        sizes.extend(if columns { widths } else { heights });
    }
    Ok(sizes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use scvp_core::ErrorCode;
    use scvp_hevc::builder::StreamParams;

    use crate::config::{PluginDef, StitchConfig, TierConfig};

    fn high_params() -> StreamParams {
        StreamParams {
            tile_columns: 4,
            tile_rows: 2,
            ..StreamParams::new(2048, 1024)
        }
    }

    fn low_params() -> StreamParams {
        StreamParams {
            tile_columns: 2,
            ..StreamParams::new(1024, 512)
        }
    }

    fn payloads(base: u8, n: u8) -> Vec<Vec<u8>> {
        (0..n).map(|i| vec![base + i, 0x80]).collect()
    }

    fn merge_config() -> ScvpConfig {
        ScvpConfig::merge(
            TierConfig {
                frame_width: 2048,
                frame_height: 1024,
                tile_columns: 4,
                tile_rows: 2,
            },
            Some(TierConfig {
                frame_width: 1024,
                frame_height: 512,
                tile_columns: 2,
                tile_rows: 1,
            }),
        )
    }

    fn merge_session() -> (MergeSession, Vec<u8>, Vec<u8>) {
        let high = high_params().frame(true, NalUnitType::IdrWRadl, SliceType::I, 0, &payloads(0x10, 8));
        let low = low_params().frame(true, NalUnitType::IdrWRadl, SliceType::I, 0, &payloads(0x40, 2));
        let mut session = MergeSession::new(merge_config()).unwrap();
        session.init(&[&high, &low]).unwrap();
        (session, high, low)
    }

    #[test]
    fn test_高低分辨率合并() {
        let (mut session, high, low) = merge_session();
        let tiles = [SelectedTile::new(512, 512, 0), SelectedTile::new(512, 0, 0)];
        let out = session
            .merge(MergeInput { high: &high, low: Some(&low) }, &tiles)
            .unwrap();

        assert_eq!(out.rwpk.num_regions(), 4);
        assert_eq!(out.rwpk.num_hi_regions, 2);
        assert_eq!(session.rwpk(), Some(&out.rwpk));
        assert!(!session.bitstream_header().is_empty());

        let mut store = ParameterSetStore::new();
        let report = NalScanner::new(ScanMode::ParseAllNals)
            .scan(&mut store, &out.bitstream)
            .unwrap();
        let (sps, _) = store.active().unwrap();
        assert_eq!((sps.width, sps.height), (1024, 1024));
        assert_eq!((report.tile_columns, report.tile_rows), (2, 1));
        let addresses: Vec<u32> = report.slices.iter().map(|s| s.header.segment_address).collect();
        assert_eq!(addresses, vec![0, 128, 8, 136]);

        // 条带数据原样透传, 高分辨率按列优先
        let data: Vec<&[u8]> = report.slices.iter().filter_map(|s| s.nal.slice_data()).collect();
        let expected: Vec<&[u8]> = vec![&[0x11, 0x80], &[0x15, 0x80], &[0x40, 0x80], &[0x41, 0x80]];
        assert_eq!(data, expected);
    }

    #[test]
    fn test_后续帧不重复参数集() {
        let (mut session, high, low) = merge_session();
        let tiles = [SelectedTile::new(0, 0, 0)];
        let first = session
            .merge(MergeInput { high: &high, low: Some(&low) }, &tiles)
            .unwrap();
        let header = session.bitstream_header().to_vec();
        assert!(first.bitstream.starts_with(&header));

        let high2 = high_params().frame(false, NalUnitType::TrailR, SliceType::P, 1, &payloads(0x20, 8));
        let low2 = low_params().frame(false, NalUnitType::TrailR, SliceType::P, 1, &payloads(0x50, 2));
        let second = session
            .merge(MergeInput { high: &high2, low: Some(&low2) }, &tiles)
            .unwrap();
        assert_eq!(second.slice_type, Some(SliceType::P));
        assert_eq!(session.bitstream_header(), header.as_slice());
        let units = scvp_hevc::nal::split_annex_b(&second.bitstream).unwrap();
        assert!(units.iter().all(|n| n.nal_type().is_slice()));
        assert_eq!(second.rwpk.time_stamp, 1);
    }

    #[test]
    fn test_截断输入不改变状态() {
        let (mut session, high, low) = merge_session();
        let before = session.store().clone();
        let truncated = &high[..high.len() / 2];
        let err = session.merge(MergeInput { high: truncated, low: Some(&low) }, &[SelectedTile::new(0, 0, 0)]);
        assert!(err.is_err());
        assert_eq!(session.store(), &before);
        assert!(session.rwpk().is_none());
    }

    #[test]
    fn test_输出缓冲区不足() {
        let (mut session, high, low) = merge_session();
        let tiles = [SelectedTile::new(0, 0, 0)];
        let mut small = [0u8; 16];
        let err = session.merge_into(MergeInput { high: &high, low: Some(&low) }, &tiles, &mut small);
        assert!(matches!(err, Err(ScvpError::BufferOverflow { .. })));
        assert!(session.rwpk().is_none());

        let mut big = vec![0u8; 4096];
        let n = session
            .merge_into(MergeInput { high: &high, low: Some(&low) }, &tiles, &mut big)
            .unwrap();
        assert!(n > 16);
        assert!(session.rwpk().is_some());
    }

    #[test]
    fn test_缺少低分辨率帧() {
        let (mut session, high, _) = merge_session();
        let err = session.merge(MergeInput { high: &high, low: None }, &[SelectedTile::new(0, 0, 0)]);
        assert!(matches!(err, Err(ScvpError::EmptyInput(_))));
    }

    #[test]
    fn test_视口选块() {
        let mut config = ScvpConfig::merge(
            TierConfig {
                frame_width: 3840,
                frame_height: 1920,
                tile_columns: 4,
                tile_rows: 2,
            },
            None,
        );
        config.mode = UsageMode::ViewportOnly;
        let mut session = MergeSession::new(config).unwrap();
        session.init(&[]).unwrap();
        let tiles = session.compute_viewport_tiles(&HeadPose::new(0.0, 0.0)).unwrap();
        let indices: Vec<Option<usize>> = tiles.iter().map(|t| t.region_index).collect();
        assert_eq!(indices, vec![Some(1), Some(5), Some(2), Some(6)]);
        assert!(session.content_coverage().is_some());
    }

    #[test]
    fn test_插件未注入() {
        let mut config = merge_config();
        config.mode = UsageMode::ViewportOnly;
        config.plugin = Some(PluginDef {
            library: "libviewport.so".into(),
            name: "viewport".into(),
        });
        let mut session = MergeSession::new(config).unwrap();
        let err = session.init(&[]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::DlOpen);
        assert!(!session.is_initialized());
        session.uninit();
        session.uninit();
    }

    #[test]
    fn test_初始化失败不留下部分状态() {
        let high = high_params().frame(true, NalUnitType::IdrWRadl, SliceType::I, 0, &payloads(0x10, 8));
        let low = low_params().frame(true, NalUnitType::IdrWRadl, SliceType::I, 0, &payloads(0x40, 2));
        let mut config = merge_config();
        config.plugin = Some(PluginDef {
            library: "libviewport.so".into(),
            name: "viewport".into(),
        });
        // 码流扫描成功, 选块插件缺失
        let mut session = MergeSession::new(config).unwrap();
        let err = session.init(&[&high, &low]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::DlOpen);
        assert!(!session.is_initialized());
        assert_eq!(session.store(), &ParameterSetStore::new());
        assert!(session.tile_info().is_none());
        assert!(session.high_layout().is_none());
    }

    #[test]
    fn test_重新初始化失败保留原状态() {
        let (mut session, high, low) = merge_session();
        let before = session.store().clone();
        let table = session.tile_info().cloned().unwrap();

        let err = session.init(&[&high, &high]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::BadParam);
        assert!(session.is_initialized());
        assert_eq!(session.store(), &before);
        assert!(Arc::ptr_eq(session.tile_info().unwrap(), &table));

        session.init(&[&high, &low]).unwrap();
        assert!(session.is_initialized());
    }

    #[test]
    fn test_克隆共享信息表() {
        let (session, _, _) = merge_session();
        let copy = session.clone();
        let a = session.tile_info().unwrap();
        let b = copy.tile_info().unwrap();
        assert!(Arc::ptr_eq(a, b));
        assert_eq!(copy.store(), session.store());
        assert!(format!("{:?}", copy).contains("has_selection: false"));
    }

    #[test]
    fn test_多路拼接() {
        let params = StreamParams::new(256, 256);
        let left = params.frame(true, NalUnitType::IdrWRadl, SliceType::I, 0, &[vec![0x61, 0x80]]);
        let right = params.frame(true, NalUnitType::IdrWRadl, SliceType::I, 0, &[vec![0x62, 0x80]]);
        let mut session = MergeSession::new(ScvpConfig::stitch(StitchConfig {
            frame_width: 512,
            frame_height: 256,
            streams_wide: 2,
            streams_high: 1,
            uniform_spacing: true,
        }))
        .unwrap();
        session.init(&[&left, &right]).unwrap();
        let out = session.stitch_streams(&[&left, &right]).unwrap();
        assert!(out.is_idr);
        assert_eq!(out.pts, 0);
        assert_eq!(out.slice_type, Some(SliceType::I));

        let mut store = ParameterSetStore::new();
        let report = NalScanner::new(ScanMode::ParseAllNals)
            .scan(&mut store, &out.bitstream)
            .unwrap();
        assert_eq!((report.tile_columns, report.tile_rows), (2, 1));
        assert_eq!(report.slices[1].nal.slice_data(), Some(&[0x62, 0x80][..]));

        let next_left = params.frame(false, NalUnitType::TrailR, SliceType::P, 3, &[vec![0x71, 0x80]]);
        let next_right = params.frame(false, NalUnitType::TrailR, SliceType::P, 3, &[vec![0x72, 0x80]]);
        let out = session.stitch_streams(&[&next_left, &next_right]).unwrap();
        assert!(!out.is_idr);
        assert_eq!(out.pts, 3);

        assert!(session.stitch_streams(&[&next_left]).is_err());
    }

    #[test]
    fn test_逐_nal_解析() {
        let params = StreamParams::new(256, 256);
        let slice = params.frame(false, NalUnitType::IdrWRadl, SliceType::I, 0, &[vec![0x80]]);
        let mut config = ScvpConfig::default();
        config.mode = UsageMode::ParseOneNal;
        let mut session = MergeSession::new(config).unwrap();
        session.init(&[]).unwrap();

        let err = session.parse_nal(&slice).unwrap_err();
        assert_eq!(err.code(), ErrorCode::NoValue);

        let data = params.parameter_sets();
        let mut offset = 0;
        while !session.readiness().is_ready() {
            let nal = session.parse_nal(&data[offset..]).unwrap();
            offset += nal.consumed;
        }
        let nal = session.parse_nal(&slice).unwrap();
        assert!(nal.slice_header_len.is_some());
        assert_eq!(session.pic_info().unwrap().width, 256);
    }

    #[test]
    fn test_客户端解析区域打包() {
        let mut config = ScvpConfig::default();
        config.mode = UsageMode::ParserForClient;
        let mut session = MergeSession::new(config).unwrap();
        session.init(&[]).unwrap();

        let rwpk = RegionWisePacking {
            proj_pic_width: 2048,
            proj_pic_height: 1024,
            packed_pic_width: 1024,
            packed_pic_height: 512,
            regions: vec![Default::default()],
            num_hi_regions: 1,
            ..RegionWisePacking::default()
        };
        let nal = RwpkCodec::encode_nal(&rwpk).unwrap();
        let parsed = session.parse_nal(&nal).unwrap();
        assert_eq!(parsed.sei_payload_type, Some(SEI_REGION_WISE_PACKING));
        assert_eq!(parsed.rwpk.as_ref(), Some(&rwpk));
        assert_eq!(session.rwpk(), Some(&rwpk));
        assert_eq!(session.decode_rwpk(&nal).unwrap(), rwpk);
    }

    #[test]
    fn test_生成条带头不修改参数集表() {
        let params = StreamParams::new(256, 256);
        let data = params.frame(true, NalUnitType::IdrWRadl, SliceType::I, 0, &[vec![0x80]]);
        let mut config = ScvpConfig::default();
        config.mode = UsageMode::ParseOneNal;
        let session = MergeSession::new(config).unwrap();
        let overrides = SliceOverrides {
            first_slice_segment_in_pic: true,
            segment_address: 0,
            pic_size_in_ctbs: 16,
            pps_id: None,
            tiles_or_wpp_enabled: false,
        };
        let nal = session.generate_slice_header(&data, &overrides).unwrap();
        assert!(!nal.is_empty());
        assert_eq!(session.store(), &ParameterSetStore::new());
        assert!(session.generate_sps(512, 256).is_err());
    }

    #[test]
    fn test_sei_写入缓冲区() {
        let mut config = ScvpConfig::default();
        config.mode = UsageMode::ParseOneNal;
        let mut session = MergeSession::new(config).unwrap();
        session.set_projection_sei(Some(ProjectionSei::Cubemap));
        session.set_sphere_rotation_sei(Some(SphereRotation::default()));
        let mut buf = [0u8; 256];
        let n = session.write_sei_into(&mut buf).unwrap();
        assert!(n > 0);
        let units = scvp_hevc::nal::split_annex_b(&buf[..n]).unwrap();
        assert_eq!(units.len(), 2);
        let mut tiny = [0u8; 4];
        assert!(session.write_sei_into(&mut tiny).is_err());
    }

    struct Capture(Mutex<Vec<String>>);

    impl Log for Capture {
        fn enabled(&self, _: &log::Metadata<'_>) -> bool {
            true
        }

        fn log(&self, record: &Record<'_>) {
            if let Ok(mut lines) = self.0.lock() {
                lines.push(record.args().to_string());
            }
        }

        fn flush(&self) {}
    }

    #[test]
    fn test_注入日志器() {
        let capture = Arc::new(Capture(Mutex::new(Vec::new())));
        let mut config = ScvpConfig::default();
        config.mode = UsageMode::ParseOneNal;
        let mut session = MergeSession::new(config)
            .unwrap()
            .with_logger(capture.clone());
        session.init(&[]).unwrap();
        let lines = capture.0.lock().unwrap();
        assert!(lines.iter().any(|l| l.contains("会话初始化完成")));
    }
}
