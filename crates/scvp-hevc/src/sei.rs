//! 全景视频相关 SEI 的编解码.
//!
//! 支持的 payloadType:
//! - 45: 帧打包排列 (frame packing arrangement)
//! - 150: 等距柱状投影 (ERP)
//! - 151: 立方体投影 (CMP)
//! - 154: 球面旋转
//! - 155: 区域打包 (region-wise packing, RWPK)
//! - 156: 全景视口
//!
//! RWPK 在标准字段之后追加四个扩展字段, 供客户端还原高低分辨率布局:
//! `num_hi_regions (u8)`, `low_res_pic_width (u32)`, `low_res_pic_height (u32)`,
//! `time_stamp (u32)`. 解码时若剩余不足 104 位则扩展字段取默认值.

use serde::{Deserialize, Serialize};

use scvp_core::rbsp::unescape_rbsp;
use scvp_core::{BitReader, BitWriter, OutputBuffer, ScvpError, ScvpResult};

use crate::nal::{NalHeader, NalUnitType, build_nal, split_annex_b};

/// payloadType: 帧打包排列
pub const SEI_FRAME_PACKING: u32 = 45;
/// payloadType: 等距柱状投影
pub const SEI_EQUIRECT_PROJECTION: u32 = 150;
/// payloadType: 立方体投影
pub const SEI_CUBEMAP_PROJECTION: u32 = 151;
/// payloadType: 球面旋转
pub const SEI_SPHERE_ROTATION: u32 = 154;
/// payloadType: 区域打包
pub const SEI_REGION_WISE_PACKING: u32 = 155;
/// payloadType: 全景视口
pub const SEI_OMNI_VIEWPORT: u32 = 156;

/// RWPK 扩展字段的位数
const RWPK_EXTENSION_BITS: usize = 8 + 32 * 3;

// ============================================================
// 数据类型
// ============================================================

/// 单个矩形区域的打包信息
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RectRegionPacking {
    /// 变换类型 (0..=7)
    pub transform_type: u8,
    /// 是否带保护带
    pub guard_band: bool,
    /// 投影图像中的宽度
    pub proj_reg_width: u32,
    /// 投影图像中的高度
    pub proj_reg_height: u32,
    /// 投影图像中的上边界
    pub proj_reg_top: u32,
    /// 投影图像中的左边界
    pub proj_reg_left: u32,
    /// 打包图像中的宽度
    pub packed_reg_width: u16,
    /// 打包图像中的高度
    pub packed_reg_height: u16,
    /// 打包图像中的上边界
    pub packed_reg_top: u16,
    /// 打包图像中的左边界
    pub packed_reg_left: u16,
    /// 左保护带宽度
    pub left_gb_width: u8,
    /// 右保护带宽度
    pub right_gb_width: u8,
    /// 上保护带高度
    pub top_gb_height: u8,
    /// 下保护带高度
    pub bottom_gb_height: u8,
    /// gb_not_used_for_pred_flag
    pub gb_not_used_for_pred: bool,
    /// 四个保护带的类型 (各 0..=7)
    pub gb_type: [u8; 4],
}

/// 区域打包 (RWPK)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionWisePacking {
    /// constituent_picture_matching_flag
    pub constituent_picture_matching: bool,
    /// 投影图像宽度
    pub proj_pic_width: u32,
    /// 投影图像高度
    pub proj_pic_height: u32,
    /// 打包图像宽度
    pub packed_pic_width: u16,
    /// 打包图像高度
    pub packed_pic_height: u16,
    /// 各区域, 高分辨率区域在前
    pub regions: Vec<RectRegionPacking>,
    /// 高分辨率区域个数
    pub num_hi_regions: u8,
    /// 低分辨率图像宽度
    pub low_res_pic_width: u32,
    /// 低分辨率图像高度
    pub low_res_pic_height: u32,
    /// 时间戳
    pub time_stamp: u32,
}

impl RegionWisePacking {
    /// 区域个数
    pub fn num_regions(&self) -> usize {
        self.regions.len()
    }
}

/// 投影类型 SEI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProjectionSei {
    /// 等距柱状投影, 可带保护带 (类型, 左宽, 右宽)
    Equirect {
        /// 保护带
        guard_band: Option<(u8, u8, u8)>,
    },
    /// 立方体投影
    Cubemap,
}

/// 球面旋转 (单位 2^-16 度)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SphereRotation {
    /// 偏航
    pub yaw: i32,
    /// 俯仰
    pub pitch: i32,
    /// 翻滚
    pub roll: i32,
}

/// 帧打包排列
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FramePacking {
    /// frame_packing_arrangement_id
    pub arrangement_id: u32,
    /// frame_packing_arrangement_type (0..=127)
    pub arrangement_type: u8,
    /// quincunx_sampling_flag
    pub quincunx_sampling: bool,
    /// content_interpretation_type (0..=63)
    pub content_interpretation_type: u8,
    /// spatial_flipping_flag
    pub spatial_flipping: bool,
    /// frame0_flipped_flag
    pub frame0_flipped: bool,
    /// field_views_flag
    pub field_views: bool,
    /// current_frame_is_frame0_flag
    pub current_frame_is_frame0: bool,
    /// frame0_self_contained_flag
    pub frame0_self_contained: bool,
    /// frame1_self_contained_flag
    pub frame1_self_contained: bool,
    /// frame0 网格位置 (x, y), 各 4 位
    pub frame0_grid: (u8, u8),
    /// frame1 网格位置 (x, y), 各 4 位
    pub frame1_grid: (u8, u8),
    /// upsampled_aspect_ratio_flag
    pub upsampled_aspect_ratio: bool,
}

impl FramePacking {
    fn has_grid(&self) -> bool {
        !self.quincunx_sampling && self.arrangement_type != 5
    }
}

/// 单个视口区域 (角度单位 2^-16 度)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewportRegion {
    /// 中心方位角
    pub azimuth_centre: i32,
    /// 中心仰角
    pub elevation_centre: i32,
    /// 中心倾角
    pub tilt_centre: i32,
    /// 水平范围
    pub hor_range: u32,
    /// 垂直范围
    pub ver_range: u32,
}

/// 全景视口
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OmniViewport {
    /// omni_viewport_id (0..1023)
    pub id: u16,
    /// 视口列表 (1..=16)
    pub viewports: Vec<ViewportRegion>,
}

/// 可编码的 SEI 消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeiMessage {
    /// 投影类型
    Projection(ProjectionSei),
    /// 球面旋转
    SphereRotation(SphereRotation),
    /// 帧打包
    FramePacking(FramePacking),
    /// 全景视口
    Viewport(OmniViewport),
    /// 区域打包
    RegionWisePacking(RegionWisePacking),
}

/// NAL 中的一条原始 SEI 消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSei {
    /// payloadType
    pub payload_type: u32,
    /// 载荷 (RBSP 形式)
    pub payload: Vec<u8>,
}

// ============================================================
// SEI 消息
// ============================================================

impl SeiMessage {
    /// payloadType
    pub fn payload_type(&self) -> u32 {
        match self {
            Self::Projection(ProjectionSei::Equirect { .. }) => SEI_EQUIRECT_PROJECTION,
            Self::Projection(ProjectionSei::Cubemap) => SEI_CUBEMAP_PROJECTION,
            Self::SphereRotation(_) => SEI_SPHERE_ROTATION,
            Self::FramePacking(_) => SEI_FRAME_PACKING,
            Self::Viewport(_) => SEI_OMNI_VIEWPORT,
            Self::RegionWisePacking(_) => SEI_REGION_WISE_PACKING,
        }
    }

    /// 编码载荷 (RBSP 形式)
    pub fn encode_payload(&self) -> ScvpResult<Vec<u8>> {
        let mut bw = BitWriter::new();
        match self {
            Self::Projection(ProjectionSei::Equirect { guard_band }) => {
                bw.write_bit(0); // erp_cancel_flag
                bw.write_bit(1); // erp_persistence_flag
                bw.write_flag(guard_band.is_some());
                bw.write_bits(0, 2);
                if let Some((gb_type, left, right)) = guard_band {
                    check_range("erp_guard_band_type", u32::from(*gb_type), 7)?;
                    bw.write_bits(u32::from(*gb_type), 3);
                    bw.write_bits(u32::from(*left), 8);
                    bw.write_bits(u32::from(*right), 8);
                }
            }
            Self::Projection(ProjectionSei::Cubemap) => {
                bw.write_bit(0); // cmp_cancel_flag
                bw.write_bit(1); // cmp_persistence_flag
            }
            Self::SphereRotation(rot) => {
                bw.write_bit(0);
                bw.write_bit(1);
                bw.write_bits(0, 6);
                bw.write_i32(rot.yaw);
                bw.write_i32(rot.pitch);
                bw.write_i32(rot.roll);
            }
            Self::FramePacking(fp) => write_frame_packing(&mut bw, fp)?,
            Self::Viewport(vp) => {
                check_range("omni_viewport_id", u32::from(vp.id), 1023)?;
                if vp.viewports.is_empty() || vp.viewports.len() > 16 {
                    return Err(ScvpError::InvalidArgument(format!(
                        "视口个数 {} 超出范围 1..=16",
                        vp.viewports.len()
                    )));
                }
                bw.write_bits(u32::from(vp.id), 10);
                bw.write_bit(0); // omni_viewport_cancel_flag
                bw.write_bit(1); // omni_viewport_persistence_flag
                bw.write_bits(vp.viewports.len() as u32 - 1, 4);
                for v in &vp.viewports {
                    bw.write_i32(v.azimuth_centre);
                    bw.write_i32(v.elevation_centre);
                    bw.write_i32(v.tilt_centre);
                    bw.write_bits(v.hor_range, 32);
                    bw.write_bits(v.ver_range, 32);
                }
            }
            Self::RegionWisePacking(rwpk) => write_rwpk(&mut bw, rwpk)?,
        }
        if !bw.is_byte_aligned() {
            // payload_bit_equal_to_one + payload_bit_equal_to_zero
            bw.write_trailing_bits();
        }
        Ok(bw.finish())
    }

    /// 从载荷解码
    pub fn decode_payload(payload_type: u32, payload: &[u8]) -> ScvpResult<Self> {
        let mut br = BitReader::new(payload);
        let msg = match payload_type {
            SEI_EQUIRECT_PROJECTION => {
                read_cancel_persistence(&mut br, "erp")?;
                let has_gb = br.read_flag()?;
                br.skip_bits(2)?;
                let guard_band = if has_gb {
                    Some((br.read_bits(3)? as u8, br.read_bits(8)? as u8, br.read_bits(8)? as u8))
                } else {
                    None
                };
                Self::Projection(ProjectionSei::Equirect { guard_band })
            }
            SEI_CUBEMAP_PROJECTION => {
                read_cancel_persistence(&mut br, "cmp")?;
                Self::Projection(ProjectionSei::Cubemap)
            }
            SEI_SPHERE_ROTATION => {
                read_cancel_persistence(&mut br, "sphere_rotation")?;
                br.skip_bits(6)?;
                Self::SphereRotation(SphereRotation {
                    yaw: br.read_i32()?,
                    pitch: br.read_i32()?,
                    roll: br.read_i32()?,
                })
            }
            SEI_FRAME_PACKING => Self::FramePacking(read_frame_packing(&mut br)?),
            SEI_OMNI_VIEWPORT => {
                let id = br.read_bits(10)? as u16;
                read_cancel_persistence(&mut br, "omni_viewport")?;
                let count = br.read_bits(4)? + 1;
                let mut viewports = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    viewports.push(ViewportRegion {
                        azimuth_centre: br.read_i32()?,
                        elevation_centre: br.read_i32()?,
                        tilt_centre: br.read_i32()?,
                        hor_range: br.read_bits(32)?,
                        ver_range: br.read_bits(32)?,
                    });
                }
                Self::Viewport(OmniViewport { id, viewports })
            }
            SEI_REGION_WISE_PACKING => Self::RegionWisePacking(read_rwpk(&mut br)?),
            other => {
                return Err(ScvpError::Unsupported(format!("SEI payloadType={}", other)));
            }
        };
        Ok(msg)
    }

    /// 封装为带起始码的前缀 SEI NAL
    pub fn to_nal(&self) -> ScvpResult<Vec<u8>> {
        Ok(build_sei_nal(self.payload_type(), &self.encode_payload()?))
    }

    /// 写入调用方缓冲区, 返回写入的字节数
    pub fn encode_into(&self, out: &mut [u8]) -> ScvpResult<usize> {
        let nal = self.to_nal()?;
        let mut buf = OutputBuffer::new(out);
        buf.put(&nal)?;
        Ok(buf.len())
    }
}

fn check_range(name: &str, value: u32, max: u32) -> ScvpResult<()> {
    if value > max {
        return Err(ScvpError::InvalidArgument(format!(
            "{}={} 超出范围 0..={}",
            name, value, max
        )));
    }
    Ok(())
}

fn read_cancel_persistence(br: &mut BitReader<'_>, name: &str) -> ScvpResult<()> {
    if br.read_flag()? {
        return Err(ScvpError::Unsupported(format!("{} SEI 的取消消息", name)));
    }
    br.skip_bits(1)?; // persistence_flag
    Ok(())
}

fn write_frame_packing(bw: &mut BitWriter, fp: &FramePacking) -> ScvpResult<()> {
    check_range("frame_packing_arrangement_type", u32::from(fp.arrangement_type), 127)?;
    check_range("content_interpretation_type", u32::from(fp.content_interpretation_type), 63)?;
    for v in [fp.frame0_grid.0, fp.frame0_grid.1, fp.frame1_grid.0, fp.frame1_grid.1] {
        check_range("frame_grid_position", u32::from(v), 15)?;
    }
    bw.write_ue(fp.arrangement_id);
    bw.write_bit(0); // frame_packing_arrangement_cancel_flag
    bw.write_bits(u32::from(fp.arrangement_type), 7);
    bw.write_flag(fp.quincunx_sampling);
    bw.write_bits(u32::from(fp.content_interpretation_type), 6);
    bw.write_flag(fp.spatial_flipping);
    bw.write_flag(fp.frame0_flipped);
    bw.write_flag(fp.field_views);
    bw.write_flag(fp.current_frame_is_frame0);
    bw.write_flag(fp.frame0_self_contained);
    bw.write_flag(fp.frame1_self_contained);
    if fp.has_grid() {
        bw.write_bits(u32::from(fp.frame0_grid.0), 4);
        bw.write_bits(u32::from(fp.frame0_grid.1), 4);
        bw.write_bits(u32::from(fp.frame1_grid.0), 4);
        bw.write_bits(u32::from(fp.frame1_grid.1), 4);
    }
    bw.write_bits(0, 8); // frame_packing_arrangement_reserved_byte
    bw.write_bit(1); // frame_packing_arrangement_persistence_flag
    bw.write_flag(fp.upsampled_aspect_ratio);
    Ok(())
}

fn read_frame_packing(br: &mut BitReader<'_>) -> ScvpResult<FramePacking> {
    let arrangement_id = br.read_ue()?;
    if br.read_flag()? {
        return Err(ScvpError::Unsupported("帧打包 SEI 的取消消息".into()));
    }
    let mut fp = FramePacking {
        arrangement_id,
        arrangement_type: br.read_bits(7)? as u8,
        quincunx_sampling: br.read_flag()?,
        content_interpretation_type: br.read_bits(6)? as u8,
        spatial_flipping: br.read_flag()?,
        frame0_flipped: br.read_flag()?,
        field_views: br.read_flag()?,
        current_frame_is_frame0: br.read_flag()?,
        frame0_self_contained: br.read_flag()?,
        frame1_self_contained: br.read_flag()?,
        ..FramePacking::default()
    };
    if fp.has_grid() {
        fp.frame0_grid = (br.read_bits(4)? as u8, br.read_bits(4)? as u8);
        fp.frame1_grid = (br.read_bits(4)? as u8, br.read_bits(4)? as u8);
    }
    br.skip_bits(8)?;
    br.skip_bits(1)?; // persistence
    fp.upsampled_aspect_ratio = br.read_flag()?;
    Ok(fp)
}

// ============================================================
// RWPK
// ============================================================

fn write_rwpk(bw: &mut BitWriter, rwpk: &RegionWisePacking) -> ScvpResult<()> {
    if rwpk.regions.len() > usize::from(u8::MAX) {
        return Err(ScvpError::InvalidArgument(format!(
            "区域个数 {} 超出 255",
            rwpk.regions.len()
        )));
    }
    bw.write_bit(0); // rwp_cancel_flag
    bw.write_bit(1); // rwp_persistence_flag
    bw.write_flag(rwpk.constituent_picture_matching);
    bw.write_bits(0, 5);
    bw.write_bits(rwpk.regions.len() as u32, 8);
    bw.write_bits(rwpk.proj_pic_width, 32);
    bw.write_bits(rwpk.proj_pic_height, 32);
    bw.write_bits(u32::from(rwpk.packed_pic_width), 16);
    bw.write_bits(u32::from(rwpk.packed_pic_height), 16);
    for region in &rwpk.regions {
        check_range("rwp_transform_type", u32::from(region.transform_type), 7)?;
        bw.write_bits(0, 4);
        bw.write_bits(u32::from(region.transform_type), 3);
        bw.write_flag(region.guard_band);
        bw.write_bits(region.proj_reg_width, 32);
        bw.write_bits(region.proj_reg_height, 32);
        bw.write_bits(region.proj_reg_top, 32);
        bw.write_bits(region.proj_reg_left, 32);
        bw.write_bits(u32::from(region.packed_reg_width), 16);
        bw.write_bits(u32::from(region.packed_reg_height), 16);
        bw.write_bits(u32::from(region.packed_reg_top), 16);
        bw.write_bits(u32::from(region.packed_reg_left), 16);
        if region.guard_band {
            bw.write_bits(u32::from(region.left_gb_width), 8);
            bw.write_bits(u32::from(region.right_gb_width), 8);
            bw.write_bits(u32::from(region.top_gb_height), 8);
            bw.write_bits(u32::from(region.bottom_gb_height), 8);
            bw.write_flag(region.gb_not_used_for_pred);
            for gb_type in region.gb_type {
                check_range("gb_type", u32::from(gb_type), 7)?;
                bw.write_bits(u32::from(gb_type), 3);
            }
            bw.write_bits(0, 3);
        }
    }
    bw.write_bits(u32::from(rwpk.num_hi_regions), 8);
    bw.write_bits(rwpk.low_res_pic_width, 32);
    bw.write_bits(rwpk.low_res_pic_height, 32);
    bw.write_bits(rwpk.time_stamp, 32);
    Ok(())
}

fn read_rwpk(br: &mut BitReader<'_>) -> ScvpResult<RegionWisePacking> {
    read_cancel_persistence(br, "rwpk")?;
    let constituent_picture_matching = br.read_flag()?;
    br.skip_bits(5)?;
    let num_regions = br.read_bits(8)? as usize;
    let mut rwpk = RegionWisePacking {
        constituent_picture_matching,
        proj_pic_width: br.read_bits(32)?,
        proj_pic_height: br.read_bits(32)?,
        packed_pic_width: br.read_bits(16)? as u16,
        packed_pic_height: br.read_bits(16)? as u16,
        regions: Vec::with_capacity(num_regions),
        ..RegionWisePacking::default()
    };
    for _ in 0..num_regions {
        br.skip_bits(4)?;
        let mut region = RectRegionPacking {
            transform_type: br.read_bits(3)? as u8,
            guard_band: br.read_flag()?,
            proj_reg_width: br.read_bits(32)?,
            proj_reg_height: br.read_bits(32)?,
            proj_reg_top: br.read_bits(32)?,
            proj_reg_left: br.read_bits(32)?,
            packed_reg_width: br.read_bits(16)? as u16,
            packed_reg_height: br.read_bits(16)? as u16,
            packed_reg_top: br.read_bits(16)? as u16,
            packed_reg_left: br.read_bits(16)? as u16,
            ..RectRegionPacking::default()
        };
        if region.guard_band {
            region.left_gb_width = br.read_bits(8)? as u8;
            region.right_gb_width = br.read_bits(8)? as u8;
            region.top_gb_height = br.read_bits(8)? as u8;
            region.bottom_gb_height = br.read_bits(8)? as u8;
            region.gb_not_used_for_pred = br.read_flag()?;
            for gb_type in region.gb_type.iter_mut() {
                *gb_type = br.read_bits(3)? as u8;
            }
            br.skip_bits(3)?;
        }
        rwpk.regions.push(region);
    }
    if br.bits_left() >= RWPK_EXTENSION_BITS {
        rwpk.num_hi_regions = br.read_bits(8)? as u8;
        rwpk.low_res_pic_width = br.read_bits(32)?;
        rwpk.low_res_pic_height = br.read_bits(32)?;
        rwpk.time_stamp = br.read_bits(32)?;
    }
    Ok(rwpk)
}

/// 区域打包 SEI 编解码
///
/// 无状态, 对任何合法输入 `decode(encode(x)) == x`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RwpkCodec;

impl RwpkCodec {
    /// 编码为 SEI 载荷
    pub fn encode(rwpk: &RegionWisePacking) -> ScvpResult<Vec<u8>> {
        SeiMessage::RegionWisePacking(rwpk.clone()).encode_payload()
    }

    /// 从 SEI 载荷解码
    pub fn decode(payload: &[u8]) -> ScvpResult<RegionWisePacking> {
        let mut br = BitReader::new(payload);
        read_rwpk(&mut br)
    }

    /// 编码为带起始码的 SEI NAL
    pub fn encode_nal(rwpk: &RegionWisePacking) -> ScvpResult<Vec<u8>> {
        Ok(build_sei_nal(SEI_REGION_WISE_PACKING, &Self::encode(rwpk)?))
    }

    /// 编码到调用方缓冲区, 返回写入的字节数
    pub fn encode_into(rwpk: &RegionWisePacking, out: &mut [u8]) -> ScvpResult<usize> {
        let nal = Self::encode_nal(rwpk)?;
        let mut buf = OutputBuffer::new(out);
        buf.put(&nal)?;
        Ok(buf.len())
    }

    /// 从 SEI NAL 解码 (可带起始码)
    pub fn decode_nal(data: &[u8]) -> ScvpResult<RegionWisePacking> {
        let nal = if data.starts_with(&[0, 0, 1]) || data.starts_with(&[0, 0, 0, 1]) {
            let units = split_annex_b(data)?;
            let first = units
                .first()
                .ok_or_else(|| ScvpError::InvalidData("缺少 SEI NAL".into()))?;
            first.bytes()
        } else {
            data
        };
        let msg = parse_sei_nal(nal)?
            .into_iter()
            .find(|m| m.payload_type == SEI_REGION_WISE_PACKING)
            .ok_or_else(|| ScvpError::NoValue("NAL 中没有区域打包 SEI".into()))?;
        Self::decode(&msg.payload)
    }
}

// ============================================================
// SEI NAL
// ============================================================

fn write_ff_coded(out: &mut Vec<u8>, mut value: usize) {
    while value >= 0xFF {
        out.push(0xFF);
        value -= 0xFF;
    }
    out.push(value as u8);
}

/// 把一条 SEI 消息封装为带起始码的前缀 SEI NAL
pub fn build_sei_nal(payload_type: u32, payload: &[u8]) -> Vec<u8> {
    let mut rbsp = Vec::with_capacity(payload.len() + 8);
    write_ff_coded(&mut rbsp, payload_type as usize);
    write_ff_coded(&mut rbsp, payload.len());
    rbsp.extend_from_slice(payload);
    rbsp.push(0x80); // rbsp_trailing_bits
    build_nal(NalHeader::new(NalUnitType::PrefixSei), &rbsp)
}

/// 解析 SEI NAL (含 2 字节头, 不含起始码) 中的全部消息
pub fn parse_sei_nal(nal: &[u8]) -> ScvpResult<Vec<RawSei>> {
    let header = NalHeader::parse(nal)?;
    if !matches!(header.nal_type, NalUnitType::PrefixSei | NalUnitType::SuffixSei) {
        return Err(ScvpError::InvalidData(format!(
            "NAL 类型 {:?} 不是 SEI",
            header.nal_type
        )));
    }
    let rbsp = unescape_rbsp(&nal[2..]);
    let mut pos = 0;
    let mut messages = Vec::new();
    let read_ff = |pos: &mut usize| -> ScvpResult<usize> {
        let mut value = 0usize;
        loop {
            let b = *rbsp.get(*pos).ok_or(ScvpError::Eof)?;
            *pos += 1;
            value += usize::from(b);
            if b != 0xFF {
                return Ok(value);
            }
        }
    };
    // more_rbsp_data: 剩余部分不只是 rbsp_trailing_bits
    while pos < rbsp.len() && !(pos + 1 == rbsp.len() && rbsp[pos] == 0x80) {
        let payload_type = read_ff(&mut pos)? as u32;
        let size = read_ff(&mut pos)?;
        let payload = rbsp.get(pos..pos + size).ok_or(ScvpError::Eof)?;
        messages.push(RawSei {
            payload_type,
            payload: payload.to_vec(),
        });
        pos += size;
    }
    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(i: u16) -> RectRegionPacking {
        RectRegionPacking {
            proj_reg_width: 960,
            proj_reg_height: 960,
            proj_reg_top: 0,
            proj_reg_left: u32::from(i) * 960,
            packed_reg_width: 960,
            packed_reg_height: 960,
            packed_reg_top: 0,
            packed_reg_left: i * 960,
            ..RectRegionPacking::default()
        }
    }

    fn sample(n: u16) -> RegionWisePacking {
        RegionWisePacking {
            proj_pic_width: 3840,
            proj_pic_height: 1920,
            packed_pic_width: 960 * n,
            packed_pic_height: 960,
            regions: (0..n).map(region).collect(),
            num_hi_regions: (n / 2) as u8,
            low_res_pic_width: 1920,
            low_res_pic_height: 960,
            time_stamp: 42,
            ..RegionWisePacking::default()
        }
    }

    #[test]
    fn test_rwpk_往返() {
        for n in 1..=6 {
            let rwpk = sample(n);
            let payload = RwpkCodec::encode(&rwpk).unwrap();
            assert_eq!(payload.len(), 14 + 25 * n as usize + 13);
            assert_eq!(RwpkCodec::decode(&payload).unwrap(), rwpk);
            let nal = RwpkCodec::encode_nal(&rwpk).unwrap();
            assert_eq!(RwpkCodec::decode_nal(&nal).unwrap(), rwpk);
        }
    }

    #[test]
    fn test_rwpk_保护带() {
        let mut rwpk = sample(2);
        rwpk.regions[1] = RectRegionPacking {
            transform_type: 5,
            guard_band: true,
            left_gb_width: 4,
            bottom_gb_height: 8,
            gb_not_used_for_pred: true,
            gb_type: [1, 2, 3, 7],
            ..region(1)
        };
        let payload = RwpkCodec::encode(&rwpk).unwrap();
        assert_eq!(RwpkCodec::decode(&payload).unwrap(), rwpk);

        rwpk.regions[0].transform_type = 8;
        assert!(RwpkCodec::encode(&rwpk).is_err());
    }

    #[test]
    fn test_rwpk_缺少扩展字段时取默认值() {
        let rwpk = sample(1);
        let payload = RwpkCodec::encode(&rwpk).unwrap();
        let decoded = RwpkCodec::decode(&payload[..payload.len() - 13]).unwrap();
        assert_eq!(decoded.num_hi_regions, 0);
        assert_eq!(decoded.low_res_pic_width, 0);
        assert_eq!(decoded.regions, rwpk.regions);
    }

    #[test]
    fn test_rwpk_写入有界缓冲区() {
        let rwpk = sample(2);
        let nal = RwpkCodec::encode_nal(&rwpk).unwrap();
        let mut big = vec![0u8; nal.len()];
        assert_eq!(RwpkCodec::encode_into(&rwpk, &mut big).unwrap(), nal.len());
        assert_eq!(big, nal);
        let mut small = vec![0u8; nal.len() - 1];
        assert!(matches!(
            RwpkCodec::encode_into(&rwpk, &mut small),
            Err(ScvpError::BufferOverflow { .. })
        ));
    }

    #[test]
    fn test_其他_sei_往返() {
        let messages = [
            SeiMessage::Projection(ProjectionSei::Equirect { guard_band: None }),
            SeiMessage::Projection(ProjectionSei::Equirect {
                guard_band: Some((2, 16, 16)),
            }),
            SeiMessage::Projection(ProjectionSei::Cubemap),
            SeiMessage::SphereRotation(SphereRotation {
                yaw: 90 << 16,
                pitch: -(30 << 16),
                roll: 0,
            }),
            SeiMessage::FramePacking(FramePacking {
                arrangement_id: 3,
                arrangement_type: 4,
                content_interpretation_type: 1,
                frame0_grid: (1, 2),
                frame1_grid: (3, 4),
                ..FramePacking::default()
            }),
            SeiMessage::Viewport(OmniViewport {
                id: 7,
                viewports: vec![ViewportRegion {
                    azimuth_centre: -(45 << 16),
                    elevation_centre: 10 << 16,
                    tilt_centre: 0,
                    hor_range: 90 << 16,
                    ver_range: 90 << 16,
                }],
            }),
        ];
        for msg in messages {
            let nal = msg.to_nal().unwrap();
            let raw = parse_sei_nal(&nal[4..]).unwrap();
            assert_eq!(raw.len(), 1);
            assert_eq!(raw[0].payload_type, msg.payload_type());
            assert_eq!(SeiMessage::decode_payload(raw[0].payload_type, &raw[0].payload).unwrap(), msg);
        }
    }

    #[test]
    fn test_sei_头部编码() {
        let nal = build_sei_nal(SEI_CUBEMAP_PROJECTION, &[0x60]);
        assert_eq!(nal, vec![0, 0, 0, 1, 0x4E, 0x01, 151, 1, 0x60, 0x80]);

        let long = vec![0xAB; 300];
        let nal = build_sei_nal(SEI_REGION_WISE_PACKING, &long);
        assert_eq!(&nal[6..9], &[155, 0xFF, 45]);
        let raw = parse_sei_nal(&nal[4..]).unwrap();
        assert_eq!(raw[0].payload.len(), 300);
    }

    #[test]
    fn test_截断的_sei() {
        let nal = build_sei_nal(SEI_SPHERE_ROTATION, &[0x40; 13]);
        assert!(parse_sei_nal(&nal[4..nal.len() - 4]).is_err());
        assert!(parse_sei_nal(&[0x40, 0x01, 0x0C]).is_err());
    }
}
