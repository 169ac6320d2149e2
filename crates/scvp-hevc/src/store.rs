//! 参数集表.
//!
//! 按 id 保存解析后的 VPS/SPS/PPS, 并记录最近一次解析到的各类 id.
//! 记录以 `Arc` 共享, 克隆整张表只复制指针, 扫描器据此实现"暂存后提交".

use std::sync::Arc;

use scvp_core::{ScvpError, ScvpResult};

use crate::params::{MAX_PPS_COUNT, MAX_SPS_COUNT, MAX_VPS_COUNT, Pps, Sps, Vps};

/// 参数集表
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterSetStore {
    vps: Vec<Option<Arc<Vps>>>,
    sps: Vec<Option<Arc<Sps>>>,
    pps: Vec<Option<Arc<Pps>>>,
    last_vps_id: Option<u8>,
    last_sps_id: Option<u8>,
    last_pps_id: Option<u8>,
}

impl Default for ParameterSetStore {
    fn default() -> Self {
        Self {
            vps: vec![None; MAX_VPS_COUNT],
            sps: vec![None; MAX_SPS_COUNT],
            pps: vec![None; MAX_PPS_COUNT],
            last_vps_id: None,
            last_sps_id: None,
            last_pps_id: None,
        }
    }
}

impl ParameterSetStore {
    /// 创建空表
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入 VPS, 同 id 的旧记录被替换
    pub fn insert_vps(&mut self, vps: Vps) -> ScvpResult<()> {
        let id = vps.vps_id;
        let slot = self.vps.get_mut(usize::from(id)).ok_or_else(|| {
            ScvpError::InvalidData(format!("vps_id={} 超出范围", id))
        })?;
        *slot = Some(Arc::new(vps));
        self.last_vps_id = Some(id);
        Ok(())
    }

    /// 写入 SPS
    pub fn insert_sps(&mut self, sps: Sps) -> ScvpResult<()> {
        let id = sps.sps_id;
        let slot = self.sps.get_mut(usize::from(id)).ok_or_else(|| {
            ScvpError::InvalidData(format!("sps_id={} 超出范围", id))
        })?;
        *slot = Some(Arc::new(sps));
        self.last_sps_id = Some(id);
        Ok(())
    }

    /// 写入 PPS
    pub fn insert_pps(&mut self, pps: Pps) -> ScvpResult<()> {
        let id = pps.pps_id;
        let slot = self.pps.get_mut(usize::from(id)).ok_or_else(|| {
            ScvpError::InvalidData(format!("pps_id={} 超出范围", id))
        })?;
        *slot = Some(Arc::new(pps));
        self.last_pps_id = Some(id);
        Ok(())
    }

    /// 按 id 查找 VPS
    pub fn vps(&self, id: u32) -> Option<&Arc<Vps>> {
        self.vps.get(id as usize)?.as_ref()
    }

    /// 按 id 查找 SPS
    pub fn sps(&self, id: u32) -> Option<&Arc<Sps>> {
        self.sps.get(id as usize)?.as_ref()
    }

    /// 按 id 查找 PPS
    pub fn pps(&self, id: u32) -> Option<&Arc<Pps>> {
        self.pps.get(id as usize)?.as_ref()
    }

    /// 最近解析的 VPS
    pub fn last_vps(&self) -> Option<&Arc<Vps>> {
        self.vps(u32::from(self.last_vps_id?))
    }

    /// 最近解析的 SPS
    pub fn last_sps(&self) -> Option<&Arc<Sps>> {
        self.sps(u32::from(self.last_sps_id?))
    }

    /// 最近解析的 PPS
    pub fn last_pps(&self) -> Option<&Arc<Pps>> {
        self.pps(u32::from(self.last_pps_id?))
    }

    /// 条带引用的 PPS 及其 SPS
    pub fn resolve(&self, pps_id: u32) -> ScvpResult<(Arc<Sps>, Arc<Pps>)> {
        let pps = self
            .pps(pps_id)
            .ok_or_else(|| ScvpError::NoValue(format!("PPS {} 尚未解析", pps_id)))?;
        let sps = self.sps(u32::from(pps.sps_id)).ok_or_else(|| {
            ScvpError::NoValue(format!("PPS {} 引用的 SPS {} 尚未解析", pps_id, pps.sps_id))
        })?;
        Ok((Arc::clone(sps), Arc::clone(pps)))
    }

    /// 当前生效的 SPS/PPS (最近解析的 PPS 及其引用的 SPS)
    pub fn active(&self) -> ScvpResult<(Arc<Sps>, Arc<Pps>)> {
        let id = self
            .last_pps_id
            .ok_or_else(|| ScvpError::NoValue("尚未解析任何 PPS".into()))?;
        self.resolve(u32::from(id))
    }

    /// 是否已解析过 VPS、SPS 与 PPS
    pub fn is_ready(&self) -> bool {
        self.last_vps_id.is_some() && self.active().is_ok()
    }
}
