//! 正则捕获组聚合
//!
//! 同一规则内多个正则条件命中时，按笛卡尔积合并各条件的捕获组。

use serde::Serialize;
use std::collections::BTreeMap;

/// 单个捕获组合：组名/序号 -> 捕获文本
pub type CaptureMap = BTreeMap<String, String>;

/// 捕获组聚合器
#[derive(Debug, Clone, Default, Serialize)]
pub struct CaptureSet {
    combinations: Vec<CaptureMap>,
}

impl CaptureSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// 合并一个条件产生的捕获组
    ///
    /// 聚合器为空时直接采用；否则每个已有组合与每个新组合做键并集，
    /// 冲突时后来的条件覆盖。新列表为空时保持不变。
    pub fn merge(&mut self, incoming: Vec<CaptureMap>) {
        if incoming.is_empty() {
            return;
        }

        if self.combinations.is_empty() {
            self.combinations = incoming;
            return;
        }

        let mut merged = Vec::with_capacity(self.combinations.len() * incoming.len());
        for existing in &self.combinations {
            for new in &incoming {
                let mut combined = existing.clone();
                combined.extend(new.iter().map(|(k, v)| (k.clone(), v.clone())));
                merged.push(combined);
            }
        }
        self.combinations = merged;
    }

    /// 动作替换使用的组合
    pub fn first(&self) -> Option<&CaptureMap> {
        self.combinations.first()
    }

    pub fn all(&self) -> &[CaptureMap] {
        &self.combinations
    }

    pub fn len(&self) -> usize {
        self.combinations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.combinations.is_empty()
    }

    pub fn into_vec(self) -> Vec<CaptureMap> {
        self.combinations
    }
}
