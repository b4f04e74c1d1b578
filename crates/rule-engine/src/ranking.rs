//! 规则排序管理
//!
//! 同一 (规则族, 作用域) 内的排序始终是从 0 开始、无空洞、无重复的递增序列。
//! 新建带排序的规则时先追加到末尾，再用与手动移动相同的搬移算法移到目标位置；
//! 搬移在同一把写锁内完成，读者不会看到重复或缺失的排序。

use crate::error::{Result, RuleError};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{debug, info};

/// 排序作用域
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RankScope {
    pub family: String,
    pub scope: String,
}

impl RankScope {
    pub fn new(family: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            family: family.into(),
            scope: scope.into(),
        }
    }

    /// 规则族的默认作用域
    pub fn family(family: impl Into<String>) -> Self {
        Self::new(family, "")
    }
}

/// 相对移动位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    Before,
    After,
}

/// 排序管理器
///
/// 每个作用域保存一个有序的规则 ID 列表，下标即排序。
#[derive(Debug, Default)]
pub struct RankManager {
    orders: RwLock<HashMap<RankScope, Vec<String>>>,
}

impl RankManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 下一个可用排序：max(rank) + 1，空作用域为 0
    pub fn next_rank(&self, scope: &RankScope) -> usize {
        self.orders.read().get(scope).map_or(0, Vec::len)
    }

    /// 加入规则
    ///
    /// 先以临时排序追加到末尾，指定了排序时再搬移过去。规则已存在时只做搬移。
    /// 返回最终排序。
    pub fn insert(&self, scope: &RankScope, rule_id: &str, requested: Option<usize>) -> usize {
        let mut orders = self.orders.write();
        let list = orders.entry(scope.clone()).or_default();

        let provisional = match list.iter().position(|id| id == rule_id) {
            Some(rank) => rank,
            None => {
                list.push(rule_id.to_string());
                list.len() - 1
            }
        };

        let rank = match requested {
            Some(target) => Self::relocate(list, provisional, target),
            None => provisional,
        };

        info!(
            family = %scope.family,
            scope = %scope.scope,
            rule_id = %rule_id,
            rank,
            "规则已加入排序"
        );
        rank
    }

    /// 把规则移动到指定排序，超出末尾时放到最后
    pub fn move_to(&self, scope: &RankScope, rule_id: &str, rank: usize) -> Result<usize> {
        let mut orders = self.orders.write();
        let list = orders
            .get_mut(scope)
            .ok_or_else(|| RuleError::RuleNotFound(rule_id.to_string()))?;
        let from = Self::position(list, rule_id)?;

        let rank = Self::relocate(list, from, rank);
        info!(family = %scope.family, rule_id = %rule_id, from, to = rank, "规则排序已调整");
        Ok(rank)
    }

    /// 把规则移动到参照规则之前或之后
    pub fn move_relative(
        &self,
        scope: &RankScope,
        rule_id: &str,
        reference_id: &str,
        position: Position,
    ) -> Result<usize> {
        let mut orders = self.orders.write();
        let list = orders
            .get_mut(scope)
            .ok_or_else(|| RuleError::RuleNotFound(rule_id.to_string()))?;
        let from = Self::position(list, rule_id)?;
        let reference = Self::position(list, reference_id)?;

        if from == reference {
            return Ok(from);
        }

        // 移除自身后参照规则的下标会前移一位
        let reference_after_removal = if from < reference { reference - 1 } else { reference };
        let target = match position {
            Position::Before => reference_after_removal,
            Position::After => reference_after_removal + 1,
        };

        let rank = Self::relocate(list, from, target);
        info!(
            family = %scope.family,
            rule_id = %rule_id,
            reference_id = %reference_id,
            ?position,
            rank,
            "规则排序已相对调整"
        );
        Ok(rank)
    }

    /// 移除规则，后续规则排序依次前移
    pub fn remove(&self, scope: &RankScope, rule_id: &str) -> Result<()> {
        let mut orders = self.orders.write();
        let list = orders
            .get_mut(scope)
            .ok_or_else(|| RuleError::RuleNotFound(rule_id.to_string()))?;
        let rank = Self::position(list, rule_id)?;
        list.remove(rank);

        if list.is_empty() {
            orders.remove(scope);
        }
        debug!(family = %scope.family, rule_id = %rule_id, rank, "规则已移出排序");
        Ok(())
    }

    pub fn rank_of(&self, scope: &RankScope, rule_id: &str) -> Option<usize> {
        self.orders
            .read()
            .get(scope)
            .and_then(|list| list.iter().position(|id| id == rule_id))
    }

    /// 按排序列出 (规则 ID, 排序)
    pub fn list(&self, scope: &RankScope) -> Vec<(String, usize)> {
        self.orders
            .read()
            .get(scope)
            .map(|list| {
                list.iter()
                    .enumerate()
                    .map(|(rank, id)| (id.clone(), rank))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        self.orders.write().clear();
    }

    fn position(list: &[String], rule_id: &str) -> Result<usize> {
        list.iter()
            .position(|id| id == rule_id)
            .ok_or_else(|| RuleError::RuleNotFound(rule_id.to_string()))
    }

    /// 搬移：取出后插入目标下标，中间的规则依次平移
    fn relocate(list: &mut Vec<String>, from: usize, to: usize) -> usize {
        let to = to.min(list.len() - 1);
        if from != to {
            let id = list.remove(from);
            list.insert(to, id);
        }
        to
    }
}
