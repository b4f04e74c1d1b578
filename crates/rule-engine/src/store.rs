//! 规则存储管理
//!
//! 使用 DashMap 提供线程安全的规则缓存，排序由 RankManager 统一维护。
//! 规则加载时按规则族能力编译，带期望排序的规则经由搬移算法落位。

use crate::compiler::{CompiledRule, RuleCompiler};
use crate::error::{Result, RuleError};
use crate::family::FamilyRegistry;
use crate::models::Rule;
use crate::ranking::{Position, RankManager, RankScope};
use crate::ruleset::RuleSet;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// 规则存储
#[derive(Clone)]
pub struct RuleStore {
    /// 编译后的规则缓存
    rules: Arc<DashMap<String, CompiledRule>>,
    ranks: Arc<RankManager>,
    families: FamilyRegistry,
    /// 规则编译器
    compiler: Arc<parking_lot::Mutex<RuleCompiler>>,
}

impl RuleStore {
    /// 创建新的规则存储
    pub fn new(families: FamilyRegistry) -> Self {
        Self {
            rules: Arc::new(DashMap::new()),
            ranks: Arc::new(RankManager::new()),
            families,
            compiler: Arc::new(parking_lot::Mutex::new(RuleCompiler::new())),
        }
    }

    /// 获取当前存储的规则数量
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// 检查存储是否为空
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn ranks(&self) -> &RankManager {
        &self.ranks
    }

    fn compile(&self, rule: Rule) -> Result<CompiledRule> {
        let family = self
            .families
            .get(&rule.family)
            .ok_or_else(|| RuleError::FamilyNotRegistered(rule.family.clone()))?;
        let mut compiler = self.compiler.lock();
        compiler.compile(rule, &family)
    }

    /// 加载规则，返回最终排序
    #[instrument(skip(self, rule), fields(rule_id = %rule.id, rule_name = %rule.name))]
    pub fn load(&self, rule: Rule) -> Result<usize> {
        let requested = rule.rank;
        let scope = RankScope::new(&rule.family, &rule.scope);
        let compiled = self.compile(rule)?;

        let rule_id = compiled.id().to_string();
        if let Some(previous) = self.rules.insert(rule_id.clone(), compiled) {
            let old_scope = RankScope::new(&previous.rule.family, &previous.rule.scope);
            if old_scope != scope {
                self.ranks.remove(&old_scope, &rule_id)?;
            }
        }
        let rank = self.ranks.insert(&scope, &rule_id, requested);

        info!("规则已加载: {} (rank {})", rule_id, rank);
        Ok(rank)
    }

    /// 加载规则（从 JSON 字符串）
    #[instrument(skip(self, json))]
    pub fn load_from_json(&self, json: &str) -> Result<String> {
        let rule: Rule = serde_json::from_str(json)?;
        let rule_id = rule.id.clone();
        self.load(rule)?;
        Ok(rule_id)
    }

    /// 更新规则；排序变化经由搬移算法处理
    #[instrument(skip(self, rule), fields(rule_id = %rule.id))]
    pub fn update(&self, rule: Rule) -> Result<usize> {
        let rule_id = rule.id.clone();

        let Some(previous) = self.rules.get(&rule_id).map(|r| r.rule.clone()) else {
            warn!("更新不存在的规则: {}", rule_id);
            return Err(RuleError::RuleNotFound(rule_id));
        };

        let old_scope = RankScope::new(&previous.family, &previous.scope);
        let new_scope = RankScope::new(&rule.family, &rule.scope);
        let requested = rule.rank;
        let compiled = self.compile(rule)?;
        self.rules.insert(rule_id.clone(), compiled);

        if old_scope != new_scope {
            self.ranks.remove(&old_scope, &rule_id)?;
            return Ok(self.ranks.insert(&new_scope, &rule_id, requested));
        }

        match requested {
            Some(rank) => self.ranks.move_to(&new_scope, &rule_id, rank),
            None => self
                .ranks
                .rank_of(&new_scope, &rule_id)
                .ok_or(RuleError::RuleNotFound(rule_id)),
        }
    }

    /// 调整规则排序
    #[instrument(skip(self))]
    pub fn move_rule(&self, rule_id: &str, rank: usize) -> Result<usize> {
        let scope = self.scope_of(rule_id)?;
        self.ranks.move_to(&scope, rule_id, rank)
    }

    /// 把规则移到参照规则之前或之后
    #[instrument(skip(self))]
    pub fn move_rule_relative(
        &self,
        rule_id: &str,
        reference_id: &str,
        position: Position,
    ) -> Result<usize> {
        let scope = self.scope_of(rule_id)?;
        self.ranks.move_relative(&scope, rule_id, reference_id, position)
    }

    /// 删除规则
    #[instrument(skip(self))]
    pub fn delete(&self, rule_id: &str) -> Result<()> {
        match self.rules.remove(rule_id) {
            Some((_, compiled)) => {
                let scope = RankScope::new(&compiled.rule.family, &compiled.rule.scope);
                self.ranks.remove(&scope, rule_id)?;
                info!("规则已删除: {}", rule_id);
                Ok(())
            }
            None => {
                warn!("删除不存在的规则: {}", rule_id);
                Err(RuleError::RuleNotFound(rule_id.to_string()))
            }
        }
    }

    /// 获取规则，排序字段取当前排序
    pub fn get(&self, rule_id: &str) -> Option<CompiledRule> {
        let mut compiled = self.rules.get(rule_id).map(|r| r.clone())?;
        let scope = RankScope::new(&compiled.rule.family, &compiled.rule.scope);
        compiled.rule.rank = self.ranks.rank_of(&scope, rule_id);
        Some(compiled)
    }

    /// 检查规则是否存在
    pub fn contains(&self, rule_id: &str) -> bool {
        self.rules.contains_key(rule_id)
    }

    /// 获取所有规则 ID
    pub fn list_ids(&self) -> Vec<String> {
        self.rules.iter().map(|r| r.key().clone()).collect()
    }

    /// 规则族（默认作用域）在当前时刻的规则集快照
    pub fn rule_set(&self, family: &str) -> RuleSet {
        self.scoped_rule_set(&RankScope::family(family))
    }

    /// 指定作用域的规则集快照
    pub fn scoped_rule_set(&self, scope: &RankScope) -> RuleSet {
        let rules = self
            .ranks
            .list(scope)
            .into_iter()
            .filter_map(|(id, rank)| {
                self.rules.get(&id).map(|r| {
                    let mut compiled = r.clone();
                    compiled.rule.rank = Some(rank);
                    compiled
                })
            })
            .collect();
        RuleSet::new(scope.family.clone(), rules)
    }

    /// 批量加载规则，失败的规则记录日志后跳过
    #[instrument(skip(self, rules))]
    pub fn load_batch(&self, rules: Vec<Rule>) -> Vec<String> {
        let mut loaded_ids = Vec::with_capacity(rules.len());
        let mut errors = Vec::new();

        for rule in rules {
            let rule_id = rule.id.clone();
            match self.load(rule) {
                Ok(_) => loaded_ids.push(rule_id),
                Err(e) => errors.push((rule_id, e)),
            }
        }

        if !errors.is_empty() {
            warn!("批量加载部分失败: {:?}", errors);
        }

        info!("批量加载完成: {} 成功, {} 失败", loaded_ids.len(), errors.len());
        loaded_ids
    }

    /// 清空所有规则
    #[instrument(skip(self))]
    pub fn clear(&self) {
        let count = self.rules.len();
        self.rules.clear();
        self.ranks.clear();
        info!("已清空 {} 条规则", count);
    }

    /// 获取规则统计信息
    pub fn stats(&self) -> RuleStoreStats {
        let rules_count = self.rules.len();
        let active_count = self.rules.iter().filter(|r| r.rule.is_active).count();
        let total_criteria: usize = self.rules.iter().map(|r| r.criteria.len()).sum();

        RuleStoreStats {
            rules_count,
            active_count,
            total_criteria,
            avg_criteria_per_rule: if rules_count > 0 {
                total_criteria as f64 / rules_count as f64
            } else {
                0.0
            },
        }
    }

    fn scope_of(&self, rule_id: &str) -> Result<RankScope> {
        self.rules
            .get(rule_id)
            .map(|r| RankScope::new(&r.rule.family, &r.rule.scope))
            .ok_or_else(|| RuleError::RuleNotFound(rule_id.to_string()))
    }
}

/// 规则存储统计信息
#[derive(Debug, Clone)]
pub struct RuleStoreStats {
    /// 规则总数
    pub rules_count: usize,
    /// 启用的规则数
    pub active_count: usize,
    /// 所有规则的条件总数
    pub total_criteria: usize,
    /// 平均每条规则的条件数
    pub avg_criteria_per_rule: f64,
}
