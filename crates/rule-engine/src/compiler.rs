//! 规则编译器
//!
//! 校验规则结构与规则族词汇表，预编译正则模式，并预提取条件字段集合
//! 供增量重评估判断规则是否相关。

use crate::error::{Result, RuleError};
use crate::family::{FamilyCapabilities, ValueType};
use crate::models::{Action, Criterion, Rule};
use crate::operators::ActionType;
use regex::{Regex, RegexBuilder};
use std::collections::HashSet;

/// 编译后的条件
#[derive(Debug, Clone)]
pub struct CompiledCriterion {
    pub criterion: Criterion,
    /// 正则条件的预编译模式
    pub regex: Option<Regex>,
}

/// 编译后的规则
#[derive(Debug, Clone)]
pub struct CompiledRule {
    /// 原始规则
    pub rule: Rule,
    pub criteria: Vec<CompiledCriterion>,
    /// 条件中使用的所有字段（用于增量重评估）
    pub required_fields: HashSet<String>,
    /// 编译版本号（用于缓存失效）
    pub compile_version: u64,
}

impl CompiledRule {
    pub fn id(&self) -> &str {
        &self.rule.id
    }

    pub fn name(&self) -> &str {
        &self.rule.name
    }

    pub fn family(&self) -> &str {
        &self.rule.family
    }

    pub fn actions(&self) -> &[Action] {
        &self.rule.actions
    }

    /// 不含全局条件的条件列表
    pub fn non_global_criteria(&self) -> impl Iterator<Item = (usize, &CompiledCriterion)> {
        self.criteria
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.criterion.is_global)
    }
}

/// 编译正则模式
///
/// 支持裸模式（`^INC-(\d+)$`）与带分隔符的模式（`/^inc-(\d+)$/i`），
/// 分隔符形式可带 i/m/s/x 标志。
pub fn compile_pattern(pattern: &str) -> std::result::Result<Regex, regex::Error> {
    if let Some(body) = pattern.strip_prefix('/') {
        if let Some(end) = body.rfind('/') {
            let (expr, flags) = (&body[..end], &body[end + 1..]);
            if flags.chars().all(|c| "imsxu".contains(c)) {
                return RegexBuilder::new(expr)
                    .case_insensitive(flags.contains('i'))
                    .multi_line(flags.contains('m'))
                    .dot_matches_new_line(flags.contains('s'))
                    .ignore_whitespace(flags.contains('x'))
                    .build();
            }
        }
    }

    Regex::new(pattern)
}

/// 规则编译器
pub struct RuleCompiler {
    compile_version: u64,
}

impl RuleCompiler {
    pub fn new() -> Self {
        Self { compile_version: 0 }
    }

    /// 从 JSON 字符串编译规则
    pub fn compile_from_json(
        &mut self,
        json: &str,
        family: &FamilyCapabilities,
    ) -> Result<CompiledRule> {
        let rule: Rule = serde_json::from_str(json)?;
        self.compile(rule, family)
    }

    /// 编译规则
    pub fn compile(&mut self, rule: Rule, family: &FamilyCapabilities) -> Result<CompiledRule> {
        self.validate_rule(&rule, family)?;

        let criteria = rule
            .criteria
            .iter()
            .enumerate()
            .map(|(i, criterion)| -> Result<CompiledCriterion> {
                let regex = if criterion.condition.is_regex() {
                    let regex = compile_pattern(&criterion.pattern).map_err(|e| {
                        RuleError::InvalidPattern {
                            path: format!("criteria[{}]", i),
                            pattern: criterion.pattern.clone(),
                            reason: e.to_string(),
                        }
                    })?;
                    Some(regex)
                } else {
                    None
                };
                Ok(CompiledCriterion {
                    criterion: criterion.clone(),
                    regex,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let required_fields = rule.criteria.iter().map(|c| c.field.clone()).collect();

        self.compile_version += 1;

        Ok(CompiledRule {
            rule,
            criteria,
            required_fields,
            compile_version: self.compile_version,
        })
    }

    /// 验证规则结构
    fn validate_rule(&self, rule: &Rule, family: &FamilyCapabilities) -> Result<()> {
        if rule.id.is_empty() {
            return Err(RuleError::ParseError("规则 ID 不能为空".to_string()));
        }

        if rule.name.is_empty() {
            return Err(RuleError::ParseError("规则名称不能为空".to_string()));
        }

        if rule.family != family.name() {
            return Err(RuleError::CompileError(format!(
                "规则 '{}' 属于规则族 {}，不能按 {} 编译",
                rule.id,
                rule.family,
                family.name()
            )));
        }

        for (i, criterion) in rule.criteria.iter().enumerate() {
            if criterion.field.is_empty() {
                return Err(RuleError::CompileError(format!(
                    "条件 'criteria[{}]' 的字段不能为空",
                    i
                )));
            }
            if !family.accepts_criterion(&criterion.field) {
                return Err(RuleError::UnknownField {
                    family: family.name().to_string(),
                    field: criterion.field.clone(),
                });
            }
        }

        for (i, action) in rule.actions.iter().enumerate() {
            self.validate_action(action, i, family)?;
        }

        Ok(())
    }

    /// 验证动作字段与值类型
    fn validate_action(&self, action: &Action, index: usize, family: &FamilyCapabilities) -> Result<()> {
        if action.field.is_empty() && action.action_type != ActionType::StopProcessing {
            return Err(RuleError::CompileError(format!(
                "动作 'actions[{}]' 的字段不能为空",
                index
            )));
        }

        if action.action_type == ActionType::StopProcessing {
            return Ok(());
        }

        if !family.accepts_action(&action.field) {
            return Err(RuleError::UnknownField {
                family: family.name().to_string(),
                field: action.field.clone(),
            });
        }

        // 只有字面赋值能在编译期检查类型
        if action.action_type == ActionType::Assign {
            if let Some(meta) = family.action_meta(&action.field) {
                let ok = match meta.value_type {
                    ValueType::Text => true,
                    ValueType::Number => {
                        action.value.is_number() || action.value_str().trim().parse::<f64>().is_ok()
                    }
                    ValueType::Boolean => {
                        action.value.is_boolean()
                            || matches!(action.value_str().as_str(), "0" | "1")
                    }
                };
                if !ok {
                    return Err(RuleError::CompileError(format!(
                        "动作 'actions[{}]' 的值 {} 与字段 {} 的类型 {:?} 不符",
                        index, action.value, action.field, meta.value_type
                    )));
                }
            }
        }

        Ok(())
    }
}

impl Default for RuleCompiler {
    fn default() -> Self {
        Self::new()
    }
}
