//! 匹配策略解析
//!
//! 按规则的 AND/OR 策略短路折叠非全局条件，折叠成功后再执行规则族的全局条件检查。

use crate::compiler::CompiledRule;
use crate::evaluator::CriterionEvaluator;
use crate::family::FamilyCapabilities;
use crate::models::{EvaluationContext, Record, get_field};
use crate::operators::MatchStrategy;

/// 匹配策略解析器
pub struct MatchStrategyResolver<'a> {
    family: &'a FamilyCapabilities,
}

impl<'a> MatchStrategyResolver<'a> {
    pub fn new(family: &'a FamilyCapabilities) -> Self {
        Self { family }
    }

    /// 判断规则是否命中
    ///
    /// 没有任何条件（含全局条件）的规则永不命中。
    pub fn resolve(&self, rule: &CompiledRule, input: &Record, ctx: &mut EvaluationContext) -> bool {
        if rule.criteria.is_empty() {
            ctx.push_trace(|| format!("rule {}: 无条件，跳过", rule.id()));
            return false;
        }

        let folded = self.fold(rule, input, ctx);
        if !folded {
            return false;
        }

        // 折叠成功后才执行全局检查，顺序固定
        let global = self.family.check_global_criteria(input);
        ctx.push_trace(|| {
            format!(
                "rule {}: 全局条件检查 => {}",
                rule.id(),
                if global { "MATCHED" } else { "NOT_MATCHED" }
            )
        });
        global
    }

    /// 短路折叠非全局条件
    fn fold(&self, rule: &CompiledRule, input: &Record, ctx: &mut EvaluationContext) -> bool {
        let evaluator = CriterionEvaluator::new(self.family);
        let strategy = rule.rule.match_strategy;

        ctx.push_trace(|| {
            format!(
                "rule {}: 开始评估 {} 组 (共 {} 个条件)",
                rule.id(),
                strategy,
                rule.criteria.len()
            )
        });

        match strategy {
            MatchStrategy::And => {
                // AND: 遇到 false 立即返回；无非全局条件时为 true
                for (i, criterion) in rule.non_global_criteria() {
                    let value = get_field(input, &criterion.criterion.field);
                    if !evaluator.evaluate(i, criterion, value, ctx) {
                        ctx.push_trace(|| format!("rule {}: AND 短路 - 条件 {} 不匹配", rule.id(), i));
                        return false;
                    }
                }
                ctx.push_trace(|| format!("rule {}: AND 组全部匹配", rule.id()));
                true
            }
            MatchStrategy::Or => {
                // OR: 遇到 true 立即返回；无非全局条件时为 false
                for (i, criterion) in rule.non_global_criteria() {
                    let value = get_field(input, &criterion.criterion.field);
                    if evaluator.evaluate(i, criterion, value, ctx) {
                        ctx.push_trace(|| format!("rule {}: OR 短路 - 条件 {} 匹配", rule.id(), i));
                        return true;
                    }
                }
                ctx.push_trace(|| format!("rule {}: OR 组无匹配", rule.id()));
                false
            }
        }
    }
}
