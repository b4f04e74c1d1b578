//! 规则调用编排
//!
//! `process` 把条件评估、策略折叠、动作执行与增量集合扩充串成一次单规则调用。
//! 每次调用新建评估上下文，同一规则可被并发调用。

use crate::actions::ActionExecutor;
use crate::compiler::CompiledRule;
use crate::error::{Result, RuleError};
use crate::family::{FamilyCapabilities, FamilyRegistry};
use crate::incremental::IncrementalController;
use crate::models::{EvaluationContext, MATCHED_MARKER, ProcessOptions, ProcessOutcome, Record};
use crate::strategy::MatchStrategyResolver;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// 规则引擎
#[derive(Debug, Clone, Default)]
pub struct RuleEngine {
    families: FamilyRegistry,
    /// 是否记录详细评估追踪
    trace_enabled: bool,
}

impl RuleEngine {
    pub fn new(families: FamilyRegistry) -> Self {
        Self {
            families,
            trace_enabled: false,
        }
    }

    /// 启用评估追踪
    pub fn with_trace(mut self) -> Self {
        self.trace_enabled = true;
        self
    }

    pub fn families(&self) -> &FamilyRegistry {
        &self.families
    }

    pub fn family(&self, name: &str) -> Result<Arc<FamilyCapabilities>> {
        self.families
            .get(name)
            .ok_or_else(|| RuleError::FamilyNotRegistered(name.to_string()))
    }

    /// 对一条规则处理一次输入
    ///
    /// 命中时执行动作、写入 `matched` 标记，并在限定字段模式下扩充
    /// `options.only_fields` 回传给调用方。
    pub fn process(
        &self,
        rule: &CompiledRule,
        input: &Record,
        output: &mut Record,
        params: &Record,
        options: &mut ProcessOptions,
    ) -> Result<ProcessOutcome> {
        let family = self.family(rule.family())?;
        let start = Instant::now();
        let mut outcome = ProcessOutcome::new(rule.id().to_string(), rule.name().to_string());

        if !IncrementalController::is_eligible(rule, options.only_fields.as_ref()) {
            debug!(rule_id = %rule.id(), "规则与变更字段无关，跳过");
            return Ok(outcome);
        }

        let mut ctx = EvaluationContext::new();
        if self.trace_enabled {
            ctx = ctx.with_trace();
        }

        metrics::counter!("rule_engine_evaluations_total", "family" => rule.family().to_string())
            .increment(1);

        let matched = MatchStrategyResolver::new(&family).resolve(rule, input, &mut ctx);

        if matched {
            let before = options.only_fields.as_ref().map(|_| output.clone());

            let applied = ActionExecutor::new(&family).apply(rule.actions(), input, output, params, &ctx);
            output.insert(MATCHED_MARKER.to_string(), Value::Bool(true));

            if let (Some(only_fields), Some(before)) = (options.only_fields.as_mut(), before) {
                let added = IncrementalController::expand_dirty_set(only_fields, &before, output, rule, &family);
                if added > 0 {
                    debug!(rule_id = %rule.id(), added, "增量字段集合已扩充");
                }
            }

            metrics::counter!("rule_engine_matches_total", "family" => rule.family().to_string())
                .increment(1);

            outcome.matched = true;
            outcome.stop_requested = applied.stop_requested;
        }

        let elapsed = start.elapsed();
        metrics::histogram!("rule_engine_evaluation_duration_seconds").record(elapsed.as_secs_f64());

        debug!(
            rule_id = %rule.id(),
            rule_name = %rule.name(),
            matched = outcome.matched,
            stop_requested = outcome.stop_requested,
            captures = ctx.captures.len(),
            "规则评估完成"
        );

        outcome.matched_criteria = ctx.matched_criteria;
        outcome.evaluation_trace = ctx.trace;
        outcome.captures = ctx.captures.into_vec();
        outcome.evaluation_time_us = elapsed.as_micros() as i64;

        Ok(outcome)
    }
}
