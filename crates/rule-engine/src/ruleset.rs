//! 规则集运行
//!
//! 按排序依次对规则族内的启用规则调用 `process`，在规则间传递增量字段集合，
//! 遇到停止请求即结束本轮。

use crate::compiler::CompiledRule;
use crate::engine::RuleEngine;
use crate::error::Result;
use crate::models::{MATCHED_MARKER, ProcessOptions, ProcessOutcome, Record, STOP_MARKER};
use std::collections::HashSet;
use tracing::{debug, info};

/// 规则集运行结果
#[derive(Debug, Clone, Default)]
pub struct RuleSetResult {
    pub output: Record,
    /// 命中规则的处理结果，按执行顺序
    pub outcomes: Vec<ProcessOutcome>,
    pub matched: bool,
    pub stopped: bool,
    pub passes: usize,
    /// 运行结束时的增量字段集合
    pub only_fields: Option<HashSet<String>>,
}

/// 某个规则族在某一时刻的规则快照，按排序升序
#[derive(Debug, Clone)]
pub struct RuleSet {
    family: String,
    rules: Vec<CompiledRule>,
}

impl RuleSet {
    /// 创建规则集，只保留启用的规则并按排序升序排列
    pub fn new(family: impl Into<String>, rules: Vec<CompiledRule>) -> Self {
        let family = family.into();
        let mut rules: Vec<CompiledRule> = rules
            .into_iter()
            .filter(|r| r.rule.is_active && r.rule.family == family)
            .collect();
        rules.sort_by_key(|r| r.rule.rank.unwrap_or(usize::MAX));

        Self { family, rules }
    }

    pub fn family(&self) -> &str {
        &self.family
    }

    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// 运行一轮，输出从空记录开始
    pub fn run(
        &self,
        engine: &RuleEngine,
        input: &Record,
        params: &Record,
        options: &mut ProcessOptions,
    ) -> Result<RuleSetResult> {
        let mut result = RuleSetResult::default();
        self.run_pass(engine, input, params, options, &mut result)?;
        result.only_fields = options.only_fields.clone();
        Ok(result)
    }

    /// 反复运行直到增量字段集合不再扩充
    ///
    /// 第一轮只评估与 `changed_fields` 相关的规则；之后每轮只评估与上一轮新增字段
    /// 相关的规则，条件看到的是输入叠加已有输出。遇到停止请求或达到 `max_passes` 时结束。
    pub fn run_until_stable(
        &self,
        engine: &RuleEngine,
        input: &Record,
        params: &Record,
        changed_fields: HashSet<String>,
        max_passes: usize,
    ) -> Result<RuleSetResult> {
        let mut result = RuleSetResult::default();
        let mut view = input.clone();
        let mut pending = changed_fields;
        let mut seen = pending.clone();

        while result.passes < max_passes && !pending.is_empty() {
            let mut options = ProcessOptions {
                only_fields: Some(pending.clone()),
            };
            self.run_pass(engine, &view, params, &mut options, &mut result)?;

            let widened = options.only_fields.unwrap_or_default();
            pending = widened.difference(&seen).cloned().collect();
            seen.extend(pending.iter().cloned());

            if result.stopped {
                break;
            }

            view = input.clone();
            view.extend(
                result
                    .output
                    .iter()
                    .filter(|(k, _)| k.as_str() != MATCHED_MARKER && k.as_str() != STOP_MARKER)
                    .map(|(k, v)| (k.clone(), v.clone())),
            );
        }

        info!(
            family = %self.family,
            passes = result.passes,
            matched = result.matched,
            fields = seen.len(),
            "增量重评估完成"
        );
        result.only_fields = Some(seen);
        Ok(result)
    }

    fn run_pass(
        &self,
        engine: &RuleEngine,
        input: &Record,
        params: &Record,
        options: &mut ProcessOptions,
        result: &mut RuleSetResult,
    ) -> Result<()> {
        result.passes += 1;

        for rule in &self.rules {
            let outcome = engine.process(rule, input, &mut result.output, params, options)?;
            if !outcome.matched {
                continue;
            }

            result.matched = true;
            let stop = outcome.stop_requested;
            result.outcomes.push(outcome);

            if stop {
                debug!(family = %self.family, rule_id = %rule.id(), "规则请求停止处理");
                result.stopped = true;
                break;
            }
        }

        Ok(())
    }
}
