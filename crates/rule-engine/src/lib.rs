//! 条件/动作规则引擎
//!
//! 提供可复用的规则评估能力，支持：
//! - JSON 规则定义和规则族词汇表校验
//! - 条件评估与正则捕获聚合
//! - AND/OR 策略折叠与全局条件
//! - 动作执行与捕获替换
//! - 增量重评估与规则排序管理

pub mod actions;
pub mod captures;
pub mod compiler;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod family;
pub mod incremental;
pub mod models;
pub mod operators;
pub mod ranking;
pub mod ruleset;
pub mod store;
pub mod strategy;
pub mod substitution;

pub use actions::{ActionExecutor, ActionOutcome};
pub use captures::{CaptureMap, CaptureSet};
pub use compiler::{CompiledCriterion, CompiledRule, RuleCompiler};
pub use engine::RuleEngine;
pub use error::{Result, RuleError};
pub use evaluator::CriterionEvaluator;
pub use family::{
    ActionDispatcher, ActionMeta, CriterionMeta, FamilyCapabilities, FamilyRegistry, ValueType,
};
pub use incremental::IncrementalController;
pub use models::{
    Action, Criterion, EvaluationContext, ProcessOptions, ProcessOutcome, Record, Rule,
};
pub use operators::{ActionType, Condition, MatchStrategy};
pub use ranking::{Position, RankManager, RankScope};
pub use ruleset::{RuleSet, RuleSetResult};
pub use store::{RuleStore, RuleStoreStats};
pub use strategy::MatchStrategyResolver;
pub use substitution::{BraceSubstitutor, Substitutor};
