//! 规则引擎领域模型

use crate::captures::{CaptureMap, CaptureSet};
use crate::operators::{ActionType, Condition, MatchStrategy};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use uuid::Uuid;

/// 输入/输出记录：字段名 -> 值（标量或标量列表）
pub type Record = Map<String, Value>;

/// 输出标记：有规则命中
pub const MATCHED_MARKER: &str = "matched";
/// 输出标记：请求停止后续规则
pub const STOP_MARKER: &str = "stop_requested";
/// 追加型输出字段后缀
pub const APPEND_SUFFIX: &str = "_append";

/// 规则定义
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub name: String,
    #[serde(default = "default_active")]
    pub is_active: bool,
    /// 期望排序；为空时追加到规则族末尾
    #[serde(default)]
    pub rank: Option<usize>,
    #[serde(default)]
    pub match_strategy: MatchStrategy,
    /// 规则族，决定条件/动作字段的词汇表
    pub family: String,
    /// 排序作用域（如实体），与规则族共同决定排序唯一性
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub criteria: Vec<Criterion>,
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_active() -> bool {
    true
}

impl Rule {
    pub fn new(name: impl Into<String>, family: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            is_active: true,
            rank: None,
            match_strategy: MatchStrategy::And,
            family: family.into(),
            scope: String::new(),
            criteria: Vec::new(),
            actions: Vec::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    pub fn with_strategy(mut self, strategy: MatchStrategy) -> Self {
        self.match_strategy = strategy;
        self
    }

    pub fn with_rank(mut self, rank: usize) -> Self {
        self.rank = Some(rank);
        self
    }

    pub fn with_criterion(mut self, criterion: Criterion) -> Self {
        self.criteria.push(criterion);
        self
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }
}

/// 条件：对单个字段的测试
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Criterion {
    pub field: String,
    pub condition: Condition,
    #[serde(default)]
    pub pattern: String,
    /// 全局条件不参与 AND/OR 折叠，交给规则族的全局检查
    #[serde(default)]
    pub is_global: bool,
}

impl Criterion {
    pub fn new(field: impl Into<String>, condition: Condition, pattern: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            condition,
            pattern: pattern.into(),
            is_global: false,
        }
    }

    pub fn global(mut self) -> Self {
        self.is_global = true;
        self
    }
}

/// 动作：对输出记录的单个修改
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub field: String,
    pub action_type: ActionType,
    #[serde(default)]
    pub value: Value,
}

impl Action {
    pub fn new(
        field: impl Into<String>,
        action_type: impl Into<ActionType>,
        value: impl Into<Value>,
    ) -> Self {
        Self {
            field: field.into(),
            action_type: action_type.into(),
            value: value.into(),
        }
    }

    /// 动作值的字符串形式（模板替换使用）
    pub fn value_str(&self) -> String {
        value_to_string(&self.value)
    }
}

/// 获取字段值
///
/// 先按完整字段名查找，再按点号路径查找（如 "user.profile.age" 或 "items.0.name"）。
pub fn get_field<'a>(record: &'a Record, path: &str) -> Option<&'a Value> {
    if let Some(value) = record.get(path) {
        return Some(value);
    }

    let mut parts = path.split('.');
    let mut current = record.get(parts.next()?)?;

    for part in parts {
        match current {
            Value::Object(map) => {
                current = map.get(part)?;
            }
            Value::Array(arr) => {
                let index: usize = part.parse().ok()?;
                current = arr.get(index)?;
            }
            _ => return None,
        }
    }

    Some(current)
}

/// 标量转字符串；null 视为空串
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(true) => "1".to_string(),
        Value::Bool(false) => "0".to_string(),
        other => other.to_string(),
    }
}

/// 单次调用的评估上下文
///
/// 每次 `process` 新建，不在规则对象上共享。
#[derive(Debug, Clone, Default)]
pub struct EvaluationContext {
    pub captures: CaptureSet,
    /// (条件下标, 结果)
    pub criteria_results: Vec<(usize, bool)>,
    pub matched_criteria: Vec<String>,
    pub trace: Vec<String>,
    trace_enabled: bool,
}

impl EvaluationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_trace(mut self) -> Self {
        self.trace_enabled = true;
        self
    }

    pub fn trace_enabled(&self) -> bool {
        self.trace_enabled
    }

    pub fn push_trace(&mut self, line: impl FnOnce() -> String) {
        if self.trace_enabled {
            self.trace.push(line());
        }
    }

    /// 供动作替换使用的捕获组（聚合结果的第一个组合）
    pub fn primary_captures(&self) -> Option<&CaptureMap> {
        self.captures.first()
    }
}

/// 调用选项
#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    /// 仅评估与这些字段相关的规则；命中后会被扩充，回传给调用方
    pub only_fields: Option<HashSet<String>>,
}

impl ProcessOptions {
    pub fn only_fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            only_fields: Some(fields.into_iter().map(Into::into).collect()),
        }
    }
}

/// 单条规则的处理结果
#[derive(Debug, Clone, Serialize)]
pub struct ProcessOutcome {
    pub matched: bool,
    pub stop_requested: bool,
    pub rule_id: String,
    pub rule_name: String,
    pub matched_criteria: Vec<String>,
    /// 全部捕获组组合（预览/诊断用）
    pub captures: Vec<CaptureMap>,
    pub evaluation_trace: Vec<String>,
    pub evaluation_time_us: i64,
}

impl ProcessOutcome {
    pub fn new(rule_id: String, rule_name: String) -> Self {
        Self {
            matched: false,
            stop_requested: false,
            rule_id,
            rule_name,
            matched_criteria: Vec::new(),
            captures: Vec::new(),
            evaluation_trace: Vec::new(),
            evaluation_time_us: 0,
        }
    }
}
