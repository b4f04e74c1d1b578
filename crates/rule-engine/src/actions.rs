//! 动作执行器
//!
//! 按声明顺序把命中规则的动作应用到输出记录。输入记录只读。

use crate::family::FamilyCapabilities;
use crate::models::{
    APPEND_SUFFIX, Action, EvaluationContext, Record, STOP_MARKER, value_to_string,
};
use crate::operators::ActionType;
use serde_json::{Map, Value};
use tracing::debug;

/// 动作执行结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActionOutcome {
    pub applied: usize,
    pub stop_requested: bool,
}

/// 动作执行器
pub struct ActionExecutor<'a> {
    family: &'a FamilyCapabilities,
}

impl<'a> ActionExecutor<'a> {
    pub fn new(family: &'a FamilyCapabilities) -> Self {
        Self { family }
    }

    /// 依次执行动作
    ///
    /// `params` 为调用方提供的辅助值，`append_regex_result` 用它查找已有值。
    pub fn apply(
        &self,
        actions: &[Action],
        input: &Record,
        output: &mut Record,
        params: &Record,
        ctx: &EvaluationContext,
    ) -> ActionOutcome {
        let mut outcome = ActionOutcome::default();

        for action in actions {
            if action.action_type == ActionType::StopProcessing
                || self.family.is_stop_field(&action.field)
            {
                output.insert(STOP_MARKER.to_string(), Value::Bool(true));
                outcome.stop_requested = true;
                outcome.applied += 1;
                continue;
            }

            match &action.action_type {
                ActionType::Assign => {
                    output.insert(action.field.clone(), action.value.clone());
                }
                ActionType::Append => self.append(action, output, ctx),
                ActionType::RegexResult => {
                    output.insert(action.field.clone(), self.regex_result(action, ctx));
                }
                ActionType::AppendRegexResult => {
                    self.append_regex_result(action, output, params, ctx);
                }
                ActionType::Extension(name) => {
                    if !self.dispatch(name, action, input, output) {
                        continue;
                    }
                }
                ActionType::StopProcessing => {}
            }
            outcome.applied += 1;
        }

        outcome
    }

    /// 有捕获组时按模板替换，否则原样返回动作值
    fn regex_result(&self, action: &Action, ctx: &EvaluationContext) -> Value {
        match ctx.primary_captures() {
            Some(captures) => Value::String(self.family.substitute(&action.value_str(), captures)),
            None => action.value.clone(),
        }
    }

    /// 追加到列表字段
    fn append(&self, action: &Action, output: &mut Record, ctx: &EvaluationContext) {
        let meta = self.family.action_meta(&action.field);
        let target = meta
            .and_then(|m| m.append_to.clone())
            .unwrap_or_else(|| action.field.clone());

        let value = self.regex_result(action, ctx);
        let item = match meta.and_then(|m| m.append_key.as_ref()) {
            Some(key) => {
                let mut sub = Map::new();
                sub.insert(key.clone(), value);
                Value::Object(sub)
            }
            None => value,
        };

        match output.get_mut(&target) {
            Some(Value::Array(list)) => list.push(item),
            Some(existing) => {
                let previous = existing.take();
                *existing = Value::Array(vec![previous, item]);
            }
            None => {
                output.insert(target, Value::Array(vec![item]));
            }
        }
    }

    /// 已有值时拼接；否则同时写入 `<field>_append` 和 `<field>`
    fn append_regex_result(
        &self,
        action: &Action,
        output: &mut Record,
        params: &Record,
        ctx: &EvaluationContext,
    ) {
        let computed = value_to_string(&self.regex_result(action, ctx));

        match params.get(&action.field) {
            Some(prior) => {
                let combined = format!("{}{}", value_to_string(prior), computed);
                output.insert(action.field.clone(), Value::String(combined));
            }
            None => {
                output.insert(
                    format!("{}{}", action.field, APPEND_SUFFIX),
                    Value::String(computed.clone()),
                );
                output.insert(action.field.clone(), Value::String(computed));
            }
        }
    }

    /// 交给扩展处理器；没有处理器时为空操作
    fn dispatch(&self, name: &str, action: &Action, input: &Record, output: &mut Record) -> bool {
        let Some(dispatcher) = self.family.dispatcher(name) else {
            debug!(family = %self.family.name(), action_type = %name, "未注册的动作类型，忽略");
            return false;
        };

        if let Some(updates) = dispatcher.dispatch(action, input, output) {
            output.extend(updates);
        }
        true
    }
}
