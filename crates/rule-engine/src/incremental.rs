//! 增量重评估控制
//!
//! 调用方只修改了部分字段时，仅重评估条件涉及这些字段的规则；规则命中并改变
//! 输出字段后把这些字段（及其关联条件字段）加入集合，供下一条规则或下一轮使用。

use crate::compiler::CompiledRule;
use crate::family::FamilyCapabilities;
use crate::models::{APPEND_SUFFIX, Record};
use std::collections::HashSet;

/// 增量重评估控制器
pub struct IncrementalController;

impl IncrementalController {
    /// 规则是否需要评估
    ///
    /// 未限定字段时任何有条件的规则都需要评估；限定时至少一个条件字段在集合中。
    pub fn is_eligible(rule: &CompiledRule, only_fields: Option<&HashSet<String>>) -> bool {
        if rule.criteria.is_empty() {
            return false;
        }

        match only_fields {
            None => true,
            Some(fields) => rule.required_fields.iter().any(|f| fields.contains(f)),
        }
    }

    /// 扩充脏字段集合
    ///
    /// 对命中规则的每个动作，若目标字段在前后输出中不同（或新出现），加入集合，
    /// 同时加入规则族为该字段声明的关联条件字段。返回新加入的字段数。
    pub fn expand_dirty_set(
        only_fields: &mut HashSet<String>,
        before: &Record,
        after: &Record,
        rule: &CompiledRule,
        family: &FamilyCapabilities,
    ) -> usize {
        let initial = only_fields.len();

        for action in rule.actions() {
            let changed_fields = Self::touched_fields(&action.field, family)
                .into_iter()
                .filter(|field| before.get(field) != after.get(field))
                .collect::<Vec<_>>();

            if changed_fields.is_empty() {
                continue;
            }

            only_fields.insert(action.field.clone());
            for field in changed_fields {
                for linked in family.linked_criteria(&field) {
                    only_fields.insert(linked.clone());
                }
                only_fields.insert(field);
            }
        }

        only_fields.len() - initial
    }

    /// 一个动作可能写入的输出字段
    fn touched_fields(field: &str, family: &FamilyCapabilities) -> Vec<String> {
        let mut fields = vec![field.to_string(), format!("{}{}", field, APPEND_SUFFIX)];
        if let Some(target) = family.action_meta(field).and_then(|m| m.append_to.clone()) {
            fields.push(target);
        }
        fields
    }
}
