//! 规则族能力注册表
//!
//! 每个规则族声明合法的条件字段、动作字段及其元数据，并注入全局条件检查、
//! 层级判断、模板替换器与扩展动作处理器。引擎只通过注册表访问规则族差异。
//!
//! ## 使用示例
//!
//! ```ignore
//! let ticket = FamilyCapabilities::new("ticket")
//!     .with_criterion("itilcategory", CriterionMeta::default())
//!     .with_action("priority", ActionMeta::new(ValueType::Number))
//!     .with_global_check(|input| input.contains_key("entity"));
//!
//! let mut registry = FamilyRegistry::new();
//! registry.register(ticket);
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::models::{Action, Record};
use crate::substitution::{BraceSubstitutor, Substitutor};

/// 全局条件检查：(输入记录) -> 是否通过
pub type GlobalCheck = Arc<dyn Fn(&Record) -> bool + Send + Sync>;

/// 层级判断：(字段值, 祖先模式) -> 是否位于其下
pub type HierarchyCheck = Arc<dyn Fn(&str, &str) -> bool + Send + Sync>;

/// 层级路径分隔符（如 "Root > Child > Leaf"）
pub const HIERARCHY_SEPARATOR: &str = " > ";

/// 条件字段元数据
#[derive(Debug, Clone, Default)]
pub struct CriterionMeta {
    pub label: String,
    /// 与该字段语义耦合的其它条件字段，字段变化时一并加入增量集合
    pub linked_criteria: Vec<String>,
}

impl CriterionMeta {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            linked_criteria: Vec::new(),
        }
    }

    pub fn linked_to<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.linked_criteria
            .extend(fields.into_iter().map(Into::into));
        self
    }
}

/// 动作值类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValueType {
    #[default]
    Text,
    Number,
    Boolean,
}

/// 动作字段元数据
#[derive(Debug, Clone, Default)]
pub struct ActionMeta {
    pub value_type: ValueType,
    /// `append` 的目标列表字段，缺省为动作字段本身
    pub append_to: Option<String>,
    /// 非空时 `append` 推入 `{append_key: value}` 子对象而非标量
    pub append_key: Option<String>,
}

impl ActionMeta {
    pub fn new(value_type: ValueType) -> Self {
        Self {
            value_type,
            ..Default::default()
        }
    }

    pub fn append_to(mut self, field: impl Into<String>) -> Self {
        self.append_to = Some(field.into());
        self
    }

    pub fn append_as(mut self, key: impl Into<String>) -> Self {
        self.append_key = Some(key.into());
        self
    }
}

/// 扩展动作处理器
///
/// 处理规则族注册的非内置动作类型，返回需要合并进输出记录的字段。
#[cfg_attr(test, mockall::automock)]
pub trait ActionDispatcher: Send + Sync {
    fn dispatch(&self, action: &Action, input: &Record, output: &Record) -> Option<Record>;
}

/// 规则族能力
pub struct FamilyCapabilities {
    name: String,
    criteria: HashMap<String, CriterionMeta>,
    actions: HashMap<String, ActionMeta>,
    stop_fields: HashSet<String>,
    global_check: GlobalCheck,
    hierarchy: HierarchyCheck,
    substitutor: Arc<dyn Substitutor>,
    dispatchers: HashMap<String, Arc<dyn ActionDispatcher>>,
}

impl FamilyCapabilities {
    /// 创建规则族；未声明任何字段时词汇表不做限制
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            criteria: HashMap::new(),
            actions: HashMap::new(),
            stop_fields: HashSet::new(),
            global_check: Arc::new(|_: &Record| true),
            hierarchy: Arc::new(default_is_under),
            substitutor: Arc::new(BraceSubstitutor),
            dispatchers: HashMap::new(),
        }
    }

    pub fn with_criterion(mut self, field: impl Into<String>, meta: CriterionMeta) -> Self {
        self.criteria.insert(field.into(), meta);
        self
    }

    pub fn with_action(mut self, field: impl Into<String>, meta: ActionMeta) -> Self {
        self.actions.insert(field.into(), meta);
        self
    }

    /// 注册保留的停止字段：任何以它为目标的动作都会请求停止
    pub fn with_stop_field(mut self, field: impl Into<String>) -> Self {
        self.stop_fields.insert(field.into());
        self
    }

    pub fn with_global_check<F>(mut self, check: F) -> Self
    where
        F: Fn(&Record) -> bool + Send + Sync + 'static,
    {
        self.global_check = Arc::new(check);
        self
    }

    pub fn with_hierarchy<F>(mut self, check: F) -> Self
    where
        F: Fn(&str, &str) -> bool + Send + Sync + 'static,
    {
        self.hierarchy = Arc::new(check);
        self
    }

    pub fn with_substitutor(mut self, substitutor: Arc<dyn Substitutor>) -> Self {
        self.substitutor = substitutor;
        self
    }

    /// 注册扩展动作处理器，同类型已存在时替换
    pub fn with_dispatcher(
        mut self,
        action_type: impl Into<String>,
        dispatcher: Arc<dyn ActionDispatcher>,
    ) -> Self {
        let action_type = action_type.into();
        debug!(family = %self.name, action_type = %action_type, "注册扩展动作处理器");
        self.dispatchers.insert(action_type, dispatcher);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn accepts_criterion(&self, field: &str) -> bool {
        self.criteria.is_empty() || self.criteria.contains_key(field)
    }

    pub fn accepts_action(&self, field: &str) -> bool {
        self.actions.is_empty() || self.actions.contains_key(field) || self.is_stop_field(field)
    }

    pub fn criterion_meta(&self, field: &str) -> Option<&CriterionMeta> {
        self.criteria.get(field)
    }

    pub fn action_meta(&self, field: &str) -> Option<&ActionMeta> {
        self.actions.get(field)
    }

    /// 字段变化时需要一并重评估的条件字段
    pub fn linked_criteria(&self, field: &str) -> &[String] {
        self.criteria
            .get(field)
            .map(|meta| meta.linked_criteria.as_slice())
            .unwrap_or(&[])
    }

    pub fn is_stop_field(&self, field: &str) -> bool {
        self.stop_fields.contains(field)
    }

    pub fn check_global_criteria(&self, input: &Record) -> bool {
        (self.global_check)(input)
    }

    pub fn is_under(&self, value: &str, ancestor: &str) -> bool {
        (self.hierarchy)(value, ancestor)
    }

    pub fn substitute(&self, template: &str, captures: &crate::captures::CaptureMap) -> String {
        self.substitutor.substitute(template, captures)
    }

    pub fn dispatcher(&self, action_type: &str) -> Option<&Arc<dyn ActionDispatcher>> {
        self.dispatchers.get(action_type)
    }
}

impl fmt::Debug for FamilyCapabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FamilyCapabilities")
            .field("name", &self.name)
            .field("criteria", &self.criteria.len())
            .field("actions", &self.actions.len())
            .field("stop_fields", &self.stop_fields)
            .field("dispatchers", &self.dispatchers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// 默认层级判断：值等于祖先，或以 "祖先 > " 开头
pub fn default_is_under(value: &str, ancestor: &str) -> bool {
    if value == ancestor {
        return true;
    }
    value
        .strip_prefix(ancestor)
        .is_some_and(|rest| rest.starts_with(HIERARCHY_SEPARATOR))
}

/// 规则族注册表
#[derive(Debug, Default, Clone)]
pub struct FamilyRegistry {
    families: HashMap<String, Arc<FamilyCapabilities>>,
}

impl FamilyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册规则族，同名已存在时替换
    pub fn register(&mut self, family: FamilyCapabilities) -> &mut Self {
        info!(family = %family.name(), "注册规则族");
        self.families
            .insert(family.name().to_string(), Arc::new(family));
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<FamilyCapabilities>> {
        self.families.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.families.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.families.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.families.len()
    }

    pub fn is_empty(&self) -> bool {
        self.families.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_open_vocabulary() {
        let family = FamilyCapabilities::new("open");
        assert!(family.accepts_criterion("anything"));
        assert!(family.accepts_action("anything"));
    }

    #[test]
    fn test_declared_vocabulary() {
        let family = FamilyCapabilities::new("ticket")
            .with_criterion("name", CriterionMeta::new("Title"))
            .with_action("priority", ActionMeta::new(ValueType::Number))
            .with_stop_field("_stop_rules_processing");

        assert!(family.accepts_criterion("name"));
        assert!(!family.accepts_criterion("serial"));
        assert!(family.accepts_action("priority"));
        assert!(family.accepts_action("_stop_rules_processing"));
        assert!(!family.accepts_action("location"));
    }

    #[test]
    fn test_linked_criteria() {
        let family = FamilyCapabilities::new("ticket").with_criterion(
            "itilcategories_id",
            CriterionMeta::new("Category").linked_to(["itilcategories_id_code"]),
        );

        assert_eq!(
            family.linked_criteria("itilcategories_id"),
            &["itilcategories_id_code".to_string()]
        );
        assert!(family.linked_criteria("name").is_empty());
    }

    #[test]
    fn test_global_check_default_and_override() {
        let input = json!({"entity": "root"});
        let input = input.as_object().unwrap();

        assert!(FamilyCapabilities::new("a").check_global_criteria(input));

        let strict = FamilyCapabilities::new("b").with_global_check(|i| i.contains_key("serial"));
        assert!(!strict.check_global_criteria(input));
    }

    #[test]
    fn test_default_is_under() {
        assert!(default_is_under("Root > Paris > Floor 2", "Root > Paris"));
        assert!(default_is_under("Root > Paris", "Root > Paris"));
        assert!(!default_is_under("Root > Parisian", "Root > Paris"));
        assert!(!default_is_under("Root", "Root > Paris"));
    }

    #[test]
    fn test_registry() {
        let mut registry = FamilyRegistry::new();
        registry
            .register(FamilyCapabilities::new("ticket"))
            .register(FamilyCapabilities::new("asset"));

        assert_eq!(registry.len(), 2);
        assert!(registry.contains("ticket"));
        assert!(registry.get("missing").is_none());
    }
}
