//! 规则操作符定义
//!
//! 包括条件操作符、匹配策略以及动作类型。

use serde::{Deserialize, Serialize};
use std::fmt;

/// 条件操作符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    // 相等
    Is,
    IsNot,

    // 子串
    Contains,
    NotContain,

    // 前缀/后缀
    Begins,
    Ends,

    // 正则（捕获组提供给后续动作）
    RegexMatch,
    RegexNotMatch,

    // 存在性
    Exists,
    NotExists,

    // 全局查找，单条件阶段恒为真，实际效果由规则族的全局检查决定
    Find,

    // 层级归属
    Under,
    NotUnder,

    // 空值
    IsEmpty,

    // 网段
    IsCidr,
    NotCidr,

    // 日期比较
    DateBefore,
    DateAfter,
    DateEqual,
    DateNotEqual,
}

impl Condition {
    /// 否定型条件：多值字段要求每个元素都满足
    ///
    /// 其余条件只需任一元素满足。
    pub fn is_negative(&self) -> bool {
        matches!(
            self,
            Self::IsNot | Self::NotContain | Self::RegexNotMatch | Self::NotExists | Self::DateNotEqual
        )
    }

    /// 是否为正则条件
    pub fn is_regex(&self) -> bool {
        matches!(self, Self::RegexMatch | Self::RegexNotMatch)
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Is => "is",
            Self::IsNot => "is_not",
            Self::Contains => "contains",
            Self::NotContain => "not_contain",
            Self::Begins => "begins",
            Self::Ends => "ends",
            Self::RegexMatch => "regex_match",
            Self::RegexNotMatch => "regex_not_match",
            Self::Exists => "exists",
            Self::NotExists => "not_exists",
            Self::Find => "find",
            Self::Under => "under",
            Self::NotUnder => "not_under",
            Self::IsEmpty => "is_empty",
            Self::IsCidr => "is_cidr",
            Self::NotCidr => "not_cidr",
            Self::DateBefore => "date_before",
            Self::DateAfter => "date_after",
            Self::DateEqual => "date_equal",
            Self::DateNotEqual => "date_not_equal",
        };
        write!(f, "{}", s)
    }
}

/// 匹配策略（规则内非全局条件的折叠方式）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MatchStrategy {
    #[default]
    And,
    Or,
}

impl fmt::Display for MatchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::And => write!(f, "AND"),
            Self::Or => write!(f, "OR"),
        }
    }
}

/// 动作类型
///
/// 未知的类型名保留为扩展类型，交给规则族注册的扩展处理器。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ActionType {
    Assign,
    Append,
    RegexResult,
    AppendRegexResult,
    StopProcessing,
    Extension(String),
}

impl ActionType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Assign => "assign",
            Self::Append => "append",
            Self::RegexResult => "regex_result",
            Self::AppendRegexResult => "append_regex_result",
            Self::StopProcessing => "stop_processing",
            Self::Extension(name) => name,
        }
    }
}

impl From<String> for ActionType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "assign" => Self::Assign,
            "append" => Self::Append,
            "regex_result" => Self::RegexResult,
            "append_regex_result" => Self::AppendRegexResult,
            "stop_processing" => Self::StopProcessing,
            _ => Self::Extension(s),
        }
    }
}

impl From<&str> for ActionType {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<ActionType> for String {
    fn from(action_type: ActionType) -> Self {
        action_type.as_str().to_string()
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negative_conditions() {
        let negatives = [
            Condition::IsNot,
            Condition::NotContain,
            Condition::RegexNotMatch,
            Condition::NotExists,
            Condition::DateNotEqual,
        ];
        for cond in negatives {
            assert!(cond.is_negative(), "{} 应为否定型条件", cond);
        }

        // not_under / not_cidr 按正向条件折叠
        assert!(!Condition::NotUnder.is_negative());
        assert!(!Condition::NotCidr.is_negative());
        assert!(!Condition::Is.is_negative());
    }

    #[test]
    fn test_action_type_serde() {
        let parsed: ActionType = serde_json::from_str(r#""regex_result""#).unwrap();
        assert_eq!(parsed, ActionType::RegexResult);

        let ext: ActionType = serde_json::from_str(r#""affect_by_ip""#).unwrap();
        assert_eq!(ext, ActionType::Extension("affect_by_ip".to_string()));
        assert_eq!(serde_json::to_string(&ext).unwrap(), r#""affect_by_ip""#);
    }

    #[test]
    fn test_strategy_serde() {
        let strategy: MatchStrategy = serde_json::from_str(r#""OR""#).unwrap();
        assert_eq!(strategy, MatchStrategy::Or);
        assert_eq!(strategy.to_string(), "OR");
    }
}
