//! 规则引擎错误类型
//!
//! 错误只出现在管理路径（编译、加载、排序）和配置缺失时；评估热路径对输入不报错。

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("规则解析失败: {0}")]
    ParseError(String),

    #[error("规则编译失败: {0}")]
    CompileError(String),

    #[error("无效的匹配模式: 条件 '{path}' 的模式 '{pattern}' 无法编译: {reason}")]
    InvalidPattern {
        path: String,
        pattern: String,
        reason: String,
    },

    #[error("字段不在规则族 {family} 的词汇表中: {field}")]
    UnknownField { family: String, field: String },

    #[error("规则族未注册: {0}")]
    FamilyNotRegistered(String),

    #[error("规则未找到: {0}")]
    RuleNotFound(String),

    #[error("JSON 序列化错误: {0}")]
    JsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RuleError>;
