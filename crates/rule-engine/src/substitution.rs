//! 捕获组模板替换
//!
//! `regex_result` / `append_regex_result` 通过可插拔的替换器把捕获组写入动作值。

use crate::captures::CaptureMap;
use regex::{Captures, Regex};
use std::sync::LazyLock;

/// 模板替换器
pub trait Substitutor: Send + Sync {
    fn substitute(&self, template: &str, captures: &CaptureMap) -> String;
}

impl<F> Substitutor for F
where
    F: Fn(&str, &CaptureMap) -> String + Send + Sync,
{
    fn substitute(&self, template: &str, captures: &CaptureMap) -> String {
        self(template, captures)
    }
}

static BRACE_PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([A-Za-z0-9_]+)\}").expect("placeholder pattern is valid"));

/// 默认替换器：`{key}` 替换为同名捕获
///
/// 第 1 个捕获组对应 `{0}`，命名组使用组名；未知占位符原样保留。
#[derive(Debug, Clone, Copy, Default)]
pub struct BraceSubstitutor;

impl Substitutor for BraceSubstitutor {
    fn substitute(&self, template: &str, captures: &CaptureMap) -> String {
        BRACE_PLACEHOLDER
            .replace_all(template, |caps: &Captures| match captures.get(&caps[1]) {
                Some(value) => value.clone(),
                None => caps[0].to_string(),
            })
            .into_owned()
    }
}
