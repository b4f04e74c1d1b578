//! 条件评估器
//!
//! 对单个字段值测试单个条件，处理多值字段的折叠语义并提取正则捕获组。
//!
//! 多值字段的折叠方向不对称：
//! - 否定型条件（is_not / not_contain / regex_not_match / not_exists / date_not_equal）
//!   要求每个元素都满足，任一元素不满足即失败；
//! - 其余条件只需任一元素满足。
//!
//! 缺失字段与空列表按空字符串处理，不视为错误。

use crate::captures::CaptureMap;
use crate::compiler::CompiledCriterion;
use crate::family::FamilyCapabilities;
use crate::models::{EvaluationContext, value_to_string};
use crate::operators::Condition;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use serde_json::Value;
use std::net::IpAddr;

/// 条件评估器
pub struct CriterionEvaluator<'a> {
    family: &'a FamilyCapabilities,
}

impl<'a> CriterionEvaluator<'a> {
    pub fn new(family: &'a FamilyCapabilities) -> Self {
        Self { family }
    }

    /// 测试条件是否匹配，不记录捕获组
    pub fn matches(&self, criterion: &CompiledCriterion, field_value: Option<&Value>) -> bool {
        self.fold(criterion, field_value).0
    }

    /// 评估条件并把结果与捕获组写入本次调用的上下文
    pub fn evaluate(
        &self,
        index: usize,
        criterion: &CompiledCriterion,
        field_value: Option<&Value>,
        ctx: &mut EvaluationContext,
    ) -> bool {
        let (matched, captures) = self.fold(criterion, field_value);
        let cond = &criterion.criterion;

        ctx.push_trace(|| {
            format!(
                "criteria[{}]: {} {} '{}' => {}",
                index,
                cond.field,
                cond.condition,
                cond.pattern,
                if matched { "MATCHED" } else { "NOT_MATCHED" }
            )
        });

        ctx.criteria_results.push((index, matched));
        if matched {
            ctx.matched_criteria
                .push(format!("{} {} {}", cond.field, cond.condition, cond.pattern));
            ctx.captures.merge(captures);
        }

        matched
    }

    /// 按多值语义折叠
    fn fold(
        &self,
        criterion: &CompiledCriterion,
        field_value: Option<&Value>,
    ) -> (bool, Vec<CaptureMap>) {
        let values = Self::scalar_values(field_value);
        let condition = criterion.criterion.condition;
        let mut captures = Vec::new();

        if condition.is_negative() {
            let all = values
                .iter()
                .all(|v| self.test_one(criterion, v, &mut captures));
            return (all, Vec::new());
        }

        if condition == Condition::RegexMatch {
            // 不短路，收集每个命中元素的捕获组
            let mut any = false;
            for v in &values {
                any |= self.test_one(criterion, v, &mut captures);
            }
            return (any, captures);
        }

        let any = values
            .iter()
            .any(|v| self.test_one(criterion, v, &mut captures));
        (any, Vec::new())
    }

    /// 把字段值展开为字符串列表；缺失或空列表视为一个空串
    fn scalar_values(field_value: Option<&Value>) -> Vec<String> {
        match field_value {
            None => vec![String::new()],
            Some(Value::Array(arr)) if arr.is_empty() => vec![String::new()],
            Some(Value::Array(arr)) => arr.iter().map(value_to_string).collect(),
            Some(v) => vec![value_to_string(v)],
        }
    }

    /// 测试单个标量值
    fn test_one(&self, criterion: &CompiledCriterion, value: &str, captures: &mut Vec<CaptureMap>) -> bool {
        let pattern = criterion.criterion.pattern.as_str();

        match criterion.criterion.condition {
            Condition::Is => eq_ignore_case(value, pattern),
            Condition::IsNot => !eq_ignore_case(value, pattern),
            Condition::Contains => value.to_lowercase().contains(&pattern.to_lowercase()),
            Condition::NotContain => !value.to_lowercase().contains(&pattern.to_lowercase()),
            Condition::Begins => value.to_lowercase().starts_with(&pattern.to_lowercase()),
            Condition::Ends => value.to_lowercase().ends_with(&pattern.to_lowercase()),
            Condition::RegexMatch => match &criterion.regex {
                Some(regex) => match extract_captures(regex, value) {
                    Some(found) => {
                        if let Some(found) = found {
                            captures.push(found);
                        }
                        true
                    }
                    None => false,
                },
                None => false,
            },
            Condition::RegexNotMatch => match &criterion.regex {
                Some(regex) => !regex.is_match(value),
                None => true,
            },
            Condition::Exists => !value.is_empty(),
            Condition::NotExists => value.is_empty(),
            Condition::Find => true,
            Condition::Under => self.family.is_under(value, pattern),
            Condition::NotUnder => !self.family.is_under(value, pattern),
            Condition::IsEmpty => value.trim().is_empty(),
            Condition::IsCidr => cidr_contains(pattern, value),
            Condition::NotCidr => !cidr_contains(pattern, value),
            Condition::DateBefore => date_compare(value, pattern, |a, b| a < b),
            Condition::DateAfter => date_compare(value, pattern, |a, b| a > b),
            Condition::DateEqual => date_compare(value, pattern, |a, b| a == b),
            Condition::DateNotEqual => date_compare(value, pattern, |a, b| a != b),
        }
    }
}

fn eq_ignore_case(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

/// 正则匹配并提取捕获组
///
/// 未匹配返回 None；匹配但没有捕获组时返回 Some(None)。
/// 第 n 个捕获组的键为 n-1，命名组同时以组名为键。
fn extract_captures(regex: &Regex, value: &str) -> Option<Option<CaptureMap>> {
    let caps = regex.captures(value)?;
    if caps.len() <= 1 {
        return Some(None);
    }

    let mut map = CaptureMap::new();
    for (i, name) in regex.capture_names().enumerate().skip(1) {
        if let Some(m) = caps.get(i) {
            map.insert((i - 1).to_string(), m.as_str().to_string());
            if let Some(name) = name {
                map.insert(name.to_string(), m.as_str().to_string());
            }
        }
    }
    Some(Some(map))
}

/// 判断 IP 是否属于网段（"10.0.0.0/8"；不带前缀长度时按单个地址比较）
///
/// 任一侧无法解析或地址族不一致时返回 false。
pub fn cidr_contains(network: &str, ip: &str) -> bool {
    let (addr, prefix) = match network.trim().split_once('/') {
        Some((addr, prefix)) => match prefix.parse::<u32>() {
            Ok(prefix) => (addr, Some(prefix)),
            Err(_) => return false,
        },
        None => (network.trim(), None),
    };

    let (Ok(net), Ok(ip)) = (addr.parse::<IpAddr>(), ip.trim().parse::<IpAddr>()) else {
        return false;
    };

    match (net, ip) {
        (IpAddr::V4(net), IpAddr::V4(ip)) => {
            let prefix = prefix.unwrap_or(32);
            if prefix > 32 {
                return false;
            }
            let mask = u32::MAX.checked_shl(32 - prefix).unwrap_or(0);
            (u32::from(net) & mask) == (u32::from(ip) & mask)
        }
        (IpAddr::V6(net), IpAddr::V6(ip)) => {
            let prefix = prefix.unwrap_or(128);
            if prefix > 128 {
                return false;
            }
            let mask = u128::MAX.checked_shl(128 - prefix).unwrap_or(0);
            (u128::from(net) & mask) == (u128::from(ip) & mask)
        }
        _ => false,
    }
}

/// 日期比较；任一侧无法解析时不匹配
fn date_compare<F>(value: &str, pattern: &str, cmp: F) -> bool
where
    F: Fn(DateTime<Utc>, DateTime<Utc>) -> bool,
{
    match (parse_datetime(value), parse_datetime(pattern)) {
        (Some(a), Some(b)) => cmp(a, b),
        _ => false,
    }
}

/// 解析日期时间：RFC 3339、"YYYY-MM-DD HH:MM:SS"、"YYYY-MM-DD"
pub fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.and_utc());
    }

    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile_pattern;
    use crate::models::Criterion;
    use serde_json::json;

    fn criterion(field: &str, condition: Condition, pattern: &str) -> CompiledCriterion {
        let regex = if condition.is_regex() {
            Some(compile_pattern(pattern).unwrap())
        } else {
            None
        };
        CompiledCriterion {
            criterion: Criterion::new(field, condition, pattern),
            regex,
        }
    }

    fn check(condition: Condition, pattern: &str, value: Value) -> bool {
        let family = FamilyCapabilities::new("test");
        CriterionEvaluator::new(&family).matches(&criterion("f", condition, pattern), Some(&value))
    }

    #[test]
    fn test_equality_ignores_case() {
        assert!(check(Condition::Is, "Printer", json!("printer")));
        assert!(!check(Condition::Is, "printer", json!("scanner")));
        assert!(check(Condition::IsNot, "printer", json!("scanner")));
    }

    #[test]
    fn test_substring_prefix_suffix() {
        assert!(check(Condition::Contains, "down", json!("Printer DOWN again")));
        assert!(check(Condition::NotContain, "up", json!("printer down")));
        assert!(check(Condition::Begins, "srv", json!("SRV-01")));
        assert!(check(Condition::Ends, ".local", json!("host.local")));
        assert!(!check(Condition::Ends, ".local", json!("host.lan")));
    }

    #[test]
    fn test_multi_valued_fold_is_asymmetric() {
        let tags = json!(["vip", "urgent"]);
        // 否定型：任一元素不满足即失败
        assert!(!check(Condition::IsNot, "urgent", tags.clone()));
        // 正向：任一元素满足即成功
        assert!(check(Condition::Is, "urgent", tags.clone()));
        assert!(check(Condition::IsNot, "low", tags.clone()));
        assert!(!check(Condition::NotContain, "vi", tags));
    }

    #[test]
    fn test_missing_field_is_empty_string() {
        let family = FamilyCapabilities::new("test");
        let evaluator = CriterionEvaluator::new(&family);

        assert!(evaluator.matches(&criterion("f", Condition::NotExists, ""), None));
        assert!(!evaluator.matches(&criterion("f", Condition::Exists, ""), None));
        assert!(evaluator.matches(&criterion("f", Condition::IsEmpty, ""), None));
        assert!(evaluator.matches(&criterion("f", Condition::IsNot, "x"), None));
        assert!(!evaluator.matches(&criterion("f", Condition::Is, "x"), None));
    }

    #[test]
    fn test_empty_list_behaves_like_missing() {
        assert!(check(Condition::IsEmpty, "", json!([])));
        assert!(!check(Condition::Exists, "", json!([])));
    }

    #[test]
    fn test_find_always_passes() {
        assert!(check(Condition::Find, "", json!("whatever")));
    }

    #[test]
    fn test_regex_captures() {
        let family = FamilyCapabilities::new("test");
        let evaluator = CriterionEvaluator::new(&family);
        let mut ctx = EvaluationContext::new();

        let crit = criterion("ref", Condition::RegexMatch, r"^INC-(\d+)$");
        assert!(evaluator.evaluate(0, &crit, Some(&json!("INC-42")), &mut ctx));
        assert_eq!(ctx.primary_captures().unwrap()["0"], "42");
        assert_eq!(ctx.criteria_results, vec![(0, true)]);
    }

    #[test]
    fn test_regex_named_groups_and_delimiters() {
        let family = FamilyCapabilities::new("test");
        let evaluator = CriterionEvaluator::new(&family);
        let mut ctx = EvaluationContext::new();

        let crit = criterion("host", Condition::RegexMatch, r"/^(?P<site>[a-z]+)-srv$/i");
        assert!(evaluator.evaluate(0, &crit, Some(&json!("PARIS-SRV")), &mut ctx));

        let caps = ctx.primary_captures().unwrap();
        assert_eq!(caps["0"], "PARIS");
        assert_eq!(caps["site"], "PARIS");
    }

    #[test]
    fn test_regex_list_collects_every_matching_element() {
        let family = FamilyCapabilities::new("test");
        let evaluator = CriterionEvaluator::new(&family);
        let mut ctx = EvaluationContext::new();

        let crit = criterion("refs", Condition::RegexMatch, r"^INC-(\d+)$");
        let value = json!(["INC-1", "other", "INC-2"]);
        assert!(evaluator.evaluate(0, &crit, Some(&value), &mut ctx));
        assert_eq!(ctx.captures.len(), 2);
        assert_eq!(ctx.primary_captures().unwrap()["0"], "1");
    }

    #[test]
    fn test_regex_not_match() {
        assert!(check(Condition::RegexNotMatch, r"^\d+$", json!("abc")));
        assert!(!check(Condition::RegexNotMatch, r"^\d+$", json!(["abc", "123"])));
    }

    #[test]
    fn test_failed_criterion_adds_no_captures() {
        let family = FamilyCapabilities::new("test");
        let evaluator = CriterionEvaluator::new(&family);
        let mut ctx = EvaluationContext::new();

        let crit = criterion("ref", Condition::RegexMatch, r"^INC-(\d+)$");
        assert!(!evaluator.evaluate(0, &crit, Some(&json!("REQ-1")), &mut ctx));
        assert!(ctx.captures.is_empty());
    }

    #[test]
    fn test_hierarchy() {
        assert!(check(Condition::Under, "Root > Paris", json!("Root > Paris > Floor 2")));
        assert!(check(Condition::NotUnder, "Root > Paris", json!("Root > Lyon")));

        let family = FamilyCapabilities::new("ids").with_hierarchy(|value, ancestor| {
            value.split('/').any(|part| part == ancestor)
        });
        let evaluator = CriterionEvaluator::new(&family);
        assert!(evaluator.matches(
            &criterion("f", Condition::Under, "3"),
            Some(&json!("1/3/7"))
        ));
    }

    #[test]
    fn test_cidr() {
        assert!(check(Condition::IsCidr, "192.168.0.0/16", json!("192.168.10.5")));
        assert!(!check(Condition::IsCidr, "192.168.0.0/16", json!("10.0.0.1")));
        assert!(check(Condition::NotCidr, "192.168.0.0/16", json!("10.0.0.1")));
        assert!(check(Condition::IsCidr, "0.0.0.0/0", json!("8.8.8.8")));
        assert!(check(Condition::IsCidr, "fd00::/8", json!("fd12::1")));
        assert!(!check(Condition::IsCidr, "10.0.0.0/8", json!("not-an-ip")));
        assert!(!check(Condition::IsCidr, "10.0.0.0/40", json!("10.0.0.1")));
    }

    #[test]
    fn test_dates() {
        assert!(check(Condition::DateBefore, "2024-01-20", json!("2024-01-15T10:00:00Z")));
        assert!(check(Condition::DateAfter, "2024-01-15", json!("2024-01-15 08:30:00")));
        assert!(check(Condition::DateEqual, "2024-01-15", json!("2024-01-15 00:00:00")));
        assert!(check(Condition::DateNotEqual, "2024-01-15", json!("2024-01-16")));
        assert!(!check(Condition::DateBefore, "2024-01-20", json!("yesterday")));
    }

    #[test]
    fn test_numbers_compare_as_strings() {
        assert!(check(Condition::Is, "42", json!(42)));
        assert!(check(Condition::Is, "1", json!(true)));
    }
}
