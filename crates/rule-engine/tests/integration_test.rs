//! 规则引擎集成测试
//!
//! 测试完整的规则加载、编译、执行工作流。

use rule_engine::{
    Action, ActionMeta, ActionType, CompiledRule, Condition, Criterion, CriterionMeta,
    FamilyCapabilities, FamilyRegistry, MatchStrategy, Position, ProcessOptions, RankScope,
    Record, Rule, RuleEngine, RuleError, RuleStore, ValueType,
};
use serde_json::{Value, json};
use std::collections::HashSet;

fn record(value: Value) -> Record {
    value.as_object().cloned().unwrap()
}

/// 工单规则族：字段词汇表、关联条件与 VIP 全局检查
fn ticket_family() -> FamilyCapabilities {
    FamilyCapabilities::new("ticket")
        .with_criterion("name", CriterionMeta::new("标题"))
        .with_criterion("ref", CriterionMeta::new("编号"))
        .with_criterion("tags", CriterionMeta::new("标签"))
        .with_criterion("category", CriterionMeta::new("分类"))
        .with_criterion("number", CriterionMeta::new("序号"))
        .with_criterion("opened_at", CriterionMeta::new("创建时间"))
        .with_criterion("source_ip", CriterionMeta::new("来源 IP"))
        .with_action("category", ActionMeta::new(ValueType::Text))
        .with_action("priority", ActionMeta::new(ValueType::Number))
        .with_action("number", ActionMeta::new(ValueType::Text))
        .with_action("summary", ActionMeta::new(ValueType::Text))
        .with_action("note", ActionMeta::new(ValueType::Text).append_to("notes"))
        .with_action("escalate", ActionMeta::new(ValueType::Boolean))
        .with_stop_field("escalate")
}

fn registry() -> FamilyRegistry {
    let mut registry = FamilyRegistry::new();
    registry.register(ticket_family());
    registry
}

/// 测试输入：一条打印机故障工单
fn ticket_input() -> Record {
    record(json!({
        "name": "printer down",
        "ref": "INC-42",
        "tags": ["vip", "urgent"],
        "opened_at": "2024-01-15T10:00:00Z",
        "source_ip": "10.1.2.3"
    }))
}

fn setup() -> (RuleStore, RuleEngine) {
    let registry = registry();
    (RuleStore::new(registry.clone()), RuleEngine::new(registry).with_trace())
}

fn load(store: &RuleStore, rule: Rule) -> CompiledRule {
    let id = rule.id.clone();
    store.load(rule).unwrap();
    store.get(&id).unwrap()
}

fn process(engine: &RuleEngine, rule: &CompiledRule, input: &Record) -> (bool, Record) {
    let mut output = Record::new();
    let outcome = engine
        .process(rule, input, &mut output, &Record::new(), &mut ProcessOptions::default())
        .unwrap();
    (outcome.matched, output)
}

#[test]
fn test_and_requires_every_criterion() {
    let (store, engine) = setup();

    let all = load(
        &store,
        Rule::new("all", "ticket")
            .with_id("and-all")
            .with_criterion(Criterion::new("name", Condition::Contains, "printer"))
            .with_criterion(Criterion::new("ref", Condition::Begins, "inc-"))
            .with_action(Action::new("category", ActionType::Assign, "hardware")),
    );
    let one_miss = load(
        &store,
        Rule::new("miss", "ticket")
            .with_id("and-miss")
            .with_criterion(Criterion::new("name", Condition::Contains, "printer"))
            .with_criterion(Criterion::new("ref", Condition::Begins, "REQ-"))
            .with_action(Action::new("category", ActionType::Assign, "hardware")),
    );

    let (matched, output) = process(&engine, &all, &ticket_input());
    assert!(matched);
    assert_eq!(output["category"], json!("hardware"));
    assert_eq!(output["matched"], json!(true));

    let (matched, output) = process(&engine, &one_miss, &ticket_input());
    assert!(!matched);
    assert!(output.is_empty());
}

#[test]
fn test_or_requires_one_criterion() {
    let (store, engine) = setup();

    let rule = load(
        &store,
        Rule::new("either", "ticket")
            .with_id("or-1")
            .with_strategy(MatchStrategy::Or)
            .with_criterion(Criterion::new("name", Condition::Contains, "scanner"))
            .with_criterion(Criterion::new("tags", Condition::Is, "urgent"))
            .with_action(Action::new("priority", ActionType::Assign, 1)),
    );

    let (matched, output) = process(&engine, &rule, &ticket_input());
    assert!(matched);
    assert_eq!(output["priority"], json!(1));

    let mut calm = ticket_input();
    calm.insert("tags".into(), json!(["low"]));
    let (matched, _) = process(&engine, &rule, &calm);
    assert!(!matched);
}

#[test]
fn test_global_only_rules_fold_by_strategy() {
    let (store, engine) = setup();

    let and_rule = load(
        &store,
        Rule::new("global and", "ticket")
            .with_id("global-and")
            .with_criterion(Criterion::new("tags", Condition::Is, "vip").global())
            .with_action(Action::new("priority", ActionType::Assign, 1)),
    );
    let or_rule = load(
        &store,
        Rule::new("global or", "ticket")
            .with_id("global-or")
            .with_strategy(MatchStrategy::Or)
            .with_criterion(Criterion::new("tags", Condition::Is, "vip").global())
            .with_action(Action::new("priority", ActionType::Assign, 1)),
    );

    assert!(process(&engine, &and_rule, &ticket_input()).0);
    assert!(!process(&engine, &or_rule, &ticket_input()).0);
}

#[test]
fn test_global_check_runs_after_fold() {
    let family = ticket_family().with_global_check(|input: &Record| {
        input
            .get("tags")
            .and_then(Value::as_array)
            .is_some_and(|tags| tags.contains(&json!("vip")))
    });
    let mut registry = FamilyRegistry::new();
    registry.register(family);
    let store = RuleStore::new(registry.clone());
    let engine = RuleEngine::new(registry);

    let rule = load(
        &store,
        Rule::new("vip printer", "ticket")
            .with_id("vip")
            .with_criterion(Criterion::new("name", Condition::Contains, "printer"))
            .with_action(Action::new("priority", ActionType::Assign, 1)),
    );

    assert!(process(&engine, &rule, &ticket_input()).0);

    let mut regular = ticket_input();
    regular.insert("tags".into(), json!(["urgent"]));
    assert!(!process(&engine, &rule, &regular).0);
}

#[test]
fn test_rule_without_criteria_never_matches() {
    let (store, engine) = setup();

    for strategy in [MatchStrategy::And, MatchStrategy::Or] {
        let rule = load(
            &store,
            Rule::new("empty", "ticket")
                .with_id(format!("empty-{}", strategy))
                .with_strategy(strategy)
                .with_action(Action::new("priority", ActionType::Assign, 1)),
        );
        let (matched, output) = process(&engine, &rule, &ticket_input());
        assert!(!matched);
        assert!(output.is_empty());
    }
}

#[test]
fn test_multi_valued_field_semantics() {
    let (store, engine) = setup();

    let negative = load(
        &store,
        Rule::new("not urgent", "ticket")
            .with_id("neg")
            .with_criterion(Criterion::new("tags", Condition::IsNot, "urgent"))
            .with_action(Action::new("priority", ActionType::Assign, 5)),
    );
    let positive = load(
        &store,
        Rule::new("urgent", "ticket")
            .with_id("pos")
            .with_criterion(Criterion::new("tags", Condition::Is, "urgent"))
            .with_action(Action::new("priority", ActionType::Assign, 1)),
    );

    assert!(!process(&engine, &negative, &ticket_input()).0);
    assert!(process(&engine, &positive, &ticket_input()).0);
}

#[test]
fn test_date_and_cidr_conditions() {
    let (store, engine) = setup();

    let rule = load(
        &store,
        Rule::new("internal 2024", "ticket")
            .with_id("date-cidr")
            .with_criterion(Criterion::new("opened_at", Condition::DateAfter, "2024-01-01"))
            .with_criterion(Criterion::new("source_ip", Condition::IsCidr, "10.0.0.0/8"))
            .with_action(Action::new("category", ActionType::Assign, "internal")),
    );

    assert!(process(&engine, &rule, &ticket_input()).0);

    let mut external = ticket_input();
    external.insert("source_ip".into(), json!("192.168.1.9"));
    assert!(!process(&engine, &rule, &external).0);
}

#[test]
fn test_regex_result_substitutes_capture() {
    let (store, engine) = setup();

    let rule = load(
        &store,
        Rule::new("extract number", "ticket")
            .with_id("regex")
            .with_criterion(Criterion::new("ref", Condition::RegexMatch, r"^INC-(\d+)$"))
            .with_action(Action::new("number", ActionType::RegexResult, "{0}")),
    );
    let literal = load(
        &store,
        Rule::new("no capture", "ticket")
            .with_id("literal")
            .with_criterion(Criterion::new("ref", Condition::Begins, "INC"))
            .with_action(Action::new("number", ActionType::RegexResult, "{0}")),
    );

    let (_, output) = process(&engine, &rule, &ticket_input());
    assert_eq!(output["number"], json!("42"));

    let (_, output) = process(&engine, &literal, &ticket_input());
    assert_eq!(output["number"], json!("{0}"));
}

#[test]
fn test_append_regex_result_with_and_without_prior() {
    let (store, engine) = setup();

    let rule = load(
        &store,
        Rule::new("summary", "ticket")
            .with_id("append-regex")
            .with_criterion(Criterion::new("ref", Condition::RegexMatch, r"^INC-(\d+)$"))
            .with_action(Action::new("summary", ActionType::AppendRegexResult, "#{0}")),
    );

    let mut output = Record::new();
    engine
        .process(&rule, &ticket_input(), &mut output, &Record::new(), &mut ProcessOptions::default())
        .unwrap();
    assert_eq!(output["summary"], json!("#42"));
    assert_eq!(output["summary_append"], json!("#42"));

    let params = record(json!({"summary": "printer"}));
    let mut output = Record::new();
    engine
        .process(&rule, &ticket_input(), &mut output, &params, &mut ProcessOptions::default())
        .unwrap();
    assert_eq!(output["summary"], json!("printer#42"));
    assert!(!output.contains_key("summary_append"));
}

#[test]
fn test_append_goes_to_declared_list() {
    let (store, engine) = setup();

    let rule = load(
        &store,
        Rule::new("notes", "ticket")
            .with_id("notes")
            .with_criterion(Criterion::new("ref", Condition::RegexMatch, r"^INC-(\d+)$"))
            .with_action(Action::new("note", ActionType::Append, "seen {0}"))
            .with_action(Action::new("note", ActionType::Append, "printer")),
    );

    let (_, output) = process(&engine, &rule, &ticket_input());
    assert_eq!(output["notes"], json!(["seen 42", "printer"]));
}

#[test]
fn test_capture_aggregation_across_criteria() {
    let (store, engine) = setup();

    let rule = load(
        &store,
        Rule::new("two regexes", "ticket")
            .with_id("captures")
            .with_criterion(Criterion::new("ref", Condition::RegexMatch, r"^INC-(\d+)$"))
            .with_criterion(Criterion::new(
                "name",
                Condition::RegexMatch,
                r"^(\w+) (?P<state>\w+)$",
            ))
            .with_action(Action::new("summary", ActionType::RegexResult, "{0}:{state}")),
    );

    let mut output = Record::new();
    let outcome = engine
        .process(&rule, &ticket_input(), &mut output, &Record::new(), &mut ProcessOptions::default())
        .unwrap();

    assert_eq!(outcome.captures.len(), 1);
    let first = &outcome.captures[0];
    assert_eq!(first["0"], "printer");
    assert_eq!(first["1"], "down");
    assert_eq!(first["state"], "down");
    assert_eq!(output["summary"], json!("printer:down"));
    assert!(!outcome.evaluation_trace.is_empty());
}

#[test]
fn test_store_ranking_insert_with_requested_rank() {
    let (store, _) = setup();
    for id in ["old0", "old1", "old2"] {
        store
            .load(
                Rule::new(id, "ticket")
                    .with_id(id)
                    .with_criterion(Criterion::new("name", Condition::Exists, "")),
            )
            .unwrap();
    }

    store
        .load(
            Rule::new("new", "ticket")
                .with_id("new")
                .with_rank(1)
                .with_criterion(Criterion::new("name", Condition::Exists, "")),
        )
        .unwrap();

    let ranks = store.ranks().list(&RankScope::family("ticket"));
    assert_eq!(
        ranks,
        vec![
            ("old0".to_string(), 0),
            ("new".to_string(), 1),
            ("old1".to_string(), 2),
            ("old2".to_string(), 3),
        ]
    );

    store.move_rule_relative("old0", "old2", Position::After).unwrap();
    let ranks: Vec<usize> = store
        .ranks()
        .list(&RankScope::family("ticket"))
        .into_iter()
        .map(|(_, rank)| rank)
        .collect();
    assert_eq!(ranks, vec![0, 1, 2, 3]);
    assert_eq!(store.get("old0").unwrap().rule.rank, Some(3));
}

#[test]
fn test_incremental_reevaluation_across_rules() {
    let (store, engine) = setup();

    // B 排在 A 之前，只能在下一轮看到 A 写入的 category
    store
        .load(
            Rule::new("B", "ticket")
                .with_id("b")
                .with_criterion(Criterion::new("category", Condition::Is, "hardware"))
                .with_action(Action::new("priority", ActionType::Assign, 2)),
        )
        .unwrap();
    store
        .load(
            Rule::new("A", "ticket")
                .with_id("a")
                .with_criterion(Criterion::new("name", Condition::Contains, "printer"))
                .with_action(Action::new("category", ActionType::Assign, "hardware")),
        )
        .unwrap();

    let set = store.rule_set("ticket");

    // 单轮：B 与 name 无关，A 命中后集合扩充 category
    let mut options = ProcessOptions::only_fields(["name"]);
    let result = set
        .run(&engine, &ticket_input(), &Record::new(), &mut options)
        .unwrap();
    assert_eq!(result.outcomes.len(), 1);
    assert!(!result.output.contains_key("priority"));
    assert!(options.only_fields.as_ref().unwrap().contains("category"));

    // 不动点：第二轮 B 可评估并命中
    let changed: HashSet<String> = ["name".to_string()].into();
    let result = set
        .run_until_stable(&engine, &ticket_input(), &Record::new(), changed, 8)
        .unwrap();
    assert_eq!(result.output["category"], json!("hardware"));
    assert_eq!(result.output["priority"], json!(2));
    assert!(result.passes >= 2);
}

#[test]
fn test_unrelated_only_fields_skip_rule() {
    let (store, engine) = setup();

    let rule = load(
        &store,
        Rule::new("B", "ticket")
            .with_id("b")
            .with_criterion(Criterion::new("category", Condition::Is, "hardware"))
            .with_action(Action::new("priority", ActionType::Assign, 2)),
    );

    let mut input = ticket_input();
    input.insert("category".into(), json!("hardware"));

    let mut output = Record::new();
    let mut options = ProcessOptions::only_fields(["name"]);
    let outcome = engine
        .process(&rule, &input, &mut output, &Record::new(), &mut options)
        .unwrap();

    assert!(!outcome.matched);
    assert!(output.is_empty());
}

#[test]
fn test_stop_field_halts_rule_set() {
    let (store, engine) = setup();

    store
        .load(
            Rule::new("escalate", "ticket")
                .with_id("stop")
                .with_criterion(Criterion::new("tags", Condition::Is, "urgent"))
                .with_action(Action::new("escalate", ActionType::Assign, true)),
        )
        .unwrap();
    store
        .load(
            Rule::new("later", "ticket")
                .with_id("later")
                .with_criterion(Criterion::new("name", Condition::Exists, ""))
                .with_action(Action::new("category", ActionType::Assign, "misc")),
        )
        .unwrap();

    let result = store
        .rule_set("ticket")
        .run(&engine, &ticket_input(), &Record::new(), &mut ProcessOptions::default())
        .unwrap();

    assert!(result.stopped);
    assert_eq!(result.output["stop_requested"], json!(true));
    assert!(!result.output.contains_key("category"));
}

#[test]
fn test_load_rejects_unknown_field_and_bad_pattern() {
    let (store, _) = setup();

    let unknown = Rule::new("bad field", "ticket")
        .with_id("unknown")
        .with_criterion(Criterion::new("assignee", Condition::Is, "bob"));
    assert!(matches!(store.load(unknown), Err(RuleError::UnknownField { .. })));

    let bad_regex = Rule::new("bad regex", "ticket")
        .with_id("regex")
        .with_criterion(Criterion::new("ref", Condition::RegexMatch, "(unclosed"));
    assert!(matches!(store.load(bad_regex), Err(RuleError::InvalidPattern { .. })));

    assert!(store.is_empty());
}

#[test]
fn test_load_from_json_and_run() {
    let (store, engine) = setup();
    let json = r#"
    {
        "id": "json-rule",
        "name": "硬件工单",
        "family": "ticket",
        "match_strategy": "OR",
        "criteria": [
            {"field": "name", "condition": "contains", "pattern": "PRINTER"},
            {"field": "ref", "condition": "regex_match", "pattern": "/^req-/i"}
        ],
        "actions": [
            {"field": "category", "action_type": "assign", "value": "hardware"}
        ]
    }
    "#;

    let id = store.load_from_json(json).unwrap();
    let rule = store.get(&id).unwrap();

    let (matched, output) = process(&engine, &rule, &ticket_input());
    assert!(matched);
    assert_eq!(output["category"], json!("hardware"));
}
