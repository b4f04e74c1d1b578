//! 规则引擎命令行工具
//!
//! 从 JSON 文件加载规则与输入记录，运行指定规则族并输出结果。

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use rule_engine::{
    FamilyCapabilities, FamilyRegistry, ProcessOptions, Record, Rule, RuleEngine, RuleSetResult,
    RuleStore,
};
use ruleset_shared::config::AppConfig;
use ruleset_shared::observability;
use serde_json::{Value, json};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// 规则引擎命令行工具
#[derive(Parser, Debug)]
#[command(name = "rule-engine")]
#[command(version, about = "条件/动作规则引擎")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 对输入记录运行规则族
    Run {
        /// 规则文件（JSON 数组）
        #[arg(short, long)]
        rules: PathBuf,

        /// 输入记录文件（JSON 对象）
        #[arg(short, long)]
        input: PathBuf,

        /// 参数记录文件（JSON 对象）
        #[arg(short, long)]
        params: Option<PathBuf>,

        /// 只重评估与这些字段相关的规则，逗号分隔
        #[arg(long, value_delimiter = ',')]
        only_fields: Option<Vec<String>>,

        /// 规则族，缺省取配置中的 default_family
        #[arg(short, long)]
        family: Option<String>,

        /// 输出评估追踪
        #[arg(long)]
        trace: bool,
    },

    /// 校验规则文件
    Validate {
        /// 规则文件（JSON 数组）
        #[arg(short, long)]
        rules: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load("rule-engine").unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {}", e);
        AppConfig::default()
    });

    let obs_config = config
        .observability
        .clone()
        .with_service_name(&config.service_name);
    observability::init(&obs_config)?;

    match cli.command {
        Commands::Run {
            rules,
            input,
            params,
            only_fields,
            family,
            trace,
        } => {
            let rules = read_rules(&rules)?;
            let input = read_record(&input)?;
            let params = match params {
                Some(path) => read_record(&path)?,
                None => Record::new(),
            };
            let family = family.unwrap_or_else(|| config.engine.default_family.clone());

            let registry = open_families(&rules, &family);
            let store = RuleStore::new(registry.clone());
            let loaded = store.load_batch(rules);
            info!("已加载 {} 条规则", loaded.len());

            let mut engine = RuleEngine::new(registry);
            if trace || config.engine.trace_enabled {
                engine = engine.with_trace();
            }

            let rule_set = store.rule_set(&family);
            if rule_set.is_empty() {
                warn!("规则族 {} 没有启用的规则", family);
            }

            let result = match only_fields {
                Some(fields) => rule_set.run_until_stable(
                    &engine,
                    &input,
                    &params,
                    fields.into_iter().collect(),
                    config.engine.max_passes,
                )?,
                None => rule_set.run(&engine, &input, &params, &mut ProcessOptions::default())?,
            };

            println!("{}", serde_json::to_string_pretty(&render(&result, trace))?);
        }
        Commands::Validate { rules } => {
            let rules = read_rules(&rules)?;
            let total = rules.len();
            let store = RuleStore::new(open_families(&rules, ""));

            let mut failed = 0;
            for rule in rules {
                let label = format!("{} ({})", rule.id, rule.name);
                match store.load(rule) {
                    Ok(rank) => println!("ok    {} rank={}", label, rank),
                    Err(e) => {
                        failed += 1;
                        println!("error {}: {}", label, e);
                    }
                }
            }

            if failed > 0 {
                bail!("{} / {} 条规则校验失败", failed, total);
            }
            println!("{} 条规则全部通过校验", total);
        }
    }

    Ok(())
}

fn read_rules(path: &Path) -> Result<Vec<Rule>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("读取规则文件失败: {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("解析规则文件失败: {}", path.display()))
}

fn read_record(path: &Path) -> Result<Record> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("读取记录文件失败: {}", path.display()))?;
    match serde_json::from_str(&text)? {
        Value::Object(record) => Ok(record),
        other => bail!("{} 不是 JSON 对象: {}", path.display(), other),
    }
}

/// 为规则文件中出现的每个规则族注册开放词汇表
fn open_families(rules: &[Rule], extra: &str) -> FamilyRegistry {
    let mut names: BTreeSet<&str> = rules.iter().map(|r| r.family.as_str()).collect();
    if !extra.is_empty() {
        names.insert(extra);
    }

    let mut registry = FamilyRegistry::new();
    for name in names {
        registry.register(FamilyCapabilities::new(name));
    }
    registry
}

fn render(result: &RuleSetResult, trace: bool) -> Value {
    let mut rendered = json!({
        "output": result.output,
        "matched": result.matched,
        "stopped": result.stopped,
        "passes": result.passes,
        "matched_rules": result
            .outcomes
            .iter()
            .map(|o| o.rule_id.as_str())
            .collect::<Vec<_>>(),
    });

    if let Some(fields) = &result.only_fields {
        let fields: BTreeSet<&String> = fields.iter().collect();
        rendered["only_fields"] = json!(fields);
    }
    if trace {
        rendered["outcomes"] = json!(result.outcomes);
    }
    rendered
}
