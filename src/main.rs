//! 程序入口：初始化日志，加载状态文件，依次应用 `路径=值` 赋值并输出最终状态

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value;
use tracing_subscriber::fmt::SubscriberBuilder;

use anystate::vm::bridge::{STATUS_ERROR_PREFIX, STATUS_LOADED, STATUS_READY, STATUS_SAVED};
use anystate::{FilePlugin, Persistence, PersistenceOptions, PersistencePlugin, Store, StoreConfig};

#[derive(Parser)]
#[command(name = "anystate")]
#[command(about = "可按路径寻址、可监听的 JSON 状态容器", long_about = None)]
struct Cli {
    /// 状态文件（JSON）；不存在时从空对象开始
    state: PathBuf,

    /// 赋值，形如 `user.name="bob"` 或 `items[0]=3`
    assignments: Vec<String>,

    /// 把最终状态写回状态文件
    #[arg(long)]
    save: bool,

    /// Store 配置文件（JSON）
    #[arg(short, long)]
    config: Option<PathBuf>,
}

/// 拆分 `路径=值`；值不是合法 JSON 时按字符串处理
fn parse_assignment(raw: &str) -> Result<(String, Value)> {
    let (path, value) = raw
        .split_once('=')
        .with_context(|| format!("赋值缺少 '=': {}", raw))?;
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((path.trim().to_string(), value))
}

fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(p) => StoreConfig::from_file(p)
            .with_context(|| format!("读取配置失败: {}", p.display()))?,
        None => StoreConfig::default(),
    };

    let file = FilePlugin::new(&cli.state);
    let initial = file
        .load()
        .with_context(|| format!("读取状态文件失败: {}", cli.state.display()))?
        .unwrap_or_else(|| Value::Object(Default::default()));
    let store = Store::builder().initial(initial).config(config).build();
    tracing::info!("{} ({})", STATUS_LOADED, cli.state.display());

    let persistence = Persistence::attach(
        &store,
        PersistenceOptions::default().plugin(file).auto_save(false),
    )?;

    for raw in &cli.assignments {
        let (path, value) = parse_assignment(raw)?;
        let label = path.clone();
        let unwatch = store.watch(path.as_str(), move |new, old| {
            tracing::info!("{}: {:?} -> {:?}", label, old, new);
        })?;
        store.set_item(path.as_str(), value)?;
        unwatch.unwatch();
    }

    println!("{}", serde_json::to_string_pretty(&store.get_state())?);

    if cli.save {
        persistence.save()?;
        tracing::info!("{} ({})", STATUS_SAVED, cli.state.display());
    }
    Ok(())
}

fn main() -> Result<()> {
    // 初始化日志输出
    let _ = SubscriberBuilder::default()
        .with_max_level(tracing::Level::INFO)
        .try_init();
    tracing::info!("{}", STATUS_READY);

    let cli = Cli::parse();
    run(cli).inspect_err(|e| tracing::error!("{}{:#}", STATUS_ERROR_PREFIX, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_assignment() {
        assert_eq!(parse_assignment("a.b=3").unwrap(), ("a.b".to_string(), json!(3)));
        assert_eq!(parse_assignment("name=bob").unwrap(), ("name".to_string(), json!("bob")));
        assert_eq!(
            parse_assignment("list[0]={\"k\":[1]}").unwrap(),
            ("list[0]".to_string(), json!({ "k": [1] }))
        );
        assert!(parse_assignment("novalue").is_err());
    }
}
