//! 模拟器命令行入口
//!
//! 在单进程内搭起完整的奖励核心链路并驱动事件：
//!
//! ```bash
//! # 运行预定义场景
//! quest-sim run -n new-learner
//!
//! # 从文件加载自定义场景
//! quest-sim run -f my-scenario.json
//!
//! # 广播单个事件
//! quest-sim emit -e QUIZ_COMPLETED -u user-001 -d '{"quizId":"Q1","score":95}'
//! ```

use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::info;

use event_bus::{EventBus, EventLogFilter};
use badge_engine::{
    default_catalog, BadgeRepository, BadgeRuleEngine, MemoryBadgeRepository, UserState,
};
use quest_shared::cache::TtlCache;
use quest_shared::config::AppConfig;
use quest_shared::events::{EventType, GameEvent};
use quest_shared::observability;
use quest_simulator::producer::apply_event_to_state;
use quest_simulator::scenario::{predefined, Scenario};

#[derive(Parser)]
#[command(name = "quest-sim", about = "奖励核心事件模拟器")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 执行场景
    Run {
        /// 预定义场景名
        #[arg(short = 'n', long, default_value = "new-learner")]
        name: String,
        /// 从 JSON 文件加载场景（优先于 --name）
        #[arg(short = 'f', long)]
        file: Option<String>,
    },
    /// 广播单个事件
    Emit {
        /// 事件类型（如 QUIZ_COMPLETED）
        #[arg(short = 'e', long)]
        event_type: String,
        /// 用户 ID
        #[arg(short = 'u', long)]
        user_id: String,
        /// 事件业务数据（JSON 对象）
        #[arg(short = 'd', long, default_value = "{}")]
        data: String,
    },
}

/// 组装好的进程内核心
struct Core {
    bus: EventBus,
    cache: TtlCache<UserState>,
    repo: Arc<MemoryBadgeRepository>,
    engine: Arc<BadgeRuleEngine>,
}

fn build_core(config: &AppConfig) -> anyhow::Result<Core> {
    let bus = EventBus::new(&config.event_bus);
    let cache: TtlCache<UserState> = TtlCache::new(&config.cache);
    let repo = Arc::new(MemoryBadgeRepository::new());
    let engine = Arc::new(BadgeRuleEngine::new(
        Arc::clone(&repo) as Arc<dyn BadgeRepository>,
        cache.clone(),
        default_catalog(),
        &config.engine,
    ));
    BadgeRuleEngine::register_handlers(&engine, &bus)?;

    Ok(Core {
        bus,
        cache,
        repo,
        engine,
    })
}

/// 输出各组件的统计快照与用户徽章清单
async fn report(core: &Core, user_id: &str) -> anyhow::Result<()> {
    let badges = core.repo.list_user_badges(user_id).await?;

    let report = serde_json::json!({
        "bus": core.bus.stats(),
        "cache": core.cache.stats(),
        "engine": core.engine.stats(),
        "userBadges": badges,
        "recentEvents": core.bus.event_log(&EventLogFilter::default(), 20),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load("quest-simulator")
        .map_err(|e| anyhow::anyhow!("配置加载失败: {e}"))?;
    observability::init(&config.observability)?;

    let core = build_core(&config)?;
    core.cache.start_cleanup_worker().await;

    match cli.command {
        Commands::Run { name, file } => {
            let scenario = match file {
                Some(path) => {
                    let json = std::fs::read_to_string(&path)
                        .with_context(|| format!("读取场景文件 {path} 失败"))?;
                    Scenario::from_json(&json).context("场景文件解析失败")?
                }
                None => match predefined(&name) {
                    Some(s) => s,
                    None => bail!("未知场景: {name}"),
                },
            };

            let user_id = scenario.user_id.clone();
            scenario.play(&core.bus, &core.repo).await?;
            report(&core, &user_id).await?;
        }
        Commands::Emit {
            event_type,
            user_id,
            data,
        } => {
            let event_type: EventType =
                serde_json::from_value(serde_json::Value::String(event_type.clone()))
                    .map_err(|_| anyhow::anyhow!("未知事件类型: {event_type}"))?;
            let data: serde_json::Value =
                serde_json::from_str(&data).context("事件数据不是合法 JSON")?;

            let event = GameEvent::new(event_type, user_id.clone(), data, "simulator");
            apply_event_to_state(&core.repo, &event);
            core.bus.emit(event).await?;
            report(&core, &user_id).await?;
        }
    }

    core.cache.stop_cleanup_worker().await;
    info!("模拟器退出");
    Ok(())
}
