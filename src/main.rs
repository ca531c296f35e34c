//! Mason - 方块世界建造编排核心
//!
//! 入口：加载配置、初始化日志、构造建造上下文，路由请求并规划站位，输出摘要与蓝图 JSON。
//!
//! 用法：`mason [--v2] [--config <path>] [--origin x,y,z] <request text...>`

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use mason::blueprint::BlockPos;
use mason::config::load_config;
use mason::{observability, plan_build, BuildContext, BuildRequest, RequestRouter, SessionOptions};

struct CliArgs {
    request: String,
    config: Option<PathBuf>,
    origin: BlockPos,
    enable_v2: bool,
}

fn parse_origin(value: &str) -> anyhow::Result<BlockPos> {
    let parts: Vec<i32> = value
        .split(',')
        .map(|p| p.trim().parse::<i32>())
        .collect::<Result<_, _>>()
        .with_context(|| format!("Invalid origin '{value}', expected x,y,z"))?;
    match parts.as_slice() {
        [x, y, z] => Ok(BlockPos::new(*x, *y, *z)),
        _ => bail!("Invalid origin '{value}', expected x,y,z"),
    }
}

fn parse_args() -> anyhow::Result<CliArgs> {
    let mut args = std::env::args().skip(1);
    let mut words: Vec<String> = Vec::new();
    let mut config = None;
    let mut origin = BlockPos::default();
    let mut enable_v2 = false;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--v2" => enable_v2 = true,
            "--config" => config = Some(PathBuf::from(args.next().context("--config needs a path")?)),
            "--origin" => origin = parse_origin(&args.next().context("--origin needs x,y,z")?)?,
            _ => words.push(arg),
        }
    }
    if words.is_empty() {
        bail!("Usage: mason [--v2] [--config <path>] [--origin x,y,z] <request text...>");
    }
    Ok(CliArgs {
        request: words.join(" "),
        config,
        origin,
        enable_v2,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let args = parse_args()?;
    let config = load_config(args.config).context("Failed to load config")?;
    tracing::info!(app = config.app.display_name(), provider = %config.llm.provider, "Starting");
    let ctx = Arc::new(BuildContext::from_config(config));

    let cancel = ctx.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl-C received, cancelling build");
            cancel.cancel();
        }
    });

    let request = BuildRequest::new(args.request)
        .with_origin(args.origin)
        .with_actor("cli");
    let session = SessionOptions {
        enable_v2: args.enable_v2,
    };

    let router = RequestRouter::new(ctx.clone());
    let routed = match router.route(&request, &session).await {
        Ok(routed) => routed,
        Err(e) => {
            observability::log_generation_summary(&ctx.client);
            eprintln!("Build failed at {}: {}", e.stage, e.kind);
            for issue in e.unresolved() {
                eprintln!("  - {issue}");
            }
            std::process::exit(1);
        }
    };
    observability::log_generation_summary(&ctx.client);

    let plan = plan_build(&routed, args.origin, &ctx.config).context("Failed to plan build")?;

    println!("pathway:    {}", routed.decision.pathway);
    if let Some(source) = &routed.decision.source {
        println!("source:     {source}");
    }
    for skipped in &routed.decision.fallthrough {
        println!("skipped:    {skipped}");
    }
    if let Some(report) = &routed.compound_report {
        println!(
            "components: {} succeeded, {} failed, {} dropped",
            report.succeeded.len(),
            report.failed.len(),
            report.dropped
        );
        for failure in &report.failed {
            println!("  failed {}: {}", failure.name, failure.reason);
        }
    }
    println!("operations: {}", plan.blueprint.operations.len());
    println!("blocks:     {}", plan.block_count());
    println!("stations:   {}", plan.station_count());
    println!(
        "{}",
        serde_json::to_string_pretty(&plan.blueprint).context("Failed to serialize blueprint")?
    );
    Ok(())
}
