use clap::Parser;
use guild_jukebox::bootstrap::{CacheServices, Overrides, build_sink, default_data_dir};
use guild_jukebox::cli::{Cli, Command};
use guild_jukebox::error::AppError;
use guild_jukebox::frontend::run_console;
use guild_jukebox::settings::{JukeboxSettings, load_settings};
use guild_jukebox::{JukeboxConfig, domain, logging, spawn_jukebox};
use std::path::Path;
use tokio::io::BufReader;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let cli = Cli::parse();
    let data_dir = cli.data_dir.clone().unwrap_or_else(default_data_dir);
    std::fs::create_dir_all(&data_dir)
        .map_err(|e| AppError::DataDir(format!("{}: {e}", data_dir.display())))?;

    let log_guard = logging::init(
        &data_dir,
        logging::LogConfig {
            dir: cli.log_dir.clone(),
            filter: cli.log_filter.clone(),
            stderr_warnings: true,
        },
    );
    tracing::info!(data_dir = %data_dir.display(), "guild-jukebox 启动");

    let mut settings = load_settings(&data_dir);
    Overrides {
        cache_dir: cli.cache_dir.clone(),
        sink: cli.sink,
        idle_timeout_secs: cli.idle_timeout_secs,
        scratch: cli.scratch,
    }
    .apply(&mut settings);

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            let result = run(&data_dir, settings).await;
            if let Err(e) = &result {
                tracing::error!(err = %e, "运行失败");
                eprintln!("❌ {e}");
            }
            drop(log_guard);
            // 标准输入的阻塞读取不会随运行时一起结束
            std::process::exit(i32::from(result.is_err()));
        }
        Command::Sweep => {
            let svc = CacheServices::build(&data_dir, &settings).inspect_err(|e| eprintln!("❌ {e}"))?;
            let report = svc.sweeper.sweep();
            println!(
                "已清理 {} 个文件，释放 {} 字节（保留 {} 个）",
                report.removed, report.bytes, report.kept
            );
            Ok(())
        }
        Command::Wipe => {
            let svc = CacheServices::build(&data_dir, &settings).inspect_err(|e| eprintln!("❌ {e}"))?;
            let report = svc.sweeper.full_wipe();
            println!(
                "已删除 {} 个缓存文件，释放 {} 字节",
                report.removed, report.bytes
            );
            Ok(())
        }
        Command::Resolve { url } => {
            let id = domain::resolve(url.trim()).map_err(|e| AppError::Other(e.to_string()))?;
            println!("{id}\t{}.{}", id.file_stem(), guild_jukebox::cache::CACHE_EXTENSION);
            Ok(())
        }
    }
}

async fn run(data_dir: &Path, settings: JukeboxSettings) -> Result<(), AppError> {
    let svc = CacheServices::build(data_dir, &settings)?;
    let sink = build_sink(&settings)?;

    let (tx_shutdown, rx_shutdown) = watch::channel(false);
    let sweeper_task = svc.sweeper.clone().spawn(
        settings.sweep_interval(),
        settings.full_wipe_interval(),
        rx_shutdown.clone(),
    );

    let (jukebox, events) = spawn_jukebox(JukeboxConfig {
        cache: svc.cache.clone(),
        sink,
        idle_timeout: settings.idle_timeout(),
        sweep_kick: Some(svc.sweeper.kick_handle()),
    });

    let tx_ctrl_c = tx_shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("收到 Ctrl-C，准备退出");
            let _ = tx_ctrl_c.send(true);
        }
    });

    println!("guild-jukebox 已就绪，输入格式: <tenant> <user> <voice|-> !play <url>");
    let console = run_console(
        jukebox.clone(),
        events,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
        rx_shutdown,
    )
    .await;

    jukebox.shutdown().await;
    let _ = tx_shutdown.send(true);
    if let Err(e) = sweeper_task.await {
        tracing::warn!(err = %e, "清理器退出异常");
    }
    if !settings.persist_cache {
        let report = svc.sweeper.sweep();
        tracing::info!(removed = report.removed, "退出前清理临时缓存");
    }
    tracing::info!("guild-jukebox 退出");
    console.map_err(AppError::from)
}
