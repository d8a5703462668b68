use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use lastmile_config::AppConfig;
use lastmile_courier::ScanIntent;
use lastmile_infrastructure::{init_logging, init_metrics};
use tokio::signal;
use tracing::{error, info, warn};

mod app;
mod shutdown;

use app::{AppMode, Application};
use shutdown::ShutdownManager;

fn cli() -> Command {
    Command::new("lastmile")
        .version("1.0.0")
        .about("最后一公里配送调度与快递员设备端")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径（默认依次查找 config/lastmile.toml、lastmile.toml）"),
        )
        .arg(
            Arg::new("mode")
                .short('m')
                .long("mode")
                .value_name("MODE")
                .help("运行模式")
                .value_parser(["dispatcher", "dispatch-once", "courier", "scan", "queue"])
                .default_value("dispatcher"),
        )
        .arg(
            Arg::new("courier-id")
                .long("courier-id")
                .value_name("ID")
                .help("快递员ID (仅在courier模式下使用)")
                .required_if_eq("mode", "courier"),
        )
        .arg(
            Arg::new("code")
                .long("code")
                .value_name("CODE")
                .help("扫码内容 (仅在scan模式下使用)")
                .required_if_eq("mode", "scan"),
        )
        .arg(
            Arg::new("intent")
                .long("intent")
                .value_name("INTENT")
                .help("扫描包裹编号时的操作")
                .value_parser(["pickup", "depart", "deliver", "hub-drop-off"])
                .default_value("pickup"),
        )
        .arg(
            Arg::new("purge-dead-letters")
                .long("purge-dead-letters")
                .help("清理离线队列中的死信 (仅在queue模式下使用)")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别，覆盖配置文件")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式，覆盖配置文件")
                .value_parser(["json", "pretty"]),
        )
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();

    let config_path = matches.get_one::<String>("config").map(String::as_str);
    let mut config = AppConfig::load(config_path).context("加载配置失败")?;
    if let Some(level) = matches.get_one::<String>("log-level") {
        config.observability.log_level = level.clone();
    }
    if let Some(format) = matches.get_one::<String>("log-format") {
        config.observability.log_format = format.clone();
    }

    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
    )?;
    if let Some(address) = &config.observability.metrics_listen_address {
        init_metrics(address)?;
    }

    let mode = parse_app_mode(&matches)?;
    info!("启动最后一公里配送系统，模式: {:?}", mode);

    let app = Arc::new(Application::new(config, mode.clone()).await?);
    let shutdown_manager = ShutdownManager::new();

    if !mode.is_long_running() {
        let shutdown_rx = shutdown_manager.subscribe().await;
        return app.run(shutdown_rx).await;
    }

    let mut app_handle = {
        let shutdown_rx = shutdown_manager.subscribe().await;
        let app = Arc::clone(&app);
        tokio::spawn(async move {
            if let Err(e) = app.run(shutdown_rx).await {
                error!("应用运行失败: {e:#}");
            }
        })
    };

    // 应用自行结束（例如被强制下线）时不必等待信号
    let finished = tokio::select! {
        _ = wait_for_shutdown_signal() => {
            info!("收到关闭信号，开始优雅关闭...");
            None
        }
        result = &mut app_handle => Some(result),
    };

    shutdown_manager.shutdown().await;

    let result = match finished {
        Some(result) => Ok(result),
        None => tokio::time::timeout(Duration::from_secs(30), app_handle).await,
    };
    match result {
        Ok(Ok(())) => info!("应用已优雅关闭"),
        Ok(Err(e)) => error!("应用关闭时发生错误: {e}"),
        Err(_) => warn!("应用关闭超时，强制退出"),
    }

    info!("最后一公里配送系统已退出");
    Ok(())
}

/// 解析应用运行模式
fn parse_app_mode(matches: &ArgMatches) -> Result<AppMode> {
    let mode = matches
        .get_one::<String>("mode")
        .map(String::as_str)
        .unwrap_or("dispatcher");

    match mode {
        "dispatcher" => Ok(AppMode::Dispatcher),
        "dispatch-once" => Ok(AppMode::DispatchOnce),
        "courier" => {
            let courier_id = matches
                .get_one::<String>("courier-id")
                .context("courier模式需要 --courier-id")?;
            Ok(AppMode::Courier {
                courier_id: courier_id.clone(),
            })
        }
        "scan" => {
            let code = matches
                .get_one::<String>("code")
                .context("scan模式需要 --code")?;
            let intent = parse_intent(
                matches
                    .get_one::<String>("intent")
                    .map(String::as_str)
                    .unwrap_or("pickup"),
            )?;
            Ok(AppMode::Scan {
                code: code.clone(),
                intent,
            })
        }
        "queue" => Ok(AppMode::Queue {
            purge_dead_letters: matches.get_flag("purge-dead-letters"),
        }),
        _ => Err(anyhow::anyhow!("不支持的运行模式: {mode}")),
    }
}

fn parse_intent(intent: &str) -> Result<ScanIntent> {
    match intent {
        "pickup" => Ok(ScanIntent::Pickup),
        "depart" => Ok(ScanIntent::Depart),
        "deliver" => Ok(ScanIntent::Deliver),
        "hub-drop-off" => Ok(ScanIntent::HubDropOff),
        _ => Err(anyhow::anyhow!("不支持的扫码操作: {intent}")),
    }
}

/// 等待关闭信号
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("安装Ctrl+C信号处理器失败: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("安装SIGTERM信号处理器失败: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到Ctrl+C信号");
        },
        _ = terminate => {
            info!("收到SIGTERM信号");
        },
    }
}
