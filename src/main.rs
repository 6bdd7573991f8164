use clap::Parser;
use mirrorsync_lib::logging::{init_logging, LogSink, Severity, TracingSink};
use mirrorsync_lib::storage::LocalStorage;
use mirrorsync_lib::{Cli, MirrorConfig, Reconciler, Scheduler};
use std::process;
use std::sync::Arc;
use tracing::error;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // 日志尚未初始化，参数错误直接输出到 stderr
    let config = match MirrorConfig::from_cli(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(2);
        }
    };

    if let Err(e) = init_logging(&config.log_dir, &config.log) {
        eprintln!("Failed to initialize logging: {:#}", e);
        process::exit(1);
    }

    let sink: Arc<dyn LogSink> = Arc::new(TracingSink);
    sink.record(
        Severity::Info,
        &format!(
            "Successfully passed {} as source path, {} as replica path, {} as log path, synchronization interval of {} seconds",
            config.source_root.display(),
            config.replica_root.display(),
            config.log_dir.display(),
            config.interval.as_secs()
        ),
    );

    let reconciler = Reconciler::with_config(Arc::new(LocalStorage::new()), config.sync.clone());
    let scheduler = Scheduler::new(
        reconciler,
        config.source_root.clone(),
        config.replica_root.clone(),
        config.interval,
        sink,
    );

    if config.once {
        match scheduler.tick().await {
            Some(Ok(report)) if report.entries_skipped == 0 => {}
            Some(Ok(_)) => process::exit(3),
            _ => process::exit(1),
        }
        return;
    }

    scheduler
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("无法监听退出信号: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;
}
