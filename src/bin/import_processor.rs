//! 单次导入执行器：由工作流系统以独立进程调用。
//!
//! 退出码：0 完成（含部分完成），1 导入失败，2 配置错误。

use clap::Parser;
use fieldgrid::bootstrap::{self, Repositories};
use fieldgrid::cluster::ClusterJobQueue;
use fieldgrid::config::Config;
use fieldgrid::ingest::{ImportProcessor, DEFAULT_BATCH_SIZE};
use fieldgrid::logging;
use fieldgrid::model::ImportJobStatus;
use log::{error, info, warn};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "import-processor", version, about = "处理一个已暂存的导入文件")]
struct Args {
    /// 导入任务 id
    #[arg(long, env = "IMPORT_JOB_ID")]
    import_job_id: Uuid,
    /// 对象存储中的导入文件 key
    #[arg(long = "s3-key", env = "IMPORT_OBJECT_KEY")]
    s3_key: String,
    #[arg(long, env = "IMPORT_BATCH_SIZE", default_value_t = DEFAULT_BATCH_SIZE as i64)]
    batch_size: i64,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();
    if let Err(e) = logging::init("import-processor") {
        eprintln!("⚠ 日志文件创建失败，输出到 stderr: {}", e);
    }

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("✗ 配置错误: {}", e);
            return ExitCode::from(2);
        }
    };

    match run(config, args).await {
        Ok(code) => code,
        Err(e) => {
            error!("✗ 导入失败: {:#}", e);
            ExitCode::from(1)
        }
    }
}

async fn run(config: Config, args: Args) -> anyhow::Result<ExitCode> {
    let db = bootstrap::connect(&config).await?;
    let repos = Repositories::sea_orm(db);
    let store = bootstrap::object_store(&config.object_store).await?;
    let processor = ImportProcessor::new(repos.import_jobs, repos.fields, store)
        .with_cluster_queue(ClusterJobQueue::new(repos.cluster_jobs));

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("⚠ 收到中断信号，取消导入");
            on_signal.cancel();
        }
    });

    info!(
        "▶ 开始导入 job={} key={} batch={}",
        args.import_job_id, args.s3_key, args.batch_size
    );
    let summary = processor
        .process(args.import_job_id, &args.s3_key, args.batch_size, &cancel)
        .await?;
    info!(
        "导入结束 job={} status={} processed={} failed={} total={}",
        summary.job_id,
        summary.status.as_str(),
        summary.processed,
        summary.failed,
        summary.total
    );
    Ok(match summary.status {
        ImportJobStatus::Completed | ImportJobStatus::PartiallyCompleted => ExitCode::SUCCESS,
        _ => ExitCode::from(1),
    })
}
