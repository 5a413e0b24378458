//! 日志初始化。默认输出到 stderr；设置 `LOG_DIR` 时写入带时间戳的文件。

use chrono::Local;
use std::path::PathBuf;

/// 每个进程调用一次。`RUST_LOG` 可覆盖默认级别。
pub fn init(binary: &str) -> std::io::Result<Option<PathBuf>> {
    let mut builder = env_logger::Builder::from_default_env();
    builder
        .filter_level(log::LevelFilter::Warn)
        .filter_module("fieldgrid", log::LevelFilter::Info)
        .filter_module("import_processor", log::LevelFilter::Info)
        .filter_module("fieldgrid_server", log::LevelFilter::Info)
        .filter_module("sqlx", log::LevelFilter::Error)
        .filter_module("sea_orm", log::LevelFilter::Error);
    if let Ok(spec) = std::env::var("RUST_LOG") {
        builder.parse_filters(&spec);
    }

    let log_path = match std::env::var("LOG_DIR").ok().filter(|d| !d.trim().is_empty()) {
        Some(dir) => {
            let dir = PathBuf::from(dir);
            std::fs::create_dir_all(&dir)?;
            let ts = Local::now().format("%Y%m%d-%H%M%S").to_string();
            let path = dir.join(format!("{}-{}.log", binary, ts));
            let file = std::fs::File::create(&path)?;
            builder.target(env_logger::Target::Pipe(Box::new(file)));
            Some(path)
        }
        None => None,
    };

    // 测试里可能重复初始化
    let _ = builder.try_init();
    Ok(log_path)
}
