use crate::console;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Text log for a session, next to the JSON transaction log.
pub fn text_log_path(logs_dir: &Path, session: &str) -> PathBuf {
    logs_dir.join(format!("reprovision-vm-{}.log", session))
}

pub fn json_log_path(logs_dir: &Path, session: &str) -> PathBuf {
    logs_dir.join(format!("reprovision-vm-{}.json", session))
}

/// Stderr filter: `RUST_LOG` wins, then `--log-level`. Console mirror events are
/// muted there since they are already on screen.
fn stderr_filter(level: &str) -> EnvFilter {
    let base = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    match format!("{}=off", console::TARGET).parse() {
        Ok(directive) => base.add_directive(directive),
        Err(_) => base,
    }
}

/// Install the subscriber: everything at debug into the session file, `level` on stderr.
/// Keep the returned guard alive until exit or buffered lines are lost.
pub fn init(logs_dir: &Path, session: &str, level: &str) -> anyhow::Result<WorkerGuard> {
    std::fs::create_dir_all(logs_dir)?;
    let log_path = text_log_path(logs_dir, session);
    let file_name = log_path
        .file_name()
        .ok_or_else(|| anyhow::anyhow!("invalid log file name for session '{}'", session))?;
    let file_appender = tracing_appender::rolling::never(logs_dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(false)
        .with_filter(EnvFilter::new("debug"));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(stderr_filter(level));

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install log subscriber: {}", e))?;
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_files_share_a_stem() {
        let dir = Path::new("/tmp/logs");
        assert_eq!(
            text_log_path(dir, "2025-01-31-120000"),
            PathBuf::from("/tmp/logs/reprovision-vm-2025-01-31-120000.log")
        );
        assert_eq!(
            json_log_path(dir, "2025-01-31-120000"),
            PathBuf::from("/tmp/logs/reprovision-vm-2025-01-31-120000.json")
        );
    }
}
