//! Process bootstrap: directories and logging.

use std::path::Path;

use monitor_data::store::DataPaths;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Ensure the `data/`, `logs/` and `config/` directories exist under `root`.
pub fn ensure_directories(root: &Path) -> anyhow::Result<DataPaths> {
    let paths = DataPaths::under(root);
    paths.ensure()?;
    std::fs::create_dir_all(root.join("config"))?;
    Ok(paths)
}

/// Initialise the global `tracing` subscriber.
///
/// `RUST_LOG` wins when set; otherwise the configured level applies to the
/// monitor crates and `warn` to everything else. Output goes to stderr so
/// stdout stays clean for command output.
pub fn setup_logging(log_level: &str) -> anyhow::Result<()> {
    let directive = format!(
        "warn,ielts_monitor={lvl},monitor_core={lvl},monitor_data={lvl},monitor_notify={lvl},monitor_runtime={lvl}",
        lvl = log_level
    );
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&directive))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    tracing_subscriber::registry().with(filter).with(layer).init();
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_ensure_directories() {
        let tmp = TempDir::new().expect("tempdir");
        let paths = ensure_directories(tmp.path()).expect("bootstrap");

        assert!(tmp.path().join("data").is_dir());
        assert!(tmp.path().join("logs").is_dir());
        assert!(tmp.path().join("config").is_dir());
        assert!(paths.tracking_file().starts_with(tmp.path()));
    }

    #[test]
    fn test_ensure_directories_idempotent() {
        let tmp = TempDir::new().expect("tempdir");
        ensure_directories(tmp.path()).expect("first run");
        ensure_directories(tmp.path()).expect("second run");
    }
}
