use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

const TRAFFIC_DIRECTIVE: &str = "swarmr::traffic=trace";

/// Builds the filter from the configured level; `RUST_LOG` wins when set.
fn filter(level: &str, traffic: bool) -> (EnvFilter, Option<String>) {
    let mut warning = None;
    let mut filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level).unwrap_or_else(|err| {
            warning = Some(format!("invalid log level `{level}` ({err}); using info"));
            EnvFilter::new("info")
        }),
    };
    if traffic && let Ok(directive) = TRAFFIC_DIRECTIVE.parse() {
        filter = filter.add_directive(directive);
    }
    (filter, warning)
}

fn open_log_file(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Installs the global subscriber. Never fails the run: a log file that cannot be opened falls
/// back to stderr with a warning.
pub fn init(level: &str, traffic: bool, file: Option<&Path>) {
    let (filter, level_warning) = filter(level, traffic);

    let mut file_warning = None;
    let file = file.and_then(|path| match open_log_file(path) {
        Ok(f) => Some(f),
        Err(err) => {
            file_warning = Some(format!(
                "cannot open log file {} ({err}); logging to stderr",
                path.display()
            ));
            None
        }
    });

    let installed = match file {
        Some(file) => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .try_init(),
        None => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init(),
    };
    if installed.is_err() {
        return;
    }

    for warning in level_warning.into_iter().chain(file_warning) {
        tracing::warn!("{warning}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_level_falls_back_with_warning() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let (_, warning) = filter("swarmr=loudest", false);
        assert!(warning.is_some());
        let (_, warning) = filter("debug", true);
        assert!(warning.is_none());
    }

    #[test]
    fn log_file_parent_is_created() {
        let dir = tempfile::tempdir().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let path = dir.path().join("nested/run.log");
        assert!(open_log_file(&path).is_ok());
        assert!(path.exists());
    }
}
