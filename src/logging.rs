use std::path::Path;

use flexi_logger::{
    opt_format, Cleanup, Criterion, Duplicate, FileSpec, FlexiLoggerError, Logger, LoggerHandle,
    Naming,
};

/// Starts the global logger. `spec` (e.g. `"info"` or `"neural_mcts::mcts=trace"`) applies
/// unless `RUST_LOG` is set. Logs go to stderr; with `log_dir` they also go to size-rotated
/// files there. Keep the returned handle alive for as long as logging is needed.
pub fn setup_logging(spec: &str, log_dir: Option<&Path>) -> Result<LoggerHandle, FlexiLoggerError> {
    let logger = Logger::try_with_env_or_str(spec)?.format(opt_format);

    match log_dir {
        Some(dir) => logger
            .log_to_file(FileSpec::default().directory(dir).basename("neural_mcts"))
            .duplicate_to_stderr(Duplicate::All)
            .rotate(
                Criterion::Size(10 * 1024 * 1024),
                Naming::Numbers,
                Cleanup::KeepLogFiles(3),
            )
            .start(),
        None => logger.log_to_stderr().start(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_logging_with_directory() {
        let dir = tempfile::tempdir().unwrap();
        let handle = setup_logging("debug", Some(dir.path()));
        assert!(handle.is_ok());
        log::info!("logger started");
    }
}
