//! Logging setup shared by the binaries

use std::path::Path;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;

/// Install the fmt subscriber.
///
/// With `log_dir`, output goes to `<program>_<YYYYMMDD>.log` there and the
/// returned guard must be held until exit so buffered lines are flushed.
pub fn init_logging(program: &str, verbose: bool, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };

    match log_dir {
        Some(dir) => {
            let file_name = log_file_name(program, chrono::Local::now().date_naive());
            let appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_max_level(level)
                .with_target(true)
                .with_ansi(false)
                .with_writer(writer)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_max_level(level)
                .with_target(true)
                .with_writer(std::io::stdout)
                .init();
            None
        }
    }
}

pub fn log_file_name(program: &str, date: chrono::NaiveDate) -> String {
    format!("{}_{}.log", program, date.format("%Y%m%d"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_file_name() {
        let date = chrono::NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(log_file_name("gpsegrecovery", date), "gpsegrecovery_20240309.log");
    }
}
