#[cfg(feature = "env")]
use std::io::Write;

/// Initialize an `env_logger` backed logger for tests.
///
/// Each line carries the source location and the name of the emitting thread. Filters follow
/// `RUST_LOG`; repeated calls are no-ops.
#[cfg(feature = "env")]
pub fn try_init_log() {
    let _ = env_logger::builder()
        .is_test(true)
        .format(|buf, record| {
            let thread = std::thread::current();
            writeln!(
                buf,
                "{} {:<5} [{}] {}:{} - {}",
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                thread.name().unwrap_or("unnamed"),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .try_init();
}

#[cfg(test)]
mod tests {
    #[cfg(feature = "env")]
    #[test]
    fn test_init_log() {
        super::try_init_log();
        super::try_init_log();
        log::debug!("Logger initialized twice without panicking");
        log::info!("Record at info");
    }
}
