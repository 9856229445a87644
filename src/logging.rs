use chrono::Local;
use std::io::Write;

/// Installs the `env_logger` backend. The filter defaults to `info` and is
/// overridden by `RUST_LOG`. Calling this again is a no-op.
pub fn init() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{:<5}] [{}] - {}",
                Local::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .try_init();
}

#[cfg(test)]
mod tests {
    #[test]
    fn init_twice_is_harmless() {
        super::init();
        super::init();
        log::info!(target: "Logging", "still alive");
    }
}
