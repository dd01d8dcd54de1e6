use log::info;

/// Initialize `env_logger` with the timestamped format shared by all binaries and tests.
///
/// The filter comes from `RUST_LOG` and falls back to `info`. Calling it more than once is fine,
/// later calls are no-ops.
pub fn init_log() {
    use chrono::Utc;
    use std::io::Write;

    let env = env_logger::Env::default().default_filter_or("info");
    let res = env_logger::Builder::from_env(env)
        .format(|buf, record| {
            let level_style = buf.default_level_style(record.level());
            writeln!(
                buf,
                "[{} {} {}:{}] {}",
                Utc::now().format("%Y-%m-%d %H:%M:%S%.6f"),
                level_style.value(record.level()),
                record.file().unwrap_or("<unnamed>"),
                record.line().unwrap_or(0),
                &record.args()
            )
        })
        .try_init();

    if res.is_ok() {
        info!("env_logger initialized");
    }
}
