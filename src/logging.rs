use chrono::Local;
use log::LevelFilter;
use std::io::Write;

// Level from the explicit flag, else RUST_LOG, else info
pub fn resolve_level(level: Option<&str>) -> LevelFilter {
    level
        .and_then(|l| l.parse::<LevelFilter>().ok())
        .or_else(|| std::env::var("RUST_LOG").ok().and_then(|v| v.parse().ok()))
        .unwrap_or(LevelFilter::Info)
}

pub fn init_logging(level: Option<&str>) {
    let log_level = resolve_level(level);
    let _ = env_logger::Builder::new()
        .filter_level(log_level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {:5}] {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .try_init();
    log::debug!("logger initialized (level: {})", log_level);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_level_wins() {
        assert_eq!(resolve_level(Some("warn")), LevelFilter::Warn);
        assert_eq!(resolve_level(Some("DEBUG")), LevelFilter::Debug);
    }

    #[test]
    fn init_twice_is_harmless() {
        init_logging(Some("error"));
        init_logging(Some("error"));
    }
}
