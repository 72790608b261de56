extern crate log;
use env_logger::Builder;

pub fn initialize_logging_layer() {
    let mut builder = Builder::new();
    let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    builder.filter_level(level_filter(&log_level));

    if builder.try_init().is_ok() {
        log::debug!("Initialized the logger ..")
    }

    log_detected_x86_features();
}

fn level_filter(log_level: &str) -> log::LevelFilter {
    match log_level.to_lowercase().as_str() {
        "info" => log::LevelFilter::Info,
        "warn" => log::LevelFilter::Warn,
        "error" => log::LevelFilter::Error,
        "trace" => log::LevelFilter::Trace,
        "debug" => log::LevelFilter::Debug,
        "off" => log::LevelFilter::Off,
        _ => log::LevelFilter::Info,
    }
}

// Feature detection macros only exist on x86
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
fn log_detected_x86_features() {
    let mut features: Vec<String> = Vec::new();
    if is_x86_feature_detected!("avx") {
        features.push("AVX".to_string());
    }

    if is_x86_feature_detected!("avx2") {
        features.push("AVX2".to_string());
    }

    if is_x86_feature_detected!("fma") {
        features.push("FMA".to_string());
    }

    if features.is_empty() {
        log::debug!("No selected CPU features detected ..");
    } else {
        log::debug!("Detected CPU features: {:?}", features.join(", "));
    }
}

#[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
fn log_detected_x86_features() {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_filter() {
        assert_eq!(level_filter("WARN"), log::LevelFilter::Warn);
        assert_eq!(level_filter("off"), log::LevelFilter::Off);
        assert_eq!(level_filter("verbose"), log::LevelFilter::Info);
    }
}
