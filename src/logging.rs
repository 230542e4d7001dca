use chrono::Local;
use std::path::PathBuf;
use std::sync::Once;

pub const LEVEL_ENV: &str = "TAXPAY_LOG_LEVEL";
pub const DIR_ENV: &str = "TAXPAY_LOG_DIR";

static INIT: Once = Once::new();

#[derive(Debug, Clone, PartialEq)]
struct LogSettings {
    level: log::LevelFilter,
    dir: Option<PathBuf>,
}

impl LogSettings {
    fn from_env() -> Self {
        let level = std::env::var(LEVEL_ENV)
            .or_else(|_| std::env::var("RUST_LOG"))
            .ok();
        let dir = std::env::var(DIR_ENV).ok();
        Self::resolve(level.as_deref(), dir.as_deref())
    }

    fn resolve(level: Option<&str>, dir: Option<&str>) -> Self {
        let level = level
            .and_then(|value| value.trim().parse::<log::LevelFilter>().ok())
            .unwrap_or(log::LevelFilter::Info);
        let dir = match dir.map(str::trim) {
            Some("off") | Some("none") | Some("") => None,
            Some(path) => Some(PathBuf::from(path)),
            None => Some(PathBuf::from("logs")),
        };
        Self { level, dir }
    }
}

pub fn init_logging(app_name: &str) -> Result<(), String> {
    let mut init_result: Result<(), String> = Ok(());
    INIT.call_once(|| {
        if let Err(err) = init_logging_inner(app_name, LogSettings::from_env()) {
            init_result = Err(err);
        }
    });
    init_result
}

fn init_logging_inner(app_name: &str, settings: LogSettings) -> Result<(), String> {
    let mut dispatch = fern::Dispatch::new()
        .level(settings.level)
        // reqwest and its connection pool are chatty at debug.
        .level_for("reqwest", log::LevelFilter::Info)
        .level_for("hyper_util", log::LevelFilter::Warn)
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} | {:<5} | {} | {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.target(),
                message
            ))
        })
        .chain(std::io::stderr());

    if let Some(dir) = settings.dir {
        std::fs::create_dir_all(&dir).map_err(|err| err.to_string())?;
        let file_path = dir.join(log_file_name(app_name));
        dispatch = dispatch.chain(fern::log_file(file_path).map_err(|err| err.to_string())?);
    }

    dispatch.apply().map_err(|err| err.to_string())
}

fn log_file_name(app_name: &str) -> String {
    format!("{app_name}-{}.log", Local::now().format("%Y_%m_%d"))
}
