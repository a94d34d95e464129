use std::path::PathBuf;
use std::sync::Mutex;
use std::time::SystemTime;

use rand::Rng;

#[macro_export]
macro_rules! init_test_log {
    () => {
        $crate::init_log(module_path!()).unwrap()
    };
}

pub const LOG_DIR: &str = "/tmp/raft-kv-test-logs/";

static LOG_PATH: Mutex<Option<PathBuf>> = Mutex::new(None);

/// Send all logs of this test process to a file under `LOG_DIR`.
///
/// The logger is global and is installed by the first caller. Daemon threads
/// of Raft instances log to the same file. Later callers get the path of the
/// file that is already in use.
pub fn init_log(module_path: &str) -> std::io::Result<PathBuf> {
    let mut log_path = LOG_PATH.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(path) = log_path.as_ref() {
        return Ok(path.clone());
    }

    let module = module_path.replace("::config", "");
    let module_file = module.replace("::", "-");
    let timestamp = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let suffix: String = rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(10)
        .map(char::from)
        .collect();
    let log_file_name =
        format!("{}-{:010}-{}.log", module_file, timestamp, suffix);

    let log_dir = option_env!("LOG_DIR").unwrap_or(LOG_DIR);
    let mut path = PathBuf::from(log_dir);
    std::fs::create_dir_all(path.as_path())?;

    path.push(log_file_name);
    let log_file = std::fs::File::create(path.as_path())?;

    let env = env_logger::Env::default().default_filter_or("info");
    let result = env_logger::Builder::from_env(env)
        .target(env_logger::Target::Pipe(Box::new(log_file)))
        .filter(Some("raft_kv_core"), log::LevelFilter::Debug)
        .format_timestamp_millis()
        .is_test(true)
        .try_init();
    if let Err(e) = result {
        return Err(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            e.to_string(),
        ));
    }

    log_path.replace(path.clone());
    Ok(path)
}
