use chrono::Local;

pub enum LogServiceType {
    Config,
    Database,
    Matching,
    Executor,
    Other
}
impl LogServiceType {
    fn as_str(&self) -> &'static str {
        match self {
            LogServiceType::Config => "CONFIG",
            LogServiceType::Database => "DATABASE",
            LogServiceType::Matching => "MATCHING",
            LogServiceType::Executor => "EXECUTOR",
            LogServiceType::Other => "OTHER"
        }
    }
}

pub fn log_info(service: LogServiceType, message: String) {
    println!("{} - {} - {}", Local::now().format("%Y-%m-%d %H:%M:%S%.3f"), service.as_str(), message)
}

pub fn log_error(service: LogServiceType, message: String) {
    eprintln!("{} - {} - ERROR - {}", Local::now().format("%Y-%m-%d %H:%M:%S%.3f"), service.as_str(), message)
}
