use colored::{ColoredString, Colorize};

/// Install the `env_logger` backend for the `log` facade.
///
/// Honours `RUST_LOG`; defaults to `info`. Safe to call more than once.
pub fn init() {
    let env = env_logger::Env::default().default_filter_or("info");
    let _ = env_logger::Builder::from_env(env)
        .format_timestamp_millis()
        .try_init();
}

/// Component-scoped logger that prefixes every line with a coloured tag,
/// e.g. `[Ratchet]`.
#[derive(Clone, Debug)]
pub struct Logger {
    prefix: String,
}

impl Logger {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn tag(&self) -> ColoredString {
        format!("[{}]", self.prefix).cyan().bold()
    }

    pub fn log(&self, message: impl AsRef<str>) {
        log::info!("{} {}", self.tag(), message.as_ref());
    }

    pub fn debug(&self, message: impl AsRef<str>) {
        log::debug!("{} {}", self.tag(), message.as_ref());
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        log::warn!("{} {}", self.tag(), message.as_ref().yellow());
    }

    pub fn error(&self, message: impl AsRef<str>) {
        log::error!("{} {}", self.tag(), message.as_ref().red());
    }
}
