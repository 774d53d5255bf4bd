use env_logger::{Builder, Env, Target};

/// Environment variable holding the log filter (`env_logger` syntax).
pub const LOG_ENV: &str = "TABPAUSE_LOG";
const DEFAULT_FILTER: &str = "info";

/// Installs the global logger. Output goes to stderr: stdout carries the
/// native-messaging frames.
pub fn init() {
    builder().init();
}

fn builder() -> Builder {
    let mut builder = Builder::from_env(Env::default().filter_or(LOG_ENV, DEFAULT_FILTER));
    builder.target(Target::Stderr);
    builder
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_can_be_installed_more_than_once_in_tests() {
        let _ = builder().is_test(true).try_init();
        let _ = builder().is_test(true).try_init();
        log::info!("[logging] test logger ready");
    }
}
