use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::append::file::FileAppender;
use log4rs::config::{Appender, Config as LogConfig, Root};
use log4rs::encode::pattern::PatternEncoder;

use crate::config::Log;

const PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S)} {l} {t} - {m}{n}";

/// Build the log4rs configuration described by the `log` section
pub fn build(cfg: &Log) -> Result<LogConfig, Box<dyn std::error::Error>> {
    let level: LevelFilter = cfg.level.parse()?;

    let logfile = FileAppender::builder()
        .encoder(Box::new(PatternEncoder::new(PATTERN)))
        .build(&cfg.file)?;

    let mut builder =
        LogConfig::builder().appender(Appender::builder().build("logfile", Box::new(logfile)));
    let mut root = Root::builder().appender("logfile");

    if cfg.console {
        let stdout = ConsoleAppender::builder()
            .encoder(Box::new(PatternEncoder::new(PATTERN)))
            .build();
        builder = builder.appender(Appender::builder().build("stdout", Box::new(stdout)));
        root = root.appender("stdout");
    }

    Ok(builder.build(root.build(level))?)
}

/// Install the global logger, only the first call wins
pub fn init(cfg: &Log) -> Result<(), Box<dyn std::error::Error>> {
    let config = build(cfg)?;
    log4rs::init_config(config)?;
    Ok(())
}

#[test]
fn build_log_config_test() {
    let mut cfg = Log::default();
    cfg.file = std::env::temp_dir()
        .join("retarget-log-test.log")
        .to_string_lossy()
        .into_owned();
    cfg.console = true;
    cfg.level = "debug".to_string();

    let config = build(&cfg).unwrap();
    assert_eq!(config.appenders().len(), 2);
    assert_eq!(config.root().level(), LevelFilter::Debug);

    cfg.level = "chatty".to_string();
    assert!(build(&cfg).is_err());
}
