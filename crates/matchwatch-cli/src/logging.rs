use anyhow::anyhow;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_LEVEL: LevelFilter = LevelFilter::INFO;

/// `--log-level` wins over `RUST_LOG`, which wins over `info`.
pub fn init(cli_level_override: Option<&str>) -> anyhow::Result<()> {
    let filter = match cli_level_override {
        Some(raw) => EnvFilter::default().add_directive(parse_level(raw)?.into()),
        None => EnvFilter::builder()
            .with_default_directive(DEFAULT_LOG_LEVEL.into())
            .from_env_lossy(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|err| anyhow!("initialize logging subscriber: {err}"))
}

fn parse_level(raw: &str) -> anyhow::Result<LevelFilter> {
    raw.trim().to_ascii_lowercase().parse::<LevelFilter>().map_err(|_| {
        anyhow!("invalid log level `{raw}`; expected one of trace, debug, info, warn, error, off")
    })
}
