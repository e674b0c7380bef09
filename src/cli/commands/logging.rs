//! `-v/--verbose`: a repeat count, or a level name or number through `LEXAUTH_LOG_LEVEL`.

use clap::{builder::ValueParser, Arg, ArgAction, ArgMatches, Command};
use tracing::Level;

pub const ARG_VERBOSITY: &str = "verbosity";

/// Level names indexed by verbosity. Index 0 leaves the filter at its default.
const LEVELS: [(&str, Option<Level>); 5] = [
    ("error", None),
    ("warn", Some(Level::WARN)),
    ("info", Some(Level::INFO)),
    ("debug", Some(Level::DEBUG)),
    ("trace", Some(Level::TRACE)),
];

fn parse_level(value: &str) -> Result<u8, String> {
    if let Ok(count) = value.parse::<u8>() {
        return if usize::from(count) < LEVELS.len() {
            Ok(count)
        } else {
            Err(format!("log level must be below {}", LEVELS.len()))
        };
    }
    let wanted = value.trim().to_ascii_lowercase();
    LEVELS
        .iter()
        .position(|(name, _)| *name == wanted)
        .and_then(|index| u8::try_from(index).ok())
        .ok_or_else(|| format!("unknown log level: {value}"))
}

#[must_use]
pub fn validator_log_level() -> ValueParser {
    ValueParser::from(parse_level)
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command.arg(
        Arg::new(ARG_VERBOSITY)
            .short('v')
            .long("verbose")
            .help("Verbosity: repeat for more, or set LEXAUTH_LOG_LEVEL to error|warn|info|debug|trace")
            .env("LEXAUTH_LOG_LEVEL")
            .global(true)
            .action(ArgAction::Count)
            .value_parser(validator_log_level()),
    )
}

/// Tracing level selected on the command line; counts past `trace` saturate.
#[must_use]
pub fn level(matches: &ArgMatches) -> Option<Level> {
    let verbosity = matches.get_one::<u8>(ARG_VERBOSITY).copied().unwrap_or(0);
    let index = usize::from(verbosity).min(LEVELS.len() - 1);
    LEVELS[index].1
}
