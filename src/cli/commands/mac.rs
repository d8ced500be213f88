use crate::mac::vendor::{DEFAULT_MACLOOKUP_URL, DEFAULT_MACVENDORS_URL};
use clap::{Arg, ArgMatches, Command};
use std::path::PathBuf;

pub const ARG_OUI_FILE: &str = "oui-file";
pub const ARG_MACVENDORS_URL: &str = "macvendors-url";
pub const ARG_MACLOOKUP_URL: &str = "maclookup-url";

#[derive(Debug, Clone)]
pub struct Options {
    /// Extra `prefix,vendor` lines merged over the built-in table.
    pub oui_file: Option<PathBuf>,
    pub macvendors_url: String,
    pub maclookup_url: String,
}

impl Options {
    #[must_use]
    pub fn parse(matches: &ArgMatches) -> Self {
        let get_or = |id: &str, default: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        Self {
            oui_file: matches.get_one::<String>(ARG_OUI_FILE).map(PathBuf::from),
            macvendors_url: get_or(ARG_MACVENDORS_URL, DEFAULT_MACVENDORS_URL),
            maclookup_url: get_or(ARG_MACLOOKUP_URL, DEFAULT_MACLOOKUP_URL),
        }
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_OUI_FILE)
                .long(ARG_OUI_FILE)
                .help("CSV file of OUI prefixes (prefix,vendor)")
                .env("PORTAL_OUI_FILE"),
        )
        .arg(
            Arg::new(ARG_MACVENDORS_URL)
                .long(ARG_MACVENDORS_URL)
                .help("Base URL of the macvendors lookup service")
                .env("PORTAL_MACVENDORS_URL")
                .default_value(DEFAULT_MACVENDORS_URL),
        )
        .arg(
            Arg::new(ARG_MACLOOKUP_URL)
                .long(ARG_MACLOOKUP_URL)
                .help("Base URL of the maclookup service")
                .env("PORTAL_MACLOOKUP_URL")
                .default_value(DEFAULT_MACLOOKUP_URL),
        )
}
