//-
// Copyright (c) 2020, Jason Lingle
//
// This file is part of Crymap.
//
// Crymap is free software: you can  redistribute it and/or modify it under the
// terms of  the GNU General Public  License as published by  the Free Software
// Foundation, either version  3 of the License, or (at  your option) any later
// version.
//
// Crymap is distributed  in the hope that  it will be useful,  but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Crymap. If not, see <http://www.gnu.org/licenses/>.

use std::fs;
use std::path::{Path, PathBuf};

use log::LevelFilter;
use structopt::StructOpt;

use crate::store::model::Flag;
use crate::support::sysexits::*;
use crate::support::system_config::SystemConfig;

const DEFAULT_CONFIG: &str = "crymap-store.toml";

#[derive(StructOpt)]
#[structopt(max_term_width = 80)]
struct Options {
    /// The system configuration file.
    /// [default: crymap-store.toml in the current directory, if present]
    #[structopt(long, parse(from_os_str))]
    config: Option<PathBuf>,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(StructOpt)]
enum Command {
    /// Parse the configuration and print the settings actually in effect.
    CheckConfig,
    Deliver(DeliverSubcommand),
}

/// Deliver messages into a mailbox.
///
/// The store is held in memory for the duration of the command. The user's
/// INBOX always exists; other mailboxes must be created with `--create`.
/// After delivery, the UIDs assigned to the new messages and the quota of
/// the user's quota root are printed.
///
/// If the first line of an input ends with a UNIX line ending, all bare line
/// feeds in that input are converted to DOS line endings. Otherwise the
/// input is stored bit-for-bit.
#[derive(StructOpt)]
pub(super) struct DeliverSubcommand {
    /// The user to deliver to, e.g. `alice@example.com`.
    #[structopt(short, long)]
    pub(super) user: String,

    /// Deliver to this mailbox.
    #[structopt(short, long, default_value = "INBOX")]
    pub(super) mailbox: String,

    /// Create the destination mailbox if it does not already exist.
    #[structopt(short, long)]
    pub(super) create: bool,

    /// Add this IMAP flag (e.g., '\Flagged') or keyword to the delivered
    /// message(s). Can be passed multiple times.
    #[structopt(parse(try_from_str), short, long, number_of_values(1))]
    pub(super) flag: Vec<Flag>,

    /// Extract maildir-style flags from the file name(s).
    #[structopt(long)]
    pub(super) maildir_flags: bool,

    /// The files to deliver. "-" will read from stdin.
    #[structopt(parse(from_os_str), default_value = "-")]
    pub(super) inputs: Vec<PathBuf>,
}

pub fn main() {
    // Clap exits with status 1 instead of EX_USAGE if we use the more concise
    // API
    let options = Options::from_clap(&match Options::clap().get_matches_safe()
    {
        Ok(matches) => matches,
        Err(
            e @ clap::Error {
                kind: clap::ErrorKind::HelpDisplayed,
                ..
            },
        )
        | Err(
            e @ clap::Error {
                kind: clap::ErrorKind::VersionDisplayed,
                ..
            },
        ) => {
            println!("{}", e.message);
            return;
        },
        Err(e) => {
            eprintln!("{}", e.message);
            EX_USAGE.exit()
        },
    });

    let config_path = options.config.clone().or_else(|| {
        Some(PathBuf::from(DEFAULT_CONFIG)).filter(|p| p.is_file())
    });
    let system_config = match config_path {
        Some(ref path) => load_config(path),
        None => SystemConfig::default(),
    };

    match options.command {
        Command::CheckConfig => check_config(&system_config),
        Command::Deliver(cmd) => {
            init_logging(config_path.as_deref());
            super::deliver::deliver(&system_config, cmd);
        },
    }
}

fn load_config(path: &Path) -> SystemConfig {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => die!(EX_CONFIG, "Error reading '{}': {}", path.display(), e),
    };

    match parse_config(&text) {
        Ok(config) => config,
        Err(e) => die!(
            EX_CONFIG,
            "Error in config file at '{}': {}",
            path.display(),
            e
        ),
    }
}

fn parse_config(text: &str) -> Result<SystemConfig, toml::de::Error> {
    toml::from_str(text)
}

fn check_config(config: &SystemConfig) {
    match toml::to_string_pretty(config) {
        Ok(text) => print!("{}", text),
        Err(e) => die!(EX_SOFTWARE, "Unable to render configuration: {}", e),
    }
}

/// Use `logging.toml` beside the configuration file if there is one, and
/// plain output to stderr otherwise.
fn init_logging(config_path: Option<&Path>) {
    let log_config_file = config_path
        .and_then(Path::parent)
        .unwrap_or_else(|| Path::new("."))
        .join("logging.toml");

    if log_config_file.is_file() {
        if let Err(e) = log4rs::init_file(
            &log_config_file,
            log4rs::file::Deserializers::new(),
        ) {
            die!(
                EX_CONFIG,
                "Error in logging config at '{}': {}",
                log_config_file.display(),
                e
            );
        }
    } else if let Err(e) = crate::init_simple_log(LevelFilter::Info) {
        die!(EX_SOFTWARE, "Failed to initialise logging: {}", e);
    }
}
