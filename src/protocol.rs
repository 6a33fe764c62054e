//! Git remote helper protocol loop.
//!
//! Commands arrive one per line on stdin (see git-remote-helpers(7));
//! responses and fast-import streams go to stdout.

use anyhow::{Context, Result};
use std::io::{BufRead, Write};

use crate::commands;
use crate::config::RemoteConfig;
use crate::error::Error;
use crate::remote::Remote;
use crate::storage::StorageBackend;

/// A parsed command from the git remote helper protocol
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Capabilities,
    List { for_push: bool },
    Option { name: String, value: String },
    /// A fast-export stream follows on the same input
    Export,
    Import { ref_name: String },
    /// Empty line (end of an import batch)
    Empty,
}

impl Command {
    /// Parse a command from a line of input
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        let (name, args) = line.split_once(' ').unwrap_or((line, ""));

        let command = match (name, args) {
            ("", _) => Self::Empty,
            ("capabilities", _) => Self::Capabilities,
            ("list", args) => Self::List {
                for_push: args == "for-push",
            },
            ("option", args) => {
                let (name, value) = args.split_once(' ').unwrap_or((args, ""));
                Self::Option {
                    name: name.to_string(),
                    value: value.to_string(),
                }
            }
            ("export", _) => Self::Export,
            ("import", ref_name) if !ref_name.is_empty() => Self::Import {
                ref_name: ref_name.to_string(),
            },
            (name, _) => return Err(Error::UnsupportedCommand(name.to_string()).into()),
        };
        Ok(command)
    }
}

/// Main protocol handler - reads commands from `input` and dispatches them
pub fn handle_commands<S, R, W>(
    storage: &S,
    remote: &mut Remote,
    config: &RemoteConfig,
    mut input: R,
    output: &mut W,
) -> Result<()>
where
    S: StorageBackend,
    R: BufRead,
    W: Write,
{
    let mut importing = false;
    let mut line = String::new();

    loop {
        line.clear();
        if input
            .read_line(&mut line)
            .context("Failed to read command")?
            == 0
        {
            break;
        }
        tracing::debug!("line = {:?}", line.trim_end());

        match Command::parse(&line)? {
            Command::Empty => {
                if importing {
                    tracing::debug!("finishing imports");
                    writeln!(output, "done")?;
                    importing = false;
                }
            }
            Command::Capabilities => commands::capabilities::handle(remote, output)?,
            Command::List { for_push } => {
                if !for_push {
                    remote.refresh(storage)?;
                }
                commands::list::handle(remote, &config.default_branch, output, for_push)?
            }
            Command::Option { name, value } => commands::option::handle(&name, &value, output)?,
            Command::Export => {
                commands::export::handle(storage, remote, &mut input, output, config.progress)?;
                output.flush()?;
                // git closes the session once the export is confirmed
                break;
            }
            Command::Import { ref_name } => {
                if !importing {
                    write_import_features(remote, output)?;
                    importing = true;
                }
                commands::import::handle(
                    storage,
                    remote,
                    &ref_name,
                    &config.default_branch,
                    output,
                    config.progress,
                )?;
            }
        }

        output.flush()?;
    }

    Ok(())
}

/// Header of the fast-import stream for a batch of imports
fn write_import_features<W: Write>(remote: &Remote, output: &mut W) -> Result<()> {
    let marks_path = remote.git_marks_path();
    writeln!(output, "feature done")?;
    writeln!(output, "feature export-marks={}", marks_path.display())?;
    if marks_path.is_file() {
        writeln!(output, "feature import-marks={}", marks_path.display())?;
    }
    writeln!(output, "feature force")?;
    Ok(())
}
