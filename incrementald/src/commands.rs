//! # Script Commands
//!
//! A line-based command surface for driving the service from a script.
//!
//! ## Command Set
//!
//! - `create <target> [permanent] [loader <package>]` - create a storage
//! - `link <target> <base>` - create a storage linked to `base`
//! - `open <path>` - find the storage serving a path
//! - `mkdir <id> <path>` / `mkdirs <id> <path>` - create directories
//! - `mkfile <id> <path> <size> [metadata]` - create a file
//! - `mkrange <id> <path> <source> <start> <end>` - file from a byte range
//! - `ln <id> <path> <dest-id> <dest-path>` - hard link
//! - `rm <id> <path>` - unlink
//! - `bind <id> <path> <target> [permanent]` / `unbind <id> <target>`
//! - `fill <id> <path> <start> <end>` - report a range as streamed in
//! - `loaded <id> <path> <start> <end>` - query range state
//! - `meta <id> <path>` - print file metadata
//! - `start <id>` - start loading
//! - `invalidate <id>` - force a storage teardown
//! - `delete <id>` - delete a storage
//! - `ready` - signal system ready
//! - `dump [json]` - print service state
//!
//! Blank lines and lines starting with `#` are skipped. Storage ids are
//! plain integers. Arguments are separated by whitespace, so paths cannot
//! contain spaces.

use core_types::{BindKind, StorageId};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Missing argument: {0}")]
    MissingArgument(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Parse error at line {line}: {source}")]
    ParseError {
        line: usize,
        #[source]
        source: Box<CommandError>,
    },
}

/// One script command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptCommand {
    Create {
        target: String,
        bind: BindKind,
        loader: Option<String>,
    },
    CreateLinked {
        target: String,
        base: StorageId,
    },
    Open {
        path: String,
    },
    MakeDirectory {
        storage: StorageId,
        path: String,
    },
    MakeDirectories {
        storage: StorageId,
        path: String,
    },
    MakeFile {
        storage: StorageId,
        path: String,
        size: u64,
        metadata: String,
    },
    MakeFileFromRange {
        storage: StorageId,
        path: String,
        source: String,
        start: u64,
        end: u64,
    },
    HardLink {
        source: StorageId,
        source_path: String,
        dest: StorageId,
        dest_path: String,
    },
    Unlink {
        storage: StorageId,
        path: String,
    },
    Bind {
        storage: StorageId,
        path: String,
        target: String,
        kind: BindKind,
    },
    Unbind {
        storage: StorageId,
        target: String,
    },
    Fill {
        storage: StorageId,
        path: String,
        start: u64,
        end: u64,
    },
    Loaded {
        storage: StorageId,
        path: String,
        start: u64,
        end: u64,
    },
    Metadata {
        storage: StorageId,
        path: String,
    },
    Start {
        storage: StorageId,
    },
    Invalidate {
        storage: StorageId,
    },
    Delete {
        storage: StorageId,
    },
    SystemReady,
    Dump {
        json: bool,
    },
}

/// Parses a whole script, stopping at the first bad line
pub fn parse_script(text: &str) -> Result<Vec<ScriptCommand>, CommandError> {
    let mut commands = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let command = CommandParser::parse(line).map_err(|err| CommandError::ParseError {
            line: index + 1,
            source: Box::new(err),
        })?;
        commands.push(command);
    }
    Ok(commands)
}

/// Single-line command parser
pub struct CommandParser;

impl CommandParser {
    pub fn parse(input: &str) -> Result<ScriptCommand, CommandError> {
        let parts: Vec<&str> = input.split_whitespace().collect();
        let Some((name, args)) = parts.split_first() else {
            return Err(CommandError::MissingArgument("command".to_string()));
        };
        let mut args = Args::new(args);

        let command = match name.to_lowercase().as_str() {
            "create" => {
                let target = args.string("target")?;
                let mut bind = BindKind::Temporary;
                let mut loader = None;
                while let Some(option) = args.optional() {
                    match option {
                        "permanent" => bind = BindKind::Permanent,
                        "temporary" => bind = BindKind::Temporary,
                        "loader" => loader = Some(args.string("loader package")?),
                        other => {
                            return Err(CommandError::InvalidArgument(format!(
                                "unknown create option: {}",
                                other
                            )))
                        }
                    }
                }
                return Ok(ScriptCommand::Create {
                    target,
                    bind,
                    loader,
                });
            }
            "link" => ScriptCommand::CreateLinked {
                target: args.string("target")?,
                base: args.storage()?,
            },
            "open" => ScriptCommand::Open {
                path: args.string("path")?,
            },
            "mkdir" => ScriptCommand::MakeDirectory {
                storage: args.storage()?,
                path: args.string("path")?,
            },
            "mkdirs" => ScriptCommand::MakeDirectories {
                storage: args.storage()?,
                path: args.string("path")?,
            },
            "mkfile" => ScriptCommand::MakeFile {
                storage: args.storage()?,
                path: args.string("path")?,
                size: args.number("size")?,
                metadata: args.optional().unwrap_or_default().to_string(),
            },
            "mkrange" => ScriptCommand::MakeFileFromRange {
                storage: args.storage()?,
                path: args.string("path")?,
                source: args.string("source path")?,
                start: args.number("start")?,
                end: args.number("end")?,
            },
            "ln" => ScriptCommand::HardLink {
                source: args.storage()?,
                source_path: args.string("source path")?,
                dest: args.storage()?,
                dest_path: args.string("destination path")?,
            },
            "rm" | "unlink" => ScriptCommand::Unlink {
                storage: args.storage()?,
                path: args.string("path")?,
            },
            "bind" => ScriptCommand::Bind {
                storage: args.storage()?,
                path: args.string("path")?,
                target: args.string("target")?,
                kind: match args.optional() {
                    None | Some("temporary") => BindKind::Temporary,
                    Some("permanent") => BindKind::Permanent,
                    Some(other) => {
                        return Err(CommandError::InvalidArgument(format!(
                            "unknown bind kind: {}",
                            other
                        )))
                    }
                },
            },
            "unbind" => ScriptCommand::Unbind {
                storage: args.storage()?,
                target: args.string("target")?,
            },
            "fill" => ScriptCommand::Fill {
                storage: args.storage()?,
                path: args.string("path")?,
                start: args.number("start")?,
                end: args.number("end")?,
            },
            "loaded" => ScriptCommand::Loaded {
                storage: args.storage()?,
                path: args.string("path")?,
                start: args.number("start")?,
                end: args.number("end")?,
            },
            "meta" => ScriptCommand::Metadata {
                storage: args.storage()?,
                path: args.string("path")?,
            },
            "start" => ScriptCommand::Start {
                storage: args.storage()?,
            },
            "invalidate" => ScriptCommand::Invalidate {
                storage: args.storage()?,
            },
            "delete" => ScriptCommand::Delete {
                storage: args.storage()?,
            },
            "ready" => ScriptCommand::SystemReady,
            "dump" => ScriptCommand::Dump {
                json: match args.optional() {
                    None => false,
                    Some("json") => true,
                    Some(other) => {
                        return Err(CommandError::InvalidArgument(format!(
                            "unknown dump format: {}",
                            other
                        )))
                    }
                },
            },
            other => return Err(CommandError::UnknownCommand(other.to_string())),
        };

        args.finish()?;
        Ok(command)
    }
}

/// Cursor over the arguments of one command
struct Args<'a> {
    rest: std::slice::Iter<'a, &'a str>,
}

impl<'a> Args<'a> {
    fn new(args: &'a [&'a str]) -> Self {
        Self { rest: args.iter() }
    }

    fn optional(&mut self) -> Option<&'a str> {
        self.rest.next().copied()
    }

    fn string(&mut self, name: &str) -> Result<String, CommandError> {
        self.optional()
            .map(str::to_string)
            .ok_or_else(|| CommandError::MissingArgument(name.to_string()))
    }

    fn number(&mut self, name: &str) -> Result<u64, CommandError> {
        let raw = self
            .optional()
            .ok_or_else(|| CommandError::MissingArgument(name.to_string()))?;
        raw.parse()
            .map_err(|_| CommandError::InvalidArgument(format!("{} is not a number: {}", name, raw)))
    }

    fn storage(&mut self) -> Result<StorageId, CommandError> {
        let raw = self
            .optional()
            .ok_or_else(|| CommandError::MissingArgument("storage id".to_string()))?;
        raw.parse()
            .map(StorageId::new)
            .map_err(|_| CommandError::InvalidArgument(format!("invalid storage id: {}", raw)))
    }

    fn finish(mut self) -> Result<(), CommandError> {
        match self.optional() {
            None => Ok(()),
            Some(extra) => Err(CommandError::InvalidArgument(format!(
                "unexpected argument: {}",
                extra
            ))),
        }
    }
}
