//! Command line front end: dump, search and batch-edit files through a
//! [`Document`].

use crate::config::{RcConfig, RcLoader, parse_size};
use crate::document_model::{Document, DocumentResult, SearchDirection};
use crate::hex::{self, MIN_ADDRESS_WIDTH, address_width, printable};
use clap::{ArgAction, ArgMatches, Args, Parser, Subcommand};
use crossterm::style::{Color, ResetColor, SetForegroundColor};
use std::error::Error;
use std::fmt::Write as _;
use std::path::PathBuf;
use tracing::debug;

const DEFAULT_DUMP_LENGTH: u64 = 256;

#[derive(Debug, Parser)]
#[command(name = "hexrus", version, about = "Inspect and edit binary files of any size")]
pub struct Cli {
    /// Read settings from this file instead of .hexrusrc
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Do not highlight changed bytes
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print an address / hex / ASCII dump
    Dump(DumpArgs),
    /// Search for a byte pattern
    Find(FindArgs),
    /// Apply a sequence of edits, print the result and optionally save it
    Edit(EditArgs),
}

#[derive(Debug, Args)]
pub struct DumpArgs {
    pub file: PathBuf,
    #[arg(long, default_value = "0", value_parser = parse_offset)]
    pub offset: u64,
    /// Bytes to show; the rest of the file when omitted
    #[arg(long, value_parser = parse_offset)]
    pub length: Option<u64>,
}

#[derive(Debug, Args)]
pub struct FindArgs {
    pub file: PathBuf,
    /// Hex bytes, or plain text with --text
    pub pattern: String,
    #[arg(long)]
    pub text: bool,
    /// Start offset; the end of the file for backward searches
    #[arg(long, value_parser = parse_offset)]
    pub from: Option<u64>,
    #[arg(long)]
    pub backward: bool,
    /// Report every match instead of the first
    #[arg(long)]
    pub all: bool,
}

#[derive(Debug, Args)]
pub struct EditArgs {
    pub file: PathBuf,
    #[arg(long, value_name = "OFF:HEX", value_parser = parse_offset_bytes)]
    pub insert: Vec<(u64, Vec<u8>)>,
    #[arg(long, value_name = "OFF:LEN", value_parser = parse_offset_length)]
    pub remove: Vec<(u64, u64)>,
    #[arg(long, value_name = "OFF:HEX", value_parser = parse_offset_bytes)]
    pub overwrite: Vec<(u64, Vec<u8>)>,
    #[arg(long, value_name = "OFF:LEN:HEX", value_parser = parse_replacement)]
    pub replace: Vec<(u64, u64, Vec<u8>)>,
    #[arg(long, action = ArgAction::Count)]
    pub undo: u8,
    #[arg(long, action = ArgAction::Count)]
    pub redo: u8,
    /// Save the result, in place or to PATH
    #[arg(long, value_name = "PATH")]
    pub write: Option<Option<PathBuf>>,
    /// Bytes of the result to print after the edits
    #[arg(long, default_value_t = DEFAULT_DUMP_LENGTH, value_parser = parse_offset)]
    pub length: u64,
}

/// One `edit` step, in command line order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditStep {
    Insert { offset: u64, bytes: Vec<u8> },
    Remove { offset: u64, length: u64 },
    Overwrite { offset: u64, bytes: Vec<u8> },
    Replace { offset: u64, length: u64, bytes: Vec<u8> },
    Undo,
    Redo,
}

impl EditStep {
    fn offset(&self) -> Option<u64> {
        match self {
            EditStep::Insert { offset, .. }
            | EditStep::Remove { offset, .. }
            | EditStep::Overwrite { offset, .. }
            | EditStep::Replace { offset, .. } => Some(*offset),
            EditStep::Undo | EditStep::Redo => None,
        }
    }

    fn apply(&self, document: &mut Document) -> DocumentResult<()> {
        match self {
            EditStep::Insert { offset, bytes } => document.insert(*offset, bytes).map(|_| ()),
            EditStep::Remove { offset, length } => document.remove_at(*offset, *length).map(|_| ()),
            EditStep::Overwrite { offset, bytes } => document.overwrite(*offset, bytes).map(|_| ()),
            EditStep::Replace {
                offset,
                length,
                bytes,
            } => document.replace(*offset, *length, bytes).map(|_| ()),
            EditStep::Undo => document.undo().map(|_| ()),
            EditStep::Redo => document.redo().map(|_| ()),
        }
    }
}

/// Rebuild the command line order of the `edit` steps. Clap keeps each
/// option's values apart, so the argument indices decide the sequence.
pub fn ordered_steps(args: &EditArgs, matches: &ArgMatches) -> Vec<EditStep> {
    let mut steps: Vec<(usize, EditStep)> = Vec::new();
    let mut collect = |id: &str, items: Vec<EditStep>| {
        let indices = matches.indices_of(id).into_iter().flatten();
        steps.extend(indices.zip(items));
    };

    collect(
        "insert",
        args.insert
            .iter()
            .map(|(offset, bytes)| EditStep::Insert {
                offset: *offset,
                bytes: bytes.clone(),
            })
            .collect(),
    );
    collect(
        "remove",
        args.remove
            .iter()
            .map(|&(offset, length)| EditStep::Remove { offset, length })
            .collect(),
    );
    collect(
        "overwrite",
        args.overwrite
            .iter()
            .map(|(offset, bytes)| EditStep::Overwrite {
                offset: *offset,
                bytes: bytes.clone(),
            })
            .collect(),
    );
    collect(
        "replace",
        args.replace
            .iter()
            .map(|(offset, length, bytes)| EditStep::Replace {
                offset: *offset,
                length: *length,
                bytes: bytes.clone(),
            })
            .collect(),
    );
    collect("undo", vec![EditStep::Undo; args.undo as usize]);
    collect("redo", vec![EditStep::Redo; args.redo as usize]);

    steps.sort_by_key(|(index, _)| *index);
    steps.into_iter().map(|(_, step)| step).collect()
}

/// Run a parsed command line. `matches` must be the matches `cli` was
/// built from.
pub fn run(cli: Cli, matches: &ArgMatches) -> Result<(), Box<dyn Error>> {
    let mut config = match &cli.config {
        Some(path) => RcLoader::load_from_path(path)?,
        None => RcLoader::load_config(),
    };
    if cli.no_color {
        config.highlight = false;
    }

    match &cli.command {
        Command::Dump(args) => run_dump(args, &config),
        Command::Find(args) => run_find(args, &config),
        Command::Edit(args) => {
            let steps = match matches.subcommand_matches("edit") {
                Some(edit_matches) => ordered_steps(args, edit_matches),
                None => Vec::new(),
            };
            run_edit(args, &steps, &config)
        }
    }
}

fn open_document(file: PathBuf, config: &RcConfig) -> DocumentResult<Document> {
    let mut document = Document::with_limits(config.store_limits(), config.undo_limit);
    document.open(file)?;
    Ok(document)
}

fn run_dump(args: &DumpArgs, config: &RcConfig) -> Result<(), Box<dyn Error>> {
    let mut document = open_document(args.file.clone(), config)?;
    let end = match args.length {
        Some(length) => args.offset.saturating_add(length).min(document.size()),
        None => document.size(),
    };

    // whole rows per block keep addresses aligned across blocks
    let block = (config.bytes_per_line.max(1) * 4096) as u64;
    let mut stdout = std::io::stdout().lock();
    let mut position = args.offset;
    while position < end {
        let length = block.min(end - position);
        let rows = render_dump(&mut document, position, length, config)?;
        std::io::Write::write_all(&mut stdout, rows.as_bytes())?;
        position += length;
    }
    Ok(())
}

fn run_find(args: &FindArgs, config: &RcConfig) -> Result<(), Box<dyn Error>> {
    let pattern = if args.text {
        args.pattern.as_bytes().to_vec()
    } else {
        hex::parse_hex(&args.pattern)?
    };
    let mut document = open_document(args.file.clone(), config)?;
    let direction = if args.backward {
        SearchDirection::Backward
    } else {
        SearchDirection::Forward
    };
    let mut from = args.from.unwrap_or(match direction {
        SearchDirection::Forward => 0,
        SearchDirection::Backward => document.size(),
    });

    let width = address_width(document.size(), MIN_ADDRESS_WIDTH);
    let mut found = false;
    while let Some(position) = document.find(&pattern, from, direction)? {
        println!("{position:0width$x}");
        found = true;
        if !args.all {
            break;
        }
        from = match direction {
            SearchDirection::Forward => position + 1,
            SearchDirection::Backward => position + pattern.len() as u64 - 1,
        };
    }
    if !found {
        println!("pattern not found");
    }
    Ok(())
}

fn run_edit(
    args: &EditArgs,
    steps: &[EditStep],
    config: &RcConfig,
) -> Result<(), Box<dyn Error>> {
    let mut document = open_document(args.file.clone(), config)?;
    for step in steps {
        debug!(?step, "edit step");
        step.apply(&mut document)?;
    }

    let bytes_per_line = config.bytes_per_line as u64;
    let first = steps.iter().filter_map(EditStep::offset).min().unwrap_or(0);
    let start = (first / bytes_per_line * bytes_per_line).min(document.size());
    print!("{}", render_dump(&mut document, start, args.length, config)?);

    if let Some(target) = &args.write {
        let written = match target {
            Some(path) => document.save_as(path.clone())?,
            None => document.save()?,
        };
        println!("wrote {written} bytes");
    }
    Ok(())
}

/// Dump `length` bytes at `offset`, coloring bytes changed since the file
/// was opened when highlighting is on.
pub fn render_dump(
    document: &mut Document,
    offset: u64,
    length: u64,
    config: &RcConfig,
) -> DocumentResult<String> {
    let length = length.min(document.size().saturating_sub(offset)) as usize;
    let bytes_per_line = config.bytes_per_line.max(1);
    if !config.highlight {
        let bytes = document.read(offset, length)?;
        return Ok(hex::to_readable(&bytes, offset, bytes_per_line));
    }

    let (bytes, changed) = document.read_with_change_flags(offset, length)?;
    let width = address_width(offset + bytes.len() as u64, MIN_ADDRESS_WIDTH);
    let mut result = String::new();
    for (row, (line, flags)) in bytes
        .chunks(bytes_per_line)
        .zip(changed.chunks(bytes_per_line))
        .enumerate()
    {
        let address = offset + (row * bytes_per_line) as u64;
        let mut hex_column = String::new();
        let mut ascii_column = String::new();
        for (&byte, &is_changed) in line.iter().zip(flags) {
            if is_changed {
                let color = SetForegroundColor(Color::Red);
                let _ = write!(hex_column, " {color}{byte:02x}{ResetColor}");
                let _ = write!(ascii_column, "{color}{}{ResetColor}", printable(byte));
            } else {
                let _ = write!(hex_column, " {byte:02x}");
                ascii_column.push(printable(byte));
            }
        }
        let padding = (bytes_per_line - line.len()) * 3;
        let _ = writeln!(
            result,
            "{address:0width$x} {hex_column}{:padding$}  {ascii_column}",
            ""
        );
    }
    Ok(result)
}

fn parse_offset(value: &str) -> Result<u64, String> {
    parse_size(value)
        .map(|n| n as u64)
        .ok_or_else(|| format!("invalid offset {value:?}"))
}

fn parse_offset_bytes(value: &str) -> Result<(u64, Vec<u8>), String> {
    let (offset, bytes) = value
        .split_once(':')
        .ok_or_else(|| format!("expected OFF:HEX, got {value:?}"))?;
    let bytes = hex::parse_hex(bytes).map_err(|err| err.to_string())?;
    Ok((parse_offset(offset)?, bytes))
}

fn parse_offset_length(value: &str) -> Result<(u64, u64), String> {
    let (offset, length) = value
        .split_once(':')
        .ok_or_else(|| format!("expected OFF:LEN, got {value:?}"))?;
    Ok((parse_offset(offset)?, parse_offset(length)?))
}

fn parse_replacement(value: &str) -> Result<(u64, u64, Vec<u8>), String> {
    let mut parts = value.splitn(3, ':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(offset), Some(length), Some(bytes)) => {
            let bytes = hex::parse_hex(bytes).map_err(|err| err.to_string())?;
            Ok((parse_offset(offset)?, parse_offset(length)?, bytes))
        }
        _ => Err(format!("expected OFF:LEN:HEX, got {value:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::{CommandFactory, FromArgMatches};

    fn parse(args: &[&str]) -> (Cli, ArgMatches) {
        let matches = Cli::command().try_get_matches_from(args).unwrap();
        let cli = Cli::from_arg_matches(&matches).unwrap();
        (cli, matches)
    }

    fn steps_of(args: &[&str]) -> Vec<EditStep> {
        let (cli, matches) = parse(args);
        let Command::Edit(edit) = &cli.command else {
            panic!("expected edit command");
        };
        ordered_steps(edit, matches.subcommand_matches("edit").unwrap())
    }

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_edit_steps_keep_command_line_order() {
        let steps = steps_of(&[
            "hexrus",
            "edit",
            "data.bin",
            "--remove",
            "2:3",
            "--insert",
            "0x10:aabb",
            "--undo",
            "--insert",
            "0:ff",
            "--redo",
        ]);
        assert_eq!(
            steps,
            vec![
                EditStep::Remove {
                    offset: 2,
                    length: 3
                },
                EditStep::Insert {
                    offset: 16,
                    bytes: vec![0xaa, 0xbb]
                },
                EditStep::Undo,
                EditStep::Insert {
                    offset: 0,
                    bytes: vec![0xff]
                },
                EditStep::Redo,
            ]
        );
    }

    #[test]
    fn test_replace_and_write_arguments() {
        let (cli, _) = parse(&["hexrus", "edit", "a.bin", "--replace", "4:2:010203", "--write"]);
        let Command::Edit(edit) = cli.command else {
            panic!("expected edit command");
        };
        assert_eq!(edit.replace, vec![(4, 2, vec![1, 2, 3])]);
        assert_eq!(edit.write, Some(None));
    }

    #[test]
    fn test_bad_step_values_are_rejected() {
        for bad in [["--insert", "4"], ["--insert", "4:abc"], ["--replace", "1:2"]] {
            let args = ["hexrus", "edit", "a.bin", bad[0], bad[1]];
            assert!(Cli::command().try_get_matches_from(args).is_err());
        }
    }

    #[test]
    fn test_steps_apply_to_document() {
        let mut document = Document::from_bytes((0u8..10).collect::<Vec<_>>());
        let steps = [
            EditStep::Remove {
                offset: 2,
                length: 3,
            },
            EditStep::Insert {
                offset: 2,
                bytes: vec![0xAA],
            },
            EditStep::Undo,
            EditStep::Undo,
            EditStep::Redo,
        ];
        for step in &steps {
            step.apply(&mut document).unwrap();
        }
        assert_eq!(document.data().unwrap(), vec![0, 1, 5, 6, 7, 8, 9]);
    }

    #[test]
    fn test_render_dump_plain_matches_readable() {
        let mut document = Document::from_bytes(b"0123456789".to_vec());
        let config = RcConfig {
            highlight: false,
            ..RcConfig::default()
        };
        let dump = render_dump(&mut document, 2, 100, &config).unwrap();
        assert_eq!(dump, hex::to_readable(b"23456789", 2, 16));
    }

    #[test]
    fn test_render_dump_colors_changed_bytes() {
        let mut document = Document::from_bytes(b"abcd".to_vec());
        document.overwrite(1, b"X").unwrap();
        let dump = render_dump(&mut document, 0, 4, &RcConfig::default()).unwrap();
        let color = SetForegroundColor(Color::Red).to_string();
        assert_eq!(dump.matches(&color).count(), 2);
        assert!(dump.starts_with("0000  61 "));
    }
}
