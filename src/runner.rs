//! the outer command loop: tokenize a command file and drive the engine
use crate::fs::{VolumeEngine, BLOCK_SIZE, MAX_BLOCK_NUM, MAX_NAME_LEN};
use anyhow::Context;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// largest block count accepted by a create command
const MAX_CREATE_SIZE: u8 = 126;

/// one shape-checked command of the volume grammar
///
/// The grammar layer only validates argument counts and ranges; everything
/// semantic (does the name exist, is there room) is the engine's call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Mount { disk: String },
    Create { name: String, size: u8 },
    Delete { name: String },
    Read { name: String, block: u8 },
    Write { name: String, block: u8 },
    Buffer { bytes: Vec<u8> },
    List,
    Resize { name: String, size: u8 },
    Defragment,
    ChangeDirectory { name: String },
}

impl Command {
    /// tokenize one input line; `None` marks a malformed command
    pub fn parse(line: &str) -> Option<Command> {
        // a buffer load keeps the rest of the line verbatim, spaces included
        if let Some(rest) = line.strip_prefix("B ") {
            let bytes = rest.as_bytes();
            if bytes.is_empty() || bytes.len() > BLOCK_SIZE {
                return None;
            }
            return Some(Command::Buffer {
                bytes: bytes.to_vec(),
            });
        }
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.as_slice() {
            ["M", disk] => Some(Command::Mount {
                disk: (*disk).to_string(),
            }),
            ["C", name, size] => Some(Command::Create {
                name: valid_name(name)?,
                size: parse_number(size, MAX_CREATE_SIZE)?,
            }),
            ["D", name] => Some(Command::Delete {
                name: valid_name(name)?,
            }),
            ["R", name, block] => Some(Command::Read {
                name: valid_name(name)?,
                block: parse_number(block, MAX_BLOCK_NUM)?,
            }),
            ["W", name, block] => Some(Command::Write {
                name: valid_name(name)?,
                block: parse_number(block, MAX_BLOCK_NUM)?,
            }),
            ["L"] => Some(Command::List),
            ["E", name, size] => Some(Command::Resize {
                name: valid_name(name)?,
                size: parse_number(size, MAX_BLOCK_NUM)?,
            }),
            ["O"] => Some(Command::Defragment),
            ["Y", name] => Some(Command::ChangeDirectory {
                name: valid_name(name)?,
            }),
            _ => None,
        }
    }
}

fn valid_name(token: &str) -> Option<String> {
    (!token.is_empty() && token.len() <= MAX_NAME_LEN).then(|| token.to_string())
}

fn parse_number(token: &str, max: u8) -> Option<u8> {
    token.parse::<u8>().ok().filter(|&number| number <= max)
}

/// run every command of `command_file` against a fresh engine
///
/// A malformed line is reported and skipped; an engine error is reported
/// and the stream continues. Neither aborts the run.
pub fn run_commands<P>(command_file: P) -> anyhow::Result<()>
where
    P: AsRef<Path>,
{
    let path = command_file.as_ref();
    let file = File::open(path)
        .with_context(|| format!("input file does not exist: {}", path.display()))?;
    let reader = BufReader::new(file);
    let mut engine = VolumeEngine::new();
    for (line_number, line) in reader.lines().enumerate() {
        let line = line?;
        match Command::parse(&line) {
            Some(command) => dispatch(&mut engine, command),
            None => eprintln!("Command Error: {}, {}", path.display(), line_number + 1),
        }
    }
    Ok(())
}

fn dispatch(engine: &mut VolumeEngine, command: Command) {
    let result = match command {
        Command::Mount { disk } => engine.mount(&disk),
        Command::Create { name, size } => engine.create(&name, size),
        Command::Delete { name } => engine.delete(&name),
        Command::Read { name, block } => engine.read(&name, block),
        Command::Write { name, block } => engine.write(&name, block),
        Command::Buffer { bytes } => engine.set_buffer(&bytes),
        Command::List => engine.list().map(|lines| {
            for line in lines {
                println!("{line}");
            }
        }),
        Command::Resize { name, size } => engine.resize(&name, size),
        Command::Defragment => engine.defragment(),
        Command::ChangeDirectory { name } => engine.change_directory(&name),
    };
    if let Err(error) = result {
        eprintln!("Error: {error}");
    }
}
