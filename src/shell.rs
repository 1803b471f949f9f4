//! Interactive command shell
//!
//! One command per line:
//!
//! ```text
//! open NAME [CREATE]      attach to NAME, creating it with CREATE
//! close NAME              drop the open handle for NAME
//! read NAME POS N         read up to N bytes at POS
//! write NAME POS DATA     write the rest of the line at POS
//! shrink NAME SIZE        truncate NAME to SIZE bytes
//! rm NAME                 delete NAME
//! stat NAME               show one file
//! ls                      list files
//! fsstat                  show space usage
//! freelist                dump the free list
//! help
//! exit
//! ```
//!
//! Commands other than `open` and `close` work on any existing file, open or not.

use crate::error::FsError;
use crate::fs::{FileHandle, Filesystem};
use crate::io::BackingStore;
use std::collections::HashMap;
use std::io::{self, BufRead, Write};
use thiserror::Error;
use tracing::debug;

const HELP: &str = "\
Commands:
  open NAME [CREATE]    close NAME
  read NAME POS N       write NAME POS DATA
  shrink NAME SIZE      rm NAME
  stat NAME             ls
  fsstat                freelist
  help                  exit";

/// A malformed command line
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Unknown command '{0}' (try 'help')")]
    Unknown(String),

    #[error("Usage: {0}")]
    Usage(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Open { name: String, create: bool },
    Close { name: String },
    Read { name: String, pos: u32, len: u32 },
    Write { name: String, pos: u32, data: String },
    Shrink { name: String, size: u32 },
    Remove { name: String },
    Stat { name: String },
    List,
    FsStat,
    FreeList,
    Help,
    Exit,
}

impl Command {
    /// Parse one line. Blank lines parse to `None`.
    pub fn parse(line: &str) -> Result<Option<Command>, CommandError> {
        let line = line.trim();
        let Some(verb) = line.split_whitespace().next() else {
            return Ok(None);
        };
        let args: Vec<&str> = line.split_whitespace().skip(1).collect();

        let command = match verb {
            "open" => match args.as_slice() {
                [name] => Command::Open {
                    name: name.to_string(),
                    create: false,
                },
                [name, flag] if flag.eq_ignore_ascii_case("create") => Command::Open {
                    name: name.to_string(),
                    create: true,
                },
                _ => return Err(CommandError::Usage("open NAME [CREATE]")),
            },
            "close" => Command::Close {
                name: single(&args, "close NAME")?,
            },
            "read" => match args.as_slice() {
                [name, pos, len] => Command::Read {
                    name: name.to_string(),
                    pos: number(pos, "read NAME POS N")?,
                    len: number(len, "read NAME POS N")?,
                },
                _ => return Err(CommandError::Usage("read NAME POS N")),
            },
            "write" => {
                // DATA is everything after POS, inner spaces included
                let rest = line[verb.len()..].trim_start();
                let (name, rest) = split_word(rest);
                let (pos, data) = split_word(rest);
                match (name, pos, data) {
                    (name, pos, data) if !name.is_empty() && !data.is_empty() => Command::Write {
                        name: name.to_string(),
                        pos: number(pos, "write NAME POS DATA")?,
                        data: data.to_string(),
                    },
                    _ => return Err(CommandError::Usage("write NAME POS DATA")),
                }
            }
            "shrink" => match args.as_slice() {
                [name, size] => Command::Shrink {
                    name: name.to_string(),
                    size: number(size, "shrink NAME SIZE")?,
                },
                _ => return Err(CommandError::Usage("shrink NAME SIZE")),
            },
            "rm" => Command::Remove {
                name: single(&args, "rm NAME")?,
            },
            "stat" => Command::Stat {
                name: single(&args, "stat NAME")?,
            },
            "ls" => Command::List,
            "fsstat" => Command::FsStat,
            "freelist" => Command::FreeList,
            "help" => Command::Help,
            "exit" | "quit" => Command::Exit,
            other => return Err(CommandError::Unknown(other.to_string())),
        };

        Ok(Some(command))
    }
}

fn single(args: &[&str], usage: &'static str) -> Result<String, CommandError> {
    match args {
        [name] => Ok(name.to_string()),
        _ => Err(CommandError::Usage(usage)),
    }
}

/// First word of `text` and the remainder with leading whitespace removed
fn split_word(text: &str) -> (&str, &str) {
    match text.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim_start()),
        None => (text, ""),
    }
}

fn number(arg: &str, usage: &'static str) -> Result<u32, CommandError> {
    arg.parse().map_err(|_| CommandError::Usage(usage))
}

/// Runs commands against a filesystem, writing results to `out`
pub struct Shell<'a, B: BackingStore, W: Write> {
    fs: &'a mut Filesystem<B>,
    out: W,
    handles: HashMap<String, FileHandle>,
    json: bool,
}

impl<'a, B: BackingStore, W: Write> Shell<'a, B, W> {
    pub fn new(fs: &'a mut Filesystem<B>, out: W) -> Self {
        Shell {
            fs,
            out,
            handles: HashMap::new(),
            json: false,
        }
    }

    /// Print `fsstat`, `stat` and `ls` as JSON
    pub fn json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    pub fn into_output(self) -> W {
        self.out
    }

    /// Read commands from `input` until `exit` or end of input
    pub fn run<R: BufRead>(&mut self, input: R) -> io::Result<()> {
        writeln!(self.out, "FileSystem Shell Ready.")?;
        let mut lines = input.lines();

        loop {
            write!(self.out, "> ")?;
            self.out.flush()?;

            let Some(line) = lines.next() else {
                break;
            };
            if !self.execute_line(&line?)? {
                break;
            }
        }

        writeln!(self.out)?;
        self.out.flush()
    }

    /// Execute one line; returns `false` on `exit`
    pub fn execute_line(&mut self, line: &str) -> io::Result<bool> {
        match Command::parse(line) {
            Ok(Some(command)) => self.execute(command),
            Ok(None) => Ok(true),
            Err(e) => {
                writeln!(self.out, "{}", e)?;
                Ok(true)
            }
        }
    }

    /// Execute a parsed command; returns `false` on `exit`
    ///
    /// Filesystem errors are reported on the output and do not end the session.
    pub fn execute(&mut self, command: Command) -> io::Result<bool> {
        debug!("Shell command: {:?}", command);
        if command == Command::Exit {
            return Ok(false);
        }

        if let Err(e) = self.dispatch(command) {
            match e {
                ShellFailure::Fs(e) => writeln!(self.out, "Error: {}", e)?,
                ShellFailure::Output(e) => return Err(e),
            }
        }
        Ok(true)
    }

    fn dispatch(&mut self, command: Command) -> Result<(), ShellFailure> {
        match command {
            Command::Open { name, create } => {
                let handle = self.fs.open_file(&name, create)?;
                writeln!(self.out, "Opened file {}.", name)?;
                self.handles.insert(name, handle);
            }
            Command::Close { name } => match self.handles.remove(&name) {
                Some(mut handle) => {
                    self.fs.close_file(&mut handle);
                    writeln!(self.out, "Closed file {}.", name)?;
                }
                None => writeln!(self.out, "{} is not open.", name)?,
            },
            Command::Read { name, pos, len } => {
                let handle = self.handle(&name)?;
                let bytes = self.fs.read(&handle, pos, len)?;
                if bytes.is_empty() {
                    writeln!(self.out, "Nothing read.")?;
                } else {
                    writeln!(self.out, "Read: {}", String::from_utf8_lossy(&bytes))?;
                }
            }
            Command::Write { name, pos, data } => {
                let handle = self.handle(&name)?;
                let written = self.fs.write(&handle, pos, data.as_bytes())?;
                writeln!(self.out, "Wrote {} bytes.", written)?;
            }
            Command::Shrink { name, size } => {
                let handle = self.handle(&name)?;
                self.fs.shrink(&handle, size)?;
                writeln!(self.out, "Shrunk {} to {} bytes.", name, size)?;
            }
            Command::Remove { name } => {
                let mut handle = self.handle(&name)?;
                self.fs.remove(&mut handle)?;
                self.handles.remove(&name);
                writeln!(self.out, "Removed {}.", name)?;
            }
            Command::Stat { name } => {
                let handle = self.handle(&name)?;
                let stats = self.fs.file_stats(&handle)?;
                if self.json {
                    writeln!(self.out, "{}", to_json(&stats)?)?;
                } else {
                    writeln!(self.out, "File: {}", stats.name)?;
                    writeln!(self.out, "Size: {} bytes", stats.size)?;
                    match stats.extent_start {
                        Some(start) => writeln!(self.out, "Start: {}", start)?,
                        None => writeln!(self.out, "Start: (unallocated)")?,
                    }
                }
            }
            Command::List => {
                let files = self.fs.list_files()?;
                if self.json {
                    writeln!(self.out, "{}", to_json(&files)?)?;
                } else if files.is_empty() {
                    writeln!(self.out, "No files.")?;
                } else {
                    for file in files {
                        writeln!(self.out, "{:>10}  {}", file.size, file.name)?;
                    }
                }
            }
            Command::FsStat => {
                let stats = self.fs.stats()?;
                if self.json {
                    writeln!(self.out, "{}", to_json(&stats)?)?;
                } else {
                    writeln!(self.out, "{}", stats)?;
                }
            }
            Command::FreeList => {
                let blocks = self.fs.free_blocks()?;
                if blocks.is_empty() {
                    writeln!(self.out, "Free list is empty.")?;
                }
                for block in blocks {
                    writeln!(self.out, "[{}, {}) {} bytes", block.start, block.end(), block.size)?;
                }
            }
            Command::Help => writeln!(self.out, "{}", HELP)?,
            Command::Exit => {}
        }
        Ok(())
    }

    /// The open handle for `name`, or a fresh one if the file exists
    fn handle(&mut self, name: &str) -> Result<FileHandle, FsError> {
        match self.handles.get(name) {
            Some(handle) => Ok(handle.clone()),
            None => self.fs.open_file(name, false),
        }
    }
}

enum ShellFailure {
    Fs(FsError),
    Output(io::Error),
}

impl From<FsError> for ShellFailure {
    fn from(e: FsError) -> Self {
        ShellFailure::Fs(e)
    }
}

impl From<io::Error> for ShellFailure {
    fn from(e: io::Error) -> Self {
        ShellFailure::Output(e)
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, ShellFailure> {
    serde_json::to_string_pretty(value)
        .map_err(|e| ShellFailure::Output(io::Error::new(io::ErrorKind::InvalidData, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::DATA_OFFSET;
    use crate::io::MemStore;

    fn run_script(fs: &mut Filesystem<MemStore>, script: &str) -> String {
        let mut shell = Shell::new(fs, Vec::new());
        for line in script.lines() {
            if !shell.execute_line(line).unwrap() {
                break;
            }
        }
        String::from_utf8(shell.into_output()).unwrap()
    }

    #[test]
    fn test_parse() {
        assert_eq!(Command::parse("   ").unwrap(), None);
        assert_eq!(
            Command::parse("open notes CREATE").unwrap(),
            Some(Command::Open {
                name: "notes".to_string(),
                create: true
            })
        );
        assert_eq!(
            Command::parse("write notes 3 hello world").unwrap(),
            Some(Command::Write {
                name: "notes".to_string(),
                pos: 3,
                data: "hello world".to_string()
            })
        );
        assert_eq!(
            Command::parse("read notes 0 10").unwrap(),
            Some(Command::Read {
                name: "notes".to_string(),
                pos: 0,
                len: 10
            })
        );
        assert_eq!(Command::parse("fsstat").unwrap(), Some(Command::FsStat));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            Command::parse("format now"),
            Err(CommandError::Unknown("format".to_string()))
        );
        assert_eq!(
            Command::parse("read notes x 10"),
            Err(CommandError::Usage("read NAME POS N"))
        );
        assert_eq!(
            Command::parse("write notes 0"),
            Err(CommandError::Usage("write NAME POS DATA"))
        );
        assert!(Command::parse("open a b c").is_err());
    }

    #[test]
    fn test_session() {
        let mut fs = Filesystem::format(MemStore::new(DATA_OFFSET as usize + 100)).unwrap();
        let output = run_script(
            &mut fs,
            "open notes CREATE\n\
             write notes 0 hello\n\
             read notes 0 100\n\
             shrink notes 2\n\
             read notes 0 100\n\
             read notes 5 1\n\
             rm notes\n\
             read notes 0 1\n\
             exit\n\
             ls\n",
        );

        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(
            lines,
            vec![
                "Opened file notes.",
                "Wrote 5 bytes.",
                "Read: hello",
                "Shrunk notes to 2 bytes.",
                "Read: he",
                "Nothing read.",
                "Removed notes.",
                "Error: File not found: notes",
            ]
        );
    }

    #[test]
    fn test_closed_name_still_reachable() {
        let mut fs = Filesystem::format(MemStore::new(DATA_OFFSET as usize + 100)).unwrap();
        let output = run_script(
            &mut fs,
            "open a CREATE\nwrite a 0 xyz\nclose a\nclose a\nread a 0 3\n",
        );

        assert!(output.contains("Closed file a."));
        assert!(output.contains("a is not open."));
        assert!(output.contains("Read: xyz"));
    }

    #[test]
    fn test_fsstat_json() {
        let mut fs = Filesystem::format(MemStore::new(DATA_OFFSET as usize + 100)).unwrap();
        let mut shell = Shell::new(&mut fs, Vec::new()).json(true);
        shell.execute_line("fsstat").unwrap();

        let output = String::from_utf8(shell.into_output()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["free_bytes"], 100);
        assert_eq!(value["free_block_count"], 1);
    }

    #[test]
    fn test_run_prompts_until_exit() {
        let mut fs = Filesystem::format(MemStore::new(DATA_OFFSET as usize + 100)).unwrap();
        let mut shell = Shell::new(&mut fs, Vec::new());
        shell.run("help\nexit\nls\n".as_bytes()).unwrap();

        let output = String::from_utf8(shell.into_output()).unwrap();
        assert!(output.starts_with("FileSystem Shell Ready.\n> Commands:"));
        assert!(!output.contains("No files."));
    }
}
