//! The line-oriented surface between the daemon and its controlling
//! process: commands in on stdin, change records out on stdout.
//!
//! Records are two ASCII lines, tag then payload, flushed as a unit:
//!
//! ```text
//! CREATE\n<path>\n         newly watched path found by a rescan
//! CHANGE\n<path>\n         content changed
//! STATS\n<path>\n          metadata changed
//! DELETE\n<path>\n         removed, renamed away, or revoked
//! WATCHED\n<handle>\n      reply to WATCH
//! UNWATCHEABLE\n<path>\n   WATCH failed for this root
//! MESSAGE\n<text>\n        overflow, quota, or protocol trouble
//! ```
//!
//! Commands mirror that shape. `WATCH` opens a block: the next line is
//! the root, further lines are per-root ignore rules, and `#` closes it.
//! `UNWATCH` takes the handle on the following line. `EXIT` stands
//! alone; end of stream means the same thing.

use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::warn;

use crate::watcher::{ChangeHandler, ChangeMask, WatchHandle};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("WATCH block closed without a root path")]
    MissingRoot,

    #[error("bad watch handle: {0}")]
    BadHandle(String),
}

/// A fully parsed command from the controlling process.
#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    Watch {
        root: PathBuf,
        ignores: Vec<String>,
    },
    Unwatch {
        handle: i32,
    },
    Exit,
}

enum ParserState {
    Idle,
    WatchBlock {
        root: Option<PathBuf>,
        ignores: Vec<String>,
    },
    UnwatchArg,
}

/// Stateful line parser for the command stream.
///
/// Feed one line at a time; a command comes back once its final line
/// has arrived. A malformed line resets the parser so the next command
/// starts clean.
pub struct CommandParser {
    state: ParserState,
}

impl CommandParser {
    pub fn new() -> Self {
        Self {
            state: ParserState::Idle,
        }
    }

    pub fn feed(&mut self, line: &str) -> Option<Result<Command, ProtocolError>> {
        match &mut self.state {
            ParserState::Idle => match line {
                "WATCH" => {
                    self.state = ParserState::WatchBlock {
                        root: None,
                        ignores: Vec::new(),
                    };
                    None
                }
                "UNWATCH" => {
                    self.state = ParserState::UnwatchArg;
                    None
                }
                "EXIT" => Some(Ok(Command::Exit)),
                "" => None,
                other => Some(Err(ProtocolError::UnknownCommand(other.to_string()))),
            },

            ParserState::WatchBlock { root, ignores } => {
                if line == "#" {
                    let root = root.take();
                    let ignores = std::mem::take(ignores);
                    self.state = ParserState::Idle;
                    return Some(match root {
                        Some(root) => Ok(Command::Watch { root, ignores }),
                        None => Err(ProtocolError::MissingRoot),
                    });
                }
                if root.is_none() {
                    *root = Some(PathBuf::from(line));
                } else {
                    ignores.push(line.to_string());
                }
                None
            }

            ParserState::UnwatchArg => {
                self.state = ParserState::Idle;
                Some(match line.parse::<i32>() {
                    Ok(handle) => Ok(Command::Unwatch { handle }),
                    Err(_) => Err(ProtocolError::BadHandle(line.to_string())),
                })
            }
        }
    }
}

impl Default for CommandParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Formats change records onto the output stream.
///
/// One callback invocation becomes at most one record; when a mask
/// carries several bits the most severe wins, so a burst of kernel
/// flags on one object stays a single logical record.
pub struct RecordWriter<W: Write> {
    out: W,
}

impl<W: Write> RecordWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn watched(&mut self, handle: WatchHandle) {
        self.record("WATCHED", &handle.to_string());
    }

    pub fn unwatcheable(&mut self, root: &Path) {
        self.record("UNWATCHEABLE", &root.display().to_string());
    }

    fn record(&mut self, tag: &str, payload: &str) {
        // A write failure means the controlling process is gone; the
        // run loop notices through stdin, so just log here.
        if let Err(e) = writeln!(self.out, "{tag}\n{payload}").and_then(|_| self.out.flush()) {
            warn!("[protocol] cannot write {tag} record: {e}");
        }
    }
}

impl<W: Write> ChangeHandler for RecordWriter<W> {
    fn created(&mut self, path: &Path) {
        self.record("CREATE", &path.display().to_string());
    }

    fn changed(&mut self, path: &Path, mask: ChangeMask) {
        let tag = if mask.intersects(ChangeMask::GONE | ChangeMask::REMOVED) {
            "DELETE"
        } else if mask.contains(ChangeMask::CREATED) {
            "CREATE"
        } else if mask.contains(ChangeMask::CONTENT) {
            "CHANGE"
        } else if mask.contains(ChangeMask::METADATA) {
            "STATS"
        } else {
            return;
        };
        self.record(tag, &path.display().to_string());
    }

    fn message(&mut self, text: &str) {
        self.record("MESSAGE", text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(parser: &mut CommandParser, lines: &[&str]) -> Vec<Result<Command, ProtocolError>> {
        lines.iter().filter_map(|l| parser.feed(l)).collect()
    }

    #[test]
    fn parses_watch_block() {
        let mut parser = CommandParser::new();
        let got = feed_all(
            &mut parser,
            &["WATCH", "/tmp/project", "/tmp/project/target", "build", "#"],
        );
        assert_eq!(
            got,
            vec![Ok(Command::Watch {
                root: PathBuf::from("/tmp/project"),
                ignores: vec!["/tmp/project/target".to_string(), "build".to_string()],
            })]
        );
    }

    #[test]
    fn parses_unwatch_and_exit() {
        let mut parser = CommandParser::new();
        let got = feed_all(&mut parser, &["UNWATCH", "17", "EXIT"]);
        assert_eq!(
            got,
            vec![Ok(Command::Unwatch { handle: 17 }), Ok(Command::Exit)]
        );
    }

    #[test]
    fn rejects_unknown_and_recovers() {
        let mut parser = CommandParser::new();
        let got = feed_all(&mut parser, &["FROB", "EXIT"]);
        assert_eq!(
            got,
            vec![
                Err(ProtocolError::UnknownCommand("FROB".to_string())),
                Ok(Command::Exit)
            ]
        );
    }

    #[test]
    fn empty_watch_block_is_an_error() {
        let mut parser = CommandParser::new();
        let got = feed_all(&mut parser, &["WATCH", "#"]);
        assert_eq!(got, vec![Err(ProtocolError::MissingRoot)]);
    }

    #[test]
    fn bad_handle_is_an_error() {
        let mut parser = CommandParser::new();
        let got = feed_all(&mut parser, &["UNWATCH", "banana"]);
        assert_eq!(got, vec![Err(ProtocolError::BadHandle("banana".to_string()))]);
    }

    #[test]
    fn records_are_two_lines_each() {
        let mut buf = Vec::new();
        {
            let mut writer = RecordWriter::new(&mut buf);
            writer.created(Path::new("/tmp/a/new"));
            writer.changed(Path::new("/tmp/a/file"), ChangeMask::CONTENT);
            writer.changed(Path::new("/tmp/a/file"), ChangeMask::METADATA);
            writer.changed(Path::new("/tmp/a/gone"), ChangeMask::GONE);
            writer.message("queue overflowed");
        }
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(
            text,
            "CREATE\n/tmp/a/new\nCHANGE\n/tmp/a/file\nSTATS\n/tmp/a/file\nDELETE\n/tmp/a/gone\nMESSAGE\nqueue overflowed\n"
        );
    }

    #[test]
    fn severity_picks_one_record() {
        let mut buf = Vec::new();
        {
            let mut writer = RecordWriter::new(&mut buf);
            writer.changed(
                Path::new("/tmp/x"),
                ChangeMask::GONE | ChangeMask::CONTENT | ChangeMask::METADATA,
            );
        }
        assert_eq!(String::from_utf8(buf).unwrap(), "DELETE\n/tmp/x\n");
    }
}
