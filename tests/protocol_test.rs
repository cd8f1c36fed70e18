//! Session-level tests for the command/record surface.

use std::path::{Path, PathBuf};

use treewatch::watcher::WatchHandle;
use treewatch::{ChangeHandler, ChangeMask, Command, CommandParser, RecordWriter};

/// Feed a whole session transcript and collect what the parser yields.
fn parse_session(lines: &[&str]) -> Vec<Command> {
    let mut parser = CommandParser::new();
    lines
        .iter()
        .filter_map(|line| parser.feed(line))
        .map(|result| result.expect("well-formed session"))
        .collect()
}

#[test]
fn full_session_parses_in_order() {
    let commands = parse_session(&[
        "WATCH",
        "/srv/project",
        "/srv/project/target",
        "#",
        "WATCH",
        "/etc/app.conf",
        "#",
        "UNWATCH",
        "5",
        "EXIT",
    ]);

    assert_eq!(
        commands,
        vec![
            Command::Watch {
                root: PathBuf::from("/srv/project"),
                ignores: vec!["/srv/project/target".to_string()],
            },
            Command::Watch {
                root: PathBuf::from("/etc/app.conf"),
                ignores: Vec::new(),
            },
            Command::Unwatch { handle: 5 },
            Command::Exit,
        ]
    );
}

#[test]
fn blank_lines_between_commands_are_tolerated() {
    let commands = parse_session(&["", "WATCH", "/data", "#", "", "EXIT"]);
    assert_eq!(commands.len(), 2);
    assert_eq!(commands[1], Command::Exit);
}

#[test]
fn replies_and_records_share_one_shape() {
    let mut buf = Vec::new();
    {
        let mut writer = RecordWriter::new(&mut buf);
        writer.watched(WatchHandle::new(7));
        writer.created(Path::new("/data/new"));
        writer.changed(Path::new("/data/file"), ChangeMask::CONTENT);
        writer.unwatcheable(Path::new("/data/locked"));
        writer.message("watch limit reached; some paths are not watched");
    }

    let text = String::from_utf8(buf).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    // Strict tag/payload alternation; the parent reads two lines per record.
    assert_eq!(
        lines,
        vec![
            "WATCHED",
            "7",
            "CREATE",
            "/data/new",
            "CHANGE",
            "/data/file",
            "UNWATCHEABLE",
            "/data/locked",
            "MESSAGE",
            "watch limit reached; some paths are not watched",
        ]
    );
}
