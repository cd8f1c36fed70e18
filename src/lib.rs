pub mod config;
pub mod logging;
pub mod protocol;
pub mod watcher;

pub use config::Settings;
pub use protocol::{Command, CommandParser, ProtocolError, RecordWriter};
pub use watcher::{
    ChangeHandler, ChangeMask, DefaultSource, EventSource, RawEvent, WalkError, WatchEngine,
    WatchError, WatchHandle,
};
