//! Handler trait: the seam where the engine hands changes to its caller.

use std::path::Path;

use super::event::ChangeMask;

/// Receives user-visible changes from the engine.
///
/// The engine calls this synchronously, including from inside walk
/// recursion, so implementations should do nothing heavier than format
/// and write a record.
pub trait ChangeHandler {
    /// A newly watched path discovered by an event-driven rescan.
    /// Initial registration of a root does not announce.
    fn created(&mut self, path: &Path);

    /// A change on a watched path. The mask says what kind; the handler
    /// decides how (and whether) to surface it.
    fn changed(&mut self, path: &Path, mask: ChangeMask);

    /// A distinguished condition the controlling process should know
    /// about: queue overflow, watch quota exhaustion.
    fn message(&mut self, text: &str);
}
