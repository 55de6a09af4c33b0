/// Metadata for a stored payload. Only the size is tracked; filestores know
/// nothing about ownership, permissions or timestamps.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileInfo {
    pub size: u64,
}

/// Result of a cheap, possibly-inexact existence check.
///
/// `Yes` and `No` are authoritative. `Maybe` means the backend could not
/// rule the key out (e.g. a summary structure matched) and must be followed
/// by [`exists`](crate::FileStore::exists) to get an answer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Presence {
    Yes,
    No,
    Maybe,
}
