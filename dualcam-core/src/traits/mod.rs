pub mod compositor;
pub mod recording_delegate;
pub mod writable;
