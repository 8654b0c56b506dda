//! Clipboard channel port

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::errors::ClipboardError;

/// The system clipboard as seen by the reconciler. Adapters wrap whatever
/// the platform provides; the core only ever reads and overwrites whole
/// strings.
#[async_trait]
pub trait ClipboardPort: Send + Sync {
    async fn read(&self) -> Result<String, ClipboardError>;
    async fn write(&self, content: &str) -> Result<(), ClipboardError>;
}

/// In-memory clipboard for tests and dry runs. Writes from the "page" side
/// go through [`MemoryClipboard::set`].
#[derive(Default)]
pub struct MemoryClipboard {
    content: Mutex<String>,
}

impl MemoryClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the target page (or any other process) writing content.
    pub fn set(&self, content: impl Into<String>) {
        *self.content.lock() = content.into();
    }
}

#[async_trait]
impl ClipboardPort for MemoryClipboard {
    async fn read(&self) -> Result<String, ClipboardError> {
        Ok(self.content.lock().clone())
    }

    async fn write(&self, content: &str) -> Result<(), ClipboardError> {
        *self.content.lock() = content.to_string();
        Ok(())
    }
}
