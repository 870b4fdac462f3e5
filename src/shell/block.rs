//! A `Block` is one shell execution: a process handle, an output buffer,
//! an optional pending-approval record, and at most one completion waiter.
//! Owned exclusively by the shell executor; the dispatcher only ever holds
//! the block-id.

use tokio::sync::oneshot;

use crate::output_buffer::OutputBuffer;
use crate::shell::process::SpawnedProcess;

pub struct Block {
    pub process: Option<SpawnedProcess>,
    pub buffer: OutputBuffer,
    pub pending_approval: Option<Vec<String>>,
    pub completion_waiter: Option<oneshot::Sender<String>>,
}

impl Block {
    pub fn new() -> Self {
        Self {
            process: None,
            buffer: OutputBuffer::new(),
            pending_approval: None,
            completion_waiter: None,
        }
    }
}

impl Default for Block {
    fn default() -> Self {
        Self::new()
    }
}
