//! Local IPFS pinning through the `ipfs` command line client.

use bridge_traits::pinning::ContentPinner;
use std::path::PathBuf;
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Options for [`IpfsCliPinner`]
#[derive(Debug, Clone)]
pub struct PinningOptions {
    /// Executable to invoke
    pub binary: PathBuf,
    /// Value exported as `IPFS_PATH` for the child process
    pub ipfs_path: Option<PathBuf>,
    /// Pending identifiers held before new submissions are dropped
    pub queue_capacity: usize,
}

impl Default for PinningOptions {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("ipfs"),
            ipfs_path: None,
            queue_capacity: 1024,
        }
    }
}

/// Pins content identifiers by running `ipfs pin add <cid>`.
///
/// Submissions go into a bounded channel drained by a background task that
/// runs one command at a time. A full queue drops the identifier; a failed
/// command is logged. Neither is ever surfaced to the submitter.
pub struct IpfsCliPinner {
    sender: mpsc::Sender<String>,
}

impl IpfsCliPinner {
    /// Start the background worker on the current tokio runtime.
    pub fn spawn(options: PinningOptions) -> Self {
        let (sender, receiver) = mpsc::channel(options.queue_capacity.max(1));
        tokio::spawn(run_pin_worker(options, receiver));
        Self { sender }
    }
}

impl ContentPinner for IpfsCliPinner {
    fn submit(&self, content_id: &str) {
        match self.sender.try_send(content_id.to_string()) {
            Ok(()) => debug!(content_id = %content_id, "Queued content for pinning"),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(content_id = %content_id, "Pin queue full, dropping request")
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(content_id = %content_id, "Pin worker stopped, dropping request")
            }
        }
    }
}

async fn run_pin_worker(options: PinningOptions, mut receiver: mpsc::Receiver<String>) {
    while let Some(content_id) = receiver.recv().await {
        let mut command = Command::new(&options.binary);
        command.arg("pin").arg("add").arg(&content_id);
        if let Some(path) = &options.ipfs_path {
            command.env("IPFS_PATH", path);
        }

        match command.output().await {
            Ok(output) if output.status.success() => {
                debug!(content_id = %content_id, "Pinned content");
            }
            Ok(output) => {
                warn!(
                    content_id = %content_id,
                    status = %output.status,
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "Could not pin content"
                );
            }
            Err(e) => {
                warn!(content_id = %content_id, error = %e, "Could not run pin command");
            }
        }
    }
    debug!("Pin worker exiting");
}
