//! Collective communication between the ranks of one operator invocation.
//!
//! The operator only needs a root-to-all broadcast. [Communicator] is the seam towards the
//! process-group transport of the engine; [LocalGroup] runs a whole group inside one process on
//! top of a [tokio::sync::broadcast] channel.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::broadcast;

/// Rank that performs the setup and originates every broadcast.
pub const ROOT: usize = 0;

/// Collective communication error
#[derive(Debug, Error)]
pub enum CommError {
    /// The root rank called broadcast without a message
    #[error("root rank has no message to broadcast")]
    MissingMessage,

    /// A non-root rank tried to originate a broadcast
    #[error("rank {rank} cannot originate a broadcast")]
    NotRoot { rank: usize },

    /// The group has shut down
    #[error("process group closed")]
    Closed,

    /// Messages were dropped before this rank received them
    #[error("rank {rank} missed {missed} broadcast messages")]
    Lagged { rank: usize, missed: u64 },
}

/// Member of a process group.
#[async_trait]
pub trait Communicator: Send {
    /// Index of this rank within the group.
    fn rank(&self) -> usize;

    /// Number of ranks in the group.
    fn size(&self) -> usize;

    /// Broadcast a message from the root rank to every rank.
    ///
    /// The root passes `Some(message)`, every other rank passes `None`. All ranks, the root
    /// included, return the message.
    async fn broadcast(&mut self, message: Option<Bytes>) -> Result<Bytes, CommError>;
}

/// Builder of in-process groups.
pub struct LocalGroup;

impl LocalGroup {
    /// Create the communicators of a group of `size` ranks.
    ///
    /// # Arguments
    ///
    /// * `size`: Number of ranks, at least one
    /// * `capacity`: Number of messages buffered per rank
    pub fn new(size: usize, capacity: usize) -> Vec<LocalCommunicator> {
        let (sender, _) = broadcast::channel(capacity.max(1));
        (0..size)
            .map(|rank| LocalCommunicator {
                rank,
                size,
                receiver: sender.subscribe(),
                sender: sender.clone(),
            })
            .collect()
    }
}

/// Communicator of a [LocalGroup].
pub struct LocalCommunicator {
    rank: usize,
    size: usize,
    sender: broadcast::Sender<Bytes>,
    receiver: broadcast::Receiver<Bytes>,
}

#[async_trait]
impl Communicator for LocalCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    async fn broadcast(&mut self, message: Option<Bytes>) -> Result<Bytes, CommError> {
        match (self.rank == ROOT, message) {
            (true, Some(message)) => {
                self.sender
                    .send(message)
                    .map_err(|_| CommError::Closed)?;
            }
            (true, None) => return Err(CommError::MissingMessage),
            (false, Some(_)) => return Err(CommError::NotRoot { rank: self.rank }),
            (false, None) => (),
        }
        self.receiver.recv().await.map_err(|err| match err {
            broadcast::error::RecvError::Closed => CommError::Closed,
            broadcast::error::RecvError::Lagged(missed) => CommError::Lagged {
                rank: self.rank,
                missed,
            },
        })
    }
}
