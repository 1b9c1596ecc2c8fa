//! Client-side transaction builder.
//!
//! A [`Batch`] collects commands and submits them through
//! [`StoreGateway::exec`] as one atomic unit. Every queued command hands back
//! a [`PendingReply`] that resolves to its own reply once the batch commits.

use super::{Command, Reply, StoreGateway};
use crate::error::{Result, TagError};
use tokio::sync::oneshot;

/// An open transaction.
#[derive(Debug, Default)]
pub struct Batch {
    commands: Vec<Command>,
    replies: Vec<oneshot::Sender<Reply>>,
}

impl Batch {
    /// Begin a new, empty transaction.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a command; nothing is sent until [`Batch::commit`].
    pub fn queue(&mut self, command: Command) -> PendingReply {
        let (tx, rx) = oneshot::channel();
        self.commands.push(command);
        self.replies.push(tx);
        PendingReply { rx }
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Execute all queued commands atomically and return their replies in
    /// submission order.
    pub async fn commit(self, store: &dyn StoreGateway) -> Result<Vec<Reply>> {
        let Batch { commands, replies } = self;
        let expected = commands.len();
        let results = store.exec(commands).await.map_err(TagError::Store)?;
        if results.len() != expected {
            return Err(TagError::Store(anyhow::anyhow!(
                "transaction returned {} replies for {} commands",
                results.len(),
                expected
            )));
        }

        for (tx, reply) in replies.into_iter().zip(results.iter()) {
            // The caller may have dropped the pending reply.
            let _ = tx.send(reply.clone());
        }
        Ok(results)
    }

    /// Abandon the transaction. Queued commands are never executed and their
    /// pending replies resolve to [`TagError::BatchAborted`].
    ///
    /// Returns the number of discarded commands.
    pub fn abort(self) -> usize {
        self.commands.len()
    }
}

/// Reply slot for one queued command.
#[derive(Debug)]
pub struct PendingReply {
    rx: oneshot::Receiver<Reply>,
}

impl PendingReply {
    /// Wait for the command's reply.
    pub async fn wait(self) -> Result<Reply> {
        self.rx.await.map_err(|_| TagError::BatchAborted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MemoryStore;

    #[tokio::test]
    async fn test_commit_resolves_pending_replies() {
        let store = MemoryStore::new();
        let mut batch = Batch::new();
        batch.queue(Command::set("key:pipe:1", "ola"));
        let get = batch.queue(Command::get("key:pipe:1"));
        assert_eq!(batch.len(), 2);

        let replies = batch.commit(&store).await.unwrap();
        assert_eq!(replies, vec![Reply::Ok, Reply::Text("ola".to_string())]);
        assert_eq!(get.wait().await.unwrap(), Reply::Text("ola".to_string()));
    }

    #[tokio::test]
    async fn test_abort_never_executes() {
        let store = MemoryStore::new();
        let mut batch = Batch::new();
        let set = batch.queue(Command::set("key:pipe:1", "ola"));
        batch.queue(Command::set("key:pipe:2", "hello"));

        assert_eq!(batch.abort(), 2);
        assert!(matches!(set.wait().await, Err(TagError::BatchAborted)));
        assert!(store.get("key:pipe:1").await.unwrap().is_nil());
        assert!(store.get("key:pipe:2").await.unwrap().is_nil());
    }
}
