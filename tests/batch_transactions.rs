use std::sync::Arc;
use std::time::Duration;

use tagsync_rs::{Batch, ChangeFeed, Command, MemoryStore, Reply, StoreGateway, TagError};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn four_sets_then_four_gets_reply_in_order() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let values = ["ola", "hello", "oie", "hi"];

    let mut batch = Batch::new();
    for (i, value) in values.iter().enumerate() {
        batch.queue(Command::set(format!("key:pipe:{}", i + 1), value));
    }
    let pending: Vec<_> = (1..=4)
        .map(|i| batch.queue(Command::get(format!("key:pipe:{i}"))))
        .collect();

    let replies = batch.commit(&store).await?;
    assert_eq!(replies.len(), 8);
    assert!(replies[..4].iter().all(|reply| *reply == Reply::Ok));

    for ((reply, expected), direct) in pending.into_iter().zip(values).zip(&replies[4..]) {
        let reply = reply.wait().await?;
        assert_eq!(reply, Reply::Text(expected.to_string()));
        assert_eq!(&reply, direct);
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn aborted_batch_executes_nothing() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let mut sub = store.psubscribe("__keyspace@0__:key:pipe:*").await?;

    let mut batch = Batch::new();
    let first = batch.queue(Command::set("key:pipe:1", "ola"));
    batch.queue(Command::set("key:pipe:2", "hello"));
    batch.queue(Command::get("key:pipe:1"));
    assert_eq!(batch.abort(), 3);

    assert!(matches!(first.wait().await, Err(TagError::BatchAborted)));
    assert!(store.is_empty());
    assert!(sub.receive(Duration::from_millis(50)).await?.is_none());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_batch_leaves_no_trace() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    store.sadd("key:set", &["ola".to_string()]).await?;
    let mut sub = store.psubscribe("__keyspace@0__:*").await?;

    let mut batch = Batch::new();
    batch.queue(Command::set("key:pipe:1", "ola"));
    batch.queue(Command::get("key:set"));
    let err = batch.commit(&store).await.unwrap_err();

    assert!(matches!(err, TagError::Store(_)));
    assert!(store.get("key:pipe:1").await?.is_nil());
    assert!(sub.receive(Duration::from_millis(50)).await?.is_none());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_batches_do_not_interleave() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());

    let mut handles = Vec::new();
    for writer in 0..16 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            let mut batch = Batch::new();
            batch.queue(Command::set("shared:key", writer));
            let read = batch.queue(Command::get("shared:key"));
            batch.commit(store.as_ref()).await?;
            let reply = read.wait().await?;
            Ok::<_, TagError>((writer, reply))
        }));
    }

    for handle in handles {
        let (writer, reply) = handle.await??;
        assert_eq!(reply, Reply::Text(writer.to_string()));
    }
    Ok(())
}
