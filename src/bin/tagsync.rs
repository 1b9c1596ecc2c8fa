use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use tagsync_rs::config::{ConfigOverrides, RegistryOverrides, StoreOverrides, TagsyncConfig};
use tagsync_rs::{
    Batch, ChangeFeed, Command, FieldValue, MemoryStore, RedisChangeFeed, RedisStore,
    StoreGateway, Tag, TagContext, TagManager,
};

fn parse_arg(flag: &str) -> Option<String> {
    let mut args = std::env::args();
    while let Some(arg) = args.next() {
        if arg == flag {
            return args.next();
        }
    }
    None
}

fn has_flag(flag: &str) -> bool {
    std::env::args().any(|arg| arg == flag)
}

fn print_help() {
    eprintln!(
        r#"tagsync - store-backed tag walkthrough

USAGE:
    tagsync [OPTIONS]

OPTIONS:
    -c, --config <FILE>     Path to config file (TOML)
    -u, --url <URL>         Override store URL [default: redis://127.0.0.1:6379]
    -r, --registry <NAME>   Override registry name [default: @pressure]
    -n, --limit <N>         Number of tags to create [default: 1]
        --report <N>        Report timing every N admissions [default: 1]
        --linger <SECS>     Keep reconciliation running before exit [default: 15]
        --notify            Enable keyspace notifications on the server
        --skip-toy          Skip the raw store walkthrough
        --memory            Use the in-process store instead of Redis
    -h, --help              Print help

ENVIRONMENT:
    TAGSYNC_CONFIG                              Path to config file
    TAGSYNC_STORE__URL                          Store URL
    TAGSYNC_STORE__CONNECT_TIMEOUT_SECS         Connect timeout
    TAGSYNC_STORE__KEYSPACE_DB                  Keyspace notification database
    TAGSYNC_STORE__CONFIGURE_NOTIFICATIONS      Enable keyspace events on connect
    TAGSYNC_RECONCILE__BACKOFF_MS               Pause after each reconcile step
    TAGSYNC_RECONCILE__RECEIVE_TIMEOUT_MS       Wait for one notification
    TAGSYNC_RECONCILE__NOTIFICATION_CAPACITY    In-process subscriber buffer
    TAGSYNC_REGISTRY__NAME                      Registry name
"#
    );
}

fn numeric_arg(long: &str, short: Option<&str>, default: u64) -> anyhow::Result<u64> {
    let raw = parse_arg(long).or_else(|| short.and_then(parse_arg));
    match raw {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("{long} expects a number, got {raw}")),
        None => Ok(default),
    }
}

async fn toy_walkthrough(store: &RedisStore, feed: &RedisChangeFeed) -> anyhow::Result<()> {
    // Strings
    store.set("key:string", "ola").await?;
    let reply = store.get("key:string").await?;
    println!("the key key:string is {reply}");

    // Sets
    store
        .sadd("key:set", &["ola".to_string(), "mundo".to_string()])
        .await?;
    println!("the key key:set has len {}", store.scard("key:set").await?);
    for member in store.smembers("key:set").await? {
        println!("the key key:set has elem {member}");
    }

    // Pub/sub
    let mut sub = feed.subscribe("channel:test").await?;
    store.publish("channel:test", "hello").await?;
    match sub.receive(Duration::from_secs(10)).await? {
        Some(note) => println!(
            "Received message from channel {} {}",
            note.channel, note.payload
        ),
        None => bail!("timeout waiting for message on channel:test"),
    }

    // MULTI/EXEC with per-command replies
    let mut batch = Batch::new();
    for (i, value) in ["ola", "hello", "oie", "hi"].iter().enumerate() {
        batch.queue(Command::set(format!("key:pipe:{}", i + 1), value));
    }
    let pending: Vec<_> = (1..=4)
        .map(|i| batch.queue(Command::get(format!("key:pipe:{i}"))))
        .collect();
    let replies = batch.commit(store).await?;
    let mut responses = Vec::with_capacity(pending.len());
    for reply in pending {
        responses.push(reply.wait().await?.to_string());
    }
    println!("Responses: {}", responses.join(", "));
    for (i, reply) in replies.iter().enumerate() {
        println!("Result for op {i}: {reply}");
    }

    // Aborted transaction: nothing queued is executed
    let mut batch = Batch::new();
    batch.queue(Command::set("key:pipe:1", "discarded"));
    batch.queue(Command::get("key:pipe:1"));
    println!("Result for discard: {} commands dropped", batch.abort());

    Ok(())
}

async fn tag_manager_walkthrough(
    ctx: &TagContext,
    registry: &str,
    limit: u64,
    report: u64,
) -> anyhow::Result<TagManager> {
    let mut manager = TagManager::new(registry);
    let started = Instant::now();

    let tags: Vec<Tag> = (0..limit)
        .map(|i| Tag::new(ctx, format!("tank-{i}"), format!("tank {i}"), 0, 100))
        .collect();
    let created = Instant::now();

    let mut previous = created;
    for tag in tags {
        let name = format!("{registry}:{}", tagsync_rs::Entity::name(&tag));
        if let Err(err) = manager.admit(tag).await {
            tracing::error!(error = %err, "admission failed");
            continue;
        }
        manager.set(&name, "value", FieldValue::Int(50)).await?;

        if manager.len() as u64 % report.max(1) == 0 {
            let now = Instant::now();
            println!("To append {}: {:?}", manager.len(), now - previous);
            previous = now;
        }
    }
    let appended = Instant::now();

    println!("Added: {manager}");
    println!("To create tags: {:?}", created - started);
    println!("To append tags: {:?}", appended - created);
    println!("Total: {:?}", appended - started);

    Ok(manager)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if has_flag("-h") || has_flag("--help") {
        print_help();
        return Ok(());
    }

    tracing_subscriber::fmt::init();

    // Build CLI overrides
    let mut overrides = ConfigOverrides::default();
    let mut store_overrides = StoreOverrides::default();
    if let Some(url) = parse_arg("--url").or_else(|| parse_arg("-u")) {
        store_overrides.url = Some(url);
    }
    if has_flag("--notify") {
        store_overrides.configure_notifications = Some(true);
    }
    if store_overrides.url.is_some() || store_overrides.configure_notifications.is_some() {
        overrides.store = Some(store_overrides);
    }
    if let Some(name) = parse_arg("--registry").or_else(|| parse_arg("-r")) {
        overrides.registry = Some(RegistryOverrides { name: Some(name) });
    }

    // Load config: CLI > Env > File > Defaults
    let config_path = parse_arg("--config")
        .or_else(|| parse_arg("-c"))
        .or_else(|| std::env::var("TAGSYNC_CONFIG").ok());
    let config = TagsyncConfig::load(config_path.as_deref(), overrides)?;

    let limit = numeric_arg("--limit", Some("-n"), 1)?;
    let report = numeric_arg("--report", None, 1)?;
    let linger = numeric_arg("--linger", None, 15)?;

    let ctx = if has_flag("--memory") {
        let store = MemoryStore::from_config(&config);
        TagContext::in_memory(&store).with_settings(config.reconcile_settings())
    } else {
        // Connectivity errors are fatal here and nowhere else.
        let store = RedisStore::connect(&config.store)
            .await
            .context("Error connecting with redis")?;
        let feed = RedisChangeFeed::new(&config.store)?;

        if !has_flag("--skip-toy") {
            toy_walkthrough(&store, &feed).await?;
        }

        TagContext::new(Arc::new(store), Arc::new(feed))
            .with_settings(config.reconcile_settings())
    };
    let mut manager =
        tag_manager_walkthrough(&ctx, &config.registry.name, limit, report).await?;

    tokio::time::sleep(Duration::from_secs(linger)).await;
    if let Some(first) = manager.names().first() {
        println!("Final {first}: value = {}", manager.get(first, "value")?);
    }
    manager.shutdown_all().await;
    Ok(())
}
