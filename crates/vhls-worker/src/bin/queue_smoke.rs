//! Round-trip smoke check for the queue layer.
//!
//! Connects with whatever backend the environment selects, publishes a
//! few messages, and waits for its own subscription to see them. Run
//! with REDIS_URL set to exercise the broker path, or unset for the
//! in-process bus.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use vhls_queue::{handler_fn, ConsumeOptions, Queue};

const SMOKE_TOPIC: &str = "transcode.smoke";
const MESSAGES: u32 = 3;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let queue = Queue::connect_from_env().await?;
    println!("queue-smoke: connected via '{}' backend", queue.kind());

    let seen = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&seen);
    let handler = handler_fn(move |message| {
        let counter = Arc::clone(&counter);
        async move {
            println!("queue-smoke: received {}", message.payload);
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    });
    queue
        .consume(SMOKE_TOPIC, handler, ConsumeOptions::default())
        .await?;

    for n in 0..MESSAGES {
        let id = queue
            .produce(SMOKE_TOPIC, json!({ "check": "smoke", "n": n }))
            .await?;
        println!("queue-smoke: produced message {}", id);
    }

    // both backends dispatch on background tasks
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while seen.load(Ordering::SeqCst) < MESSAGES && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    queue.close().await?;

    let received = seen.load(Ordering::SeqCst);
    if received < MESSAGES {
        anyhow::bail!("saw {}/{} messages before the deadline", received, MESSAGES);
    }
    println!("queue-smoke: ok ({} messages round-tripped)", received);
    Ok(())
}
