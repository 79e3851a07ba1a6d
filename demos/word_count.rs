//! Word count over a small corpus.
//!
//! Run with `RUST_LOG=debug` to watch the engine's broadcasts and barriers:
//!
//! ```bash
//! cargo run --example word_count
//! ```

use mapweave::{Engine, EngineConfig};

const CORPUS: &[&str] = &[
  "it was the best of times",
  "it was the worst of times",
  "it was the age of wisdom",
  "it was the age of foolishness",
  "it was the epoch of belief",
  "it was the epoch of incredulity",
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  // Initialize tracing
  tracing_subscriber::fmt::init();

  let engine = Engine::start(EngineConfig::new(4).with_batch_size(8))?;
  tracing::info!(workers = engine.worker_count(), "engine ready");

  let lines = engine
    .distribute("lines", CORPUS.iter().map(|l| l.to_string()))
    .await?;
  let words = lines
    .flatmap(
      |line| {
        line
          .split_whitespace()
          .map(str::to_string)
          .collect::<Vec<_>>()
      },
      false,
    )
    .await?;
  let counts = words
    .map(|w| (w.clone(), 1u64), false)
    .await?
    .reduce2(|a, b| a + b, true)
    .await?;

  // Drop the common words before bringing results back
  let interesting = counts.filter(|(_, n)| *n < 6, false).await?;

  let mut result = interesting.collect(true).await?;
  result.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
  for (word, n) in &result {
    println!("{:>14} {}", word, n);
  }

  println!("per-worker counts: {:?}", counts.partition_counts().await?);
  println!("datasets: {:?}", engine.datasets().await);

  engine.terminate().await?;
  Ok(())
}
