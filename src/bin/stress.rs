use anyhow::{Context, Result, bail};
use clap::Parser;
use seqstm::{LockOrder, Stm, StmConfig, StmStats, TCell, ValidationOrder};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

const TOTAL: i64 = 100;

#[derive(Parser)]
#[command(name = "seqstm-stress")]
#[command(about = "Transfer stress test for the seqstm commit protocol")]
struct Cli {
    /// Writer threads
    #[arg(long, default_value_t = 4)]
    threads: usize,

    /// Transfers per writer thread
    #[arg(long, default_value_t = 25_000)]
    iterations: u64,

    /// Reader threads checking the invariant while writers run
    #[arg(long, default_value_t = 2)]
    readers: usize,

    #[arg(long, default_value_t = 16)]
    starvation_threshold: u32,

    #[arg(long, default_value_t = 1024)]
    backoff_spin_limit: u32,

    #[arg(long, default_value_t = 10)]
    park_timeout_ms: u64,

    /// insertion | address
    #[arg(long, default_value = "insertion")]
    lock_order: String,

    /// lock-then-validate | validate-then-lock
    #[arg(long, default_value = "lock-then-validate")]
    validation_order: String,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct Report {
    config: StmConfig,
    writers: usize,
    readers: usize,
    transfers: u64,
    reader_checks: u64,
    violations: u64,
    final_balances: (i64, i64),
    elapsed_ms: u128,
    stats: StmStats,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let lock_order: LockOrder = cli
        .lock_order
        .parse()
        .map_err(anyhow::Error::msg)
        .context("--lock-order")?;
    let validation_order: ValidationOrder = cli
        .validation_order
        .parse()
        .map_err(anyhow::Error::msg)
        .context("--validation-order")?;

    let config = StmConfig::new()
        .starvation_threshold(cli.starvation_threshold)
        .backoff_spin_limit(cli.backoff_spin_limit)
        .park_timeout(Duration::from_millis(cli.park_timeout_ms))
        .lock_order(lock_order)
        .validation_order(validation_order);
    let stm = Stm::new(config.clone())?;

    let src = TCell::new(TOTAL);
    let dst = TCell::new(0i64);
    let done = AtomicBool::new(false);
    let reader_checks = AtomicU64::new(0);
    let violations = AtomicU64::new(0);

    let start = Instant::now();
    let writers_ok = thread::scope(|s| {
        for _ in 0..cli.readers {
            s.spawn(|| {
                while !done.load(Ordering::Relaxed) {
                    let sum = stm.read_only(|tx| Ok(tx.get(&src)? + tx.get(&dst)?));
                    reader_checks.fetch_add(1, Ordering::Relaxed);
                    if sum != TOTAL {
                        violations.fetch_add(1, Ordering::Relaxed);
                    }
                }
            });
        }

        let writers: Vec<_> = (0..cli.threads)
            .map(|worker| {
                let (stm, src, dst) = (&stm, &src, &dst);
                s.spawn(move || {
                    for i in 0..cli.iterations {
                        let (from, to) = if (worker as u64 + i) % 2 == 0 {
                            (src, dst)
                        } else {
                            (dst, src)
                        };
                        stm.read_write(|tx| {
                            let available = from.get(tx)?;
                            let amount = available.min((i % 7) as i64 + 1);
                            from.set(tx, available - amount);
                            to.modify(tx, |balance| balance + amount)
                        });
                    }
                })
            })
            .collect();

        let writers_ok = writers
            .into_iter()
            .map(|writer| writer.join().is_ok())
            .fold(true, |ok, joined| ok && joined);
        done.store(true, Ordering::Relaxed);
        writers_ok
    });
    let elapsed = start.elapsed();
    if !writers_ok {
        bail!("a writer thread panicked");
    }

    let final_balances = stm.read_only(|tx| Ok((tx.get(&src)?, tx.get(&dst)?)));
    let report = Report {
        config,
        writers: cli.threads,
        readers: cli.readers,
        transfers: cli.threads as u64 * cli.iterations,
        reader_checks: reader_checks.load(Ordering::Relaxed),
        violations: violations.load(Ordering::Relaxed),
        final_balances,
        elapsed_ms: elapsed.as_millis(),
        stats: stm.stats(),
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("seqstm stress results:");
        println!("  writers: {}", report.writers);
        println!("  readers: {}", report.readers);
        println!("  transfers: {}", report.transfers);
        println!("  reader_checks: {}", report.reader_checks);
        println!("  violations: {}", report.violations);
        println!(
            "  final_balances: ({}, {})",
            report.final_balances.0, report.final_balances.1
        );
        println!("  duration_ms: {}", report.elapsed_ms);
        println!("  {}", report.stats);
    }

    let (a, b) = report.final_balances;
    if a + b != TOTAL || report.violations > 0 {
        bail!(
            "invariant violated: final sum {} ({} torn reads observed)",
            a + b,
            report.violations
        );
    }
    Ok(())
}
