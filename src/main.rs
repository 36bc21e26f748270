//! Benchmark driver for the tree.
//!
//! Reads integer keys from an input file, loads them, then times lookups.
//! With more than one thread, half the keys are inserted single-threaded as
//! warm-up and the rest of the work is split across threads.
//!
//! ```bash
//! fastfair -n 1000000 -i keys.txt -t 4 -w 300
//! ```
//!
//! Flags: `-n` number of keys, `-i` input path (one key per line),
//! `-t` thread count, `-w` emulated write latency in nanoseconds.

#![allow(clippy::cast_precision_loss)]

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::process::ExitCode;
use std::time::Instant;

use fastfair::{FastFairTree, Persist};

struct Args {
    num_keys: usize,
    input_path: String,
    threads: usize,
    write_latency_ns: u64,
}

fn parse_args() -> Result<Args, String> {
    let mut args = Args {
        num_keys: 0,
        input_path: String::from("sample_input.txt"),
        threads: 1,
        write_latency_ns: 0,
    };

    let mut iter = std::env::args().skip(1);
    while let Some(flag) = iter.next() {
        let mut value = |name: &str| {
            iter.next()
                .ok_or_else(|| format!("missing value after {name}"))
        };
        match flag.as_str() {
            "-n" => {
                args.num_keys = value("-n")?
                    .parse()
                    .map_err(|e| format!("bad key count: {e}"))?;
            }
            "-i" => args.input_path = value("-i")?,
            "-t" => {
                args.threads = value("-t")?
                    .parse()
                    .map_err(|e| format!("bad thread count: {e}"))?;
            }
            "-w" => {
                args.write_latency_ns = value("-w")?
                    .parse()
                    .map_err(|e| format!("bad write latency: {e}"))?;
            }
            other => return Err(format!("unknown flag: {other}")),
        }
    }

    if args.num_keys == 0 {
        return Err(String::from("usage: fastfair -n <keys> [-i path] [-t threads] [-w latency_ns]"));
    }
    if args.threads == 0 {
        return Err(String::from("thread count must be at least 1"));
    }
    Ok(args)
}

fn load_keys(path: &str, count: usize) -> Result<Vec<i64>, String> {
    let file = File::open(path).map_err(|e| format!("input loading error: {path}: {e}"))?;
    let mut keys = Vec::with_capacity(count);

    for line in BufReader::new(file).lines() {
        if keys.len() == count {
            break;
        }
        let line = line.map_err(|e| format!("input read error: {e}"))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        keys.push(
            trimmed
                .parse::<i64>()
                .map_err(|e| format!("bad key {trimmed:?}: {e}"))?,
        );
    }

    if keys.len() < count {
        return Err(format!("input holds {} keys, need {count}", keys.len()));
    }
    Ok(keys)
}

/// The harness convention: a key's handle is the key itself.
fn handle(key: i64) -> u64 {
    key as u64 | 1
}

fn run_single(tree: &FastFairTree, keys: &[i64]) {
    let start = Instant::now();
    for &key in keys {
        tree.insert(key, handle(key));
    }
    let elapsed = start.elapsed().as_micros();
    println!(
        "INSERT elapsed_time: {elapsed} us, avg: {:.3} us",
        elapsed as f64 / keys.len() as f64
    );

    let start = Instant::now();
    for &key in keys {
        if tree.search(key).is_none() {
            eprintln!("NOT FOUND {key}");
        }
    }
    let elapsed = start.elapsed().as_micros();
    println!(
        "SEARCH elapsed_time: {elapsed} us, avg: {:.3} us",
        elapsed as f64 / keys.len() as f64
    );
}

fn run_concurrent(tree: &FastFairTree, keys: &[i64], threads: usize) {
    // Warm-up: load half the keys before the timed phase.
    let half = keys.len() / 2;
    for &key in &keys[..half] {
        tree.insert(key, handle(key));
    }
    println!("warm-up: {half} keys loaded");

    let rest = &keys[half..];
    let chunk = rest.len().div_ceil(threads);

    let start = Instant::now();
    std::thread::scope(|scope| {
        for part in rest.chunks(chunk) {
            scope.spawn(move || {
                for &key in part {
                    tree.insert(key, handle(key));
                }
            });
        }
    });
    let elapsed = start.elapsed().as_micros();
    println!(
        "concurrent INSERT ({threads} threads): {elapsed} us, avg: {:.3} us",
        elapsed as f64 / rest.len() as f64
    );

    let chunk = keys.len().div_ceil(threads);
    let start = Instant::now();
    std::thread::scope(|scope| {
        for part in keys.chunks(chunk) {
            scope.spawn(move || {
                for &key in part {
                    if tree.search(key).is_none() {
                        eprintln!("NOT FOUND {key}");
                    }
                }
            });
        }
    });
    let elapsed = start.elapsed().as_micros();
    println!(
        "concurrent SEARCH ({threads} threads): {elapsed} us, avg: {:.3} us",
        elapsed as f64 / keys.len() as f64
    );
}

fn main() -> ExitCode {
    #[cfg(feature = "tracing")]
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(message) => {
            eprintln!("{message}");
            return ExitCode::FAILURE;
        }
    };

    let keys = match load_keys(&args.input_path, args.num_keys) {
        Ok(keys) => keys,
        Err(message) => {
            eprintln!("{message}");
            return ExitCode::FAILURE;
        }
    };

    let tree: FastFairTree = FastFairTree::with_persist(Persist::new(args.write_latency_ns));

    if args.threads == 1 {
        run_single(&tree, &keys);
    } else {
        run_concurrent(&tree, &keys, args.threads);
    }

    ExitCode::SUCCESS
}
