//! tilestore demo: a hot-row counter workload
//!
//! Every thread repeatedly picks a random row and increments its counter in its own
//! transaction. With few rows most transactions collide; the loser of each write-write
//! conflict aborts and the run reports how many committed. The sum of all counters at
//! the end must equal the number of committed increments.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Instant;

use log::info;
use rand::Rng;

use tilestore::{
    Column, ConcurrencyProtocol, DataTable, Engine, EngineConfig, ItemPointer, Schema, Tuple,
    TxnResult, Value, ValueType,
};

struct Options {
    threads: usize,
    rows: usize,
    ops: usize,
    protocol: ConcurrencyProtocol,
    tile_group_size: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            threads: 4,
            rows: 8,
            ops: 1000,
            protocol: ConcurrencyProtocol::Optimistic,
            tile_group_size: 1000,
        }
    }
}

#[derive(Default)]
struct Counters {
    committed: AtomicU64,
    aborted: AtomicU64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();
    let mut opts = Options::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--threads" | "-t" => {
                if i + 1 < args.len() {
                    opts.threads = args[i + 1].parse()?;
                    i += 1;
                }
            }
            "--rows" | "-r" => {
                if i + 1 < args.len() {
                    opts.rows = args[i + 1].parse()?;
                    i += 1;
                }
            }
            "--ops" | "-n" => {
                if i + 1 < args.len() {
                    opts.ops = args[i + 1].parse()?;
                    i += 1;
                }
            }
            "--protocol" | "-p" => {
                if i + 1 < args.len() {
                    opts.protocol = args[i + 1].parse()?;
                    i += 1;
                }
            }
            "--tile-group-size" | "-g" => {
                if i + 1 < args.len() {
                    opts.tile_group_size = args[i + 1].parse()?;
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("tilestore - hot-row MVCC demo");
                println!();
                println!("Usage: tilestore [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -t, --threads N           Worker threads (default: 4)");
                println!("  -r, --rows N              Rows being updated (default: 8)");
                println!("  -n, --ops N               Transactions per thread (default: 1000)");
                println!("  -p, --protocol NAME       optimistic | pessimistic (default: optimistic)");
                println!("  -g, --tile-group-size N   Slots per tile group (default: 1000)");
                println!("  -h, --help                Show this help");
                return Ok(());
            }
            other => {
                eprintln!("Unknown option '{}', see --help", other);
            }
        }
        i += 1;
    }
    if opts.rows == 0 {
        return Err("--rows must be at least 1".into());
    }

    let config = EngineConfig {
        protocol: opts.protocol,
        tuples_per_tile_group: opts.tile_group_size,
        ..Default::default()
    };
    let engine = Arc::new(Engine::new(config)?);
    let table = engine.create_table(
        "counters",
        Schema::new(vec![
            Column::new("id", ValueType::BigInt),
            Column::new("value", ValueType::BigInt),
        ]),
    )?;

    // current location of every row, moved forward by whoever commits an update
    let mut txn = engine.begin();
    let mut heads = Vec::with_capacity(opts.rows);
    for id in 0..opts.rows {
        let tuple = counter_row(&table, id as i64, 0)?;
        heads.push(AtomicU64::new(table.insert_tuple(&mut txn, &tuple)?.to_u64()));
    }
    engine.commit(txn);
    let heads = Arc::new(heads);

    info!(
        "Running {} threads x {} transactions over {} rows ({})",
        opts.threads, opts.ops, opts.rows, opts.protocol
    );

    let counters = Arc::new(Counters::default());
    let barrier = Arc::new(Barrier::new(opts.threads));
    let start = Instant::now();
    let handles: Vec<_> = (0..opts.threads)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let table = Arc::clone(&table);
            let heads = Arc::clone(&heads);
            let counters = Arc::clone(&counters);
            let barrier = Arc::clone(&barrier);
            let ops = opts.ops;
            thread::spawn(move || {
                let mut rng = rand::thread_rng();
                barrier.wait();
                for _ in 0..ops {
                    let id = rng.gen_range(0..heads.len());
                    if increment(&engine, &table, &heads, id) {
                        counters.committed.fetch_add(1, Ordering::Relaxed);
                    } else {
                        counters.aborted.fetch_add(1, Ordering::Relaxed);
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        if handle.join().is_err() {
            return Err("worker thread panicked".into());
        }
    }
    let elapsed = start.elapsed();

    let mut reader = engine.begin();
    let total: i64 = table
        .scan(&mut reader)?
        .iter()
        .filter_map(|(_, tuple)| tuple.get_value(1).as_i64())
        .sum();
    engine.commit(reader);
    engine.collect_garbage();

    let committed = counters.committed.load(Ordering::Relaxed);
    let aborted = counters.aborted.load(Ordering::Relaxed);
    let stats = engine.gc_stats();
    println!("elapsed:          {:?}", elapsed);
    println!("committed:        {}", committed);
    println!("aborted:          {}", aborted);
    println!("sum of counters:  {}", total);
    println!("tile groups:      {}", table.tile_group_count());
    println!("gc sweeps:        {}", stats.total_sweeps);
    println!("gc reclaimed:     {}", stats.total_reclaimed);
    println!("gc pending:       {}", engine.garbage_collector().pending_count());

    if total != committed as i64 {
        return Err(format!("lost update: sum {} != committed {}", total, committed).into());
    }
    Ok(())
}

fn counter_row(table: &DataTable, id: i64, value: i64) -> tilestore::Result<Tuple> {
    Tuple::from_values(
        Arc::clone(table.schema()),
        &[Value::BigInt(id), Value::BigInt(value)],
    )
}

/// One read-modify-write transaction; `true` if it committed
fn increment(engine: &Engine, table: &DataTable, heads: &[AtomicU64], id: usize) -> bool {
    let head = heads[id].load(Ordering::Acquire);
    let location = ItemPointer::from_u64(head);
    let mut txn = engine.begin();

    let current = match table.get_tuple(&mut txn, location) {
        Ok(Some(tuple)) if tuple.get_value(0).as_i64() == Some(id as i64) => tuple,
        _ => {
            engine.abort(txn);
            return false;
        }
    };
    let value = current.get_value(1).as_i64().unwrap_or(0);

    let new_location = match counter_row(table, id as i64, value + 1)
        .and_then(|tuple| table.update_tuple(&mut txn, location, &tuple))
    {
        Ok(loc) => loc,
        Err(_) => {
            engine.abort(txn);
            return false;
        }
    };

    if engine.commit(txn) != TxnResult::Success {
        return false;
    }
    // only the transaction that superseded `location` can move the head off it
    let _ = heads[id].compare_exchange(
        head,
        new_location.to_u64(),
        Ordering::AcqRel,
        Ordering::Acquire,
    );
    true
}
