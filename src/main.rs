//! heapdb - inspect and exercise heap table files from the command line

use anyhow::{bail, Context, Result};
use clap::{Parser as ClapParser, Subcommand};
use heapdb::access::{Field, HeapFile, Tuple, TupleDesc, Type};
use heapdb::config;
use heapdb::storage::{BufferPool, PageId, Permissions, StorageError};
use heapdb::transaction::Transaction;
use log::{debug, info};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// heapdb - transactional heap files with page-level locking
#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Bytes per page; must match the value the file was created with
    #[arg(long, default_value_t = config::DEFAULT_PAGE_SIZE)]
    page_size: usize,

    /// Pages held by the buffer pool
    #[arg(long, default_value_t = config::DEFAULT_POOL_PAGES)]
    pool_pages: usize,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create an empty table file
    Create {
        #[arg(short, long)]
        file: PathBuf,
        /// Number of int columns
        #[arg(short, long, default_value = "1")]
        columns: usize,
    },
    /// Insert rows given as comma-separated ints, e.g. `1,2,3`
    Insert {
        #[arg(short, long)]
        file: PathBuf,
        #[arg(short, long, default_value = "1")]
        columns: usize,
        #[arg(required = true)]
        rows: Vec<String>,
    },
    /// Delete the record stored at a page and slot
    Delete {
        #[arg(short, long)]
        file: PathBuf,
        #[arg(short, long, default_value = "1")]
        columns: usize,
        #[arg(long)]
        page: u32,
        #[arg(long)]
        slot: usize,
    },
    /// Print every stored record
    Scan {
        #[arg(short, long)]
        file: PathBuf,
        #[arg(short, long, default_value = "1")]
        columns: usize,
        /// One JSON object per line
        #[arg(long)]
        json: bool,
    },
    /// Print page statistics
    Info {
        #[arg(short, long)]
        file: PathBuf,
        #[arg(short, long, default_value = "1")]
        columns: usize,
    },
    /// Run concurrent inserting transactions, retrying aborted ones
    Stress {
        #[arg(short, long)]
        file: PathBuf,
        #[arg(short, long, default_value = "1")]
        columns: usize,
        #[arg(short, long, default_value = "4")]
        threads: usize,
        /// Committed inserts per thread
        #[arg(short, long, default_value = "100")]
        inserts: usize,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    config::set_page_size(args.page_size);
    let pool = BufferPool::new(args.pool_pages);
    debug!("{:?}", pool);

    match args.command {
        Command::Create { file, columns } => {
            let heap = HeapFile::create(&file, int_desc(columns))
                .with_context(|| format!("Failed to create {}", file.display()))?;
            println!("created {} ({}, {} slots per page)", heap.path().display(), heap.id(), heap.slots_per_page());
        }
        Command::Insert { file, columns, rows } => {
            let heap = open_table(&pool, &file, columns)?;
            let txn = Transaction::begin(&pool);
            for row in &rows {
                let mut tuple = parse_row(&heap, row)?;
                let rid = pool.insert_tuple(txn.id(), heap.id(), &mut tuple)?;
                println!("inserted {} at {} slot {}", row, rid.page_id, rid.slot);
            }
            txn.commit().context("Failed to commit inserts")?;
        }
        Command::Delete { file, columns, page, slot } => {
            let heap = open_table(&pool, &file, columns)?;
            let txn = Transaction::begin(&pool);
            let pid = PageId::new(heap.id(), page);
            let page = pool.get_page(txn.id(), pid, Permissions::ReadWrite)?;
            let tuple = page.read().tuple(slot).cloned();
            drop(page);
            let Some(tuple) = tuple else {
                bail!("no record at {} slot {}", pid, slot);
            };
            pool.delete_tuple(txn.id(), &tuple)?;
            txn.commit().context("Failed to commit delete")?;
            println!("deleted {} slot {}", pid, slot);
        }
        Command::Scan { file, columns, json } => {
            let heap = open_table(&pool, &file, columns)?;
            let txn = Transaction::begin(&pool);
            for tuple in heap.iter(&pool, txn.id())? {
                let tuple = tuple?;
                print_tuple(&tuple, json)?;
            }
            txn.commit()?;
        }
        Command::Info { file, columns } => {
            let heap = open_table(&pool, &file, columns)?;
            let num_pages = heap.num_pages()?;
            println!("table:          {}", heap.id());
            println!("path:           {}", heap.path().display());
            println!("page size:      {}", heap.page_size());
            println!("tuple size:     {}", heap.tuple_desc().byte_size());
            println!("slots per page: {}", heap.slots_per_page());
            println!("pages:          {}", num_pages);
            let mut total = 0;
            for page_number in 0..num_pages {
                let page = heap.read_page(PageId::new(heap.id(), page_number))?;
                let used = page.slot_count() - page.num_empty_slots();
                total += used;
                println!("  page {:>6}: {}/{} used", page_number, used, page.slot_count());
            }
            println!("records:        {}", total);
        }
        Command::Stress { file, columns, threads, inserts } => {
            let heap = open_table(&pool, &file, columns)?;
            stress(&pool, &heap, threads, inserts)?;
        }
    }

    Ok(())
}

fn int_desc(columns: usize) -> TupleDesc {
    TupleDesc::from_types(vec![Type::Int; columns])
}

fn open_table(pool: &BufferPool, path: &Path, columns: usize) -> Result<Arc<HeapFile>> {
    let heap = HeapFile::open(path, int_desc(columns))
        .with_context(|| format!("Failed to open {}", path.display()))?;
    Ok(pool.register_table(heap))
}

fn parse_row(heap: &HeapFile, row: &str) -> Result<Tuple> {
    let fields = row
        .split(',')
        .map(|v| {
            v.trim()
                .parse::<i32>()
                .map(Field::Int)
                .with_context(|| format!("Invalid int `{}` in row `{}`", v, row))
        })
        .collect::<Result<Vec<_>>>()?;
    if fields.len() != heap.tuple_desc().num_fields() {
        bail!(
            "row `{}` has {} values, table has {} columns",
            row,
            fields.len(),
            heap.tuple_desc().num_fields()
        );
    }
    Ok(Tuple::new(Arc::clone(heap.tuple_desc()), fields)?)
}

fn print_tuple(tuple: &Tuple, json: bool) -> Result<()> {
    if json {
        let values: Vec<serde_json::Value> = tuple
            .fields()
            .iter()
            .map(|field| match field {
                Field::Int(v) => serde_json::json!(v),
                Field::String(s) => serde_json::json!(s),
            })
            .collect();
        let line = serde_json::json!({
            "record_id": tuple.record_id(),
            "fields": values,
        });
        println!("{}", serde_json::to_string(&line)?);
    } else {
        let values: Vec<String> = tuple.fields().iter().map(|f| f.to_string()).collect();
        match tuple.record_id() {
            Some(rid) => println!("{}[{}]\t{}", rid.page_id, rid.slot, values.join(",")),
            None => println!("-\t{}", values.join(",")),
        }
    }
    Ok(())
}

/// Each worker commits `inserts` single-row transactions. A transaction that
/// times out on a page lock is aborted and retried.
fn stress(pool: &BufferPool, heap: &HeapFile, threads: usize, inserts: usize) -> Result<()> {
    let before = count_records(pool, heap)?;
    let retries = AtomicUsize::new(0);
    let started = Instant::now();

    std::thread::scope(|scope| -> Result<()> {
        let workers: Vec<_> = (0..threads)
            .map(|worker| {
                let retries = &retries;
                scope.spawn(move || -> Result<()> {
                    for i in 0..inserts {
                        let value = (worker * inserts + i) as i32;
                        loop {
                            let txn = Transaction::begin(pool);
                            let mut tuple = Tuple::new(
                                Arc::clone(heap.tuple_desc()),
                                vec![Field::Int(value); heap.tuple_desc().num_fields()],
                            )?;
                            match pool.insert_tuple(txn.id(), heap.id(), &mut tuple) {
                                Ok(_) => {
                                    txn.commit()?;
                                    break;
                                }
                                Err(e) if e.is_abort() => {
                                    debug!("worker {} retrying after {}", worker, e);
                                    retries.fetch_add(1, Ordering::Relaxed);
                                    txn.abort()?;
                                }
                                Err(e) => return Err(e.into()),
                            }
                        }
                    }
                    Ok(())
                })
            })
            .collect();

        for worker in workers {
            match worker.join() {
                Ok(result) => result?,
                Err(_) => bail!("stress worker panicked"),
            }
        }
        Ok(())
    })?;

    let after = count_records(pool, heap)?;
    info!(
        "{} threads committed {} inserts in {:?} ({} retries)",
        threads,
        threads * inserts,
        started.elapsed(),
        retries.load(Ordering::Relaxed)
    );
    if after - before != threads * inserts {
        bail!("expected {} new records, found {}", threads * inserts, after - before);
    }
    println!("ok: {} records ({} new)", after, after - before);
    Ok(())
}

fn count_records(pool: &BufferPool, heap: &HeapFile) -> Result<usize> {
    let txn = Transaction::begin(pool);
    let count = heap
        .iter(pool, txn.id())?
        .collect::<Result<Vec<_>, StorageError>>()?
        .len();
    txn.commit()?;
    Ok(count)
}
