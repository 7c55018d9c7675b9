use clap::{Args, Parser, Subcommand};
use log::LevelFilter;

/// Demo workloads for the uthread runtime
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Arguments {
    /// maximum level of log messages
    #[arg(long, short, default_value_t = LevelFilter::Info)]
    pub log_level: LevelFilter,

    #[command(flatten)]
    pub runtime: RuntimeArgs,

    #[command(subcommand)]
    pub demo: Demo,
}

#[derive(Args, Debug)]
pub struct RuntimeArgs {
    /// number of thread slots, including the main thread
    #[arg(long, default_value_t = uthread::config::DEFAULT_MAX_THREADS)]
    pub max_threads: usize,

    /// stack size of each thread in KiB
    #[arg(long, default_value_t = 256)]
    pub stack_kib: usize,

    /// don't map guard pages below thread stacks
    #[arg(long)]
    pub no_stack_guard: bool,
}

#[derive(Debug, Subcommand)]
pub enum Demo {
    /// threads take turns in FIFO order
    Rotate {
        /// number of threads
        #[arg(long, short, default_value_t = 4)]
        threads: usize,

        /// number of turns each thread takes
        #[arg(long, short, default_value_t = 3)]
        rounds: usize,
    },
    /// threads increment a shared counter under a lock
    Counter {
        /// number of threads
        #[arg(long, short, default_value_t = 3)]
        threads: usize,

        /// increments per thread
        #[arg(long, short, default_value_t = 1000)]
        increments: usize,
    },
    /// producers and consumers share a bounded buffer
    Buffer {
        #[arg(long, default_value_t = 2)]
        producers: usize,

        #[arg(long, default_value_t = 3)]
        consumers: usize,

        /// items produced by each producer
        #[arg(long, default_value_t = 100)]
        items: usize,

        /// buffer capacity
        #[arg(long, default_value_t = 4)]
        capacity: usize,
    },
    /// a broadcast wakes every waiter, but only one finds the single token
    Mesa {
        /// number of waiting threads
        #[arg(long, short, default_value_t = 3)]
        waiters: usize,
    },
    /// threads that never yield share the cpu through timer preemption
    Preempt {
        /// number of spinning threads
        #[arg(long, short, default_value_t = 3)]
        threads: usize,

        /// preemption interval in milliseconds
        #[arg(long, default_value_t = 5)]
        interval_ms: u64,

        /// how long the threads spin in milliseconds
        #[arg(long, default_value_t = 500)]
        duration_ms: u64,
    },
}
