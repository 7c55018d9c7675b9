use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use log::info;
use simple_logger::SimpleLogger;
use uthread::RuntimeConfig;

use args::{Arguments, Demo};

mod args;

fn main() -> Result<()> {
    let args = Arguments::parse();

    SimpleLogger::new().with_level(args.log_level).init()?;

    let mut config = RuntimeConfig::builder()
        .max_threads(args.runtime.max_threads)
        .stack_size(args.runtime.stack_kib.saturating_mul(1024))
        .stack_guard(!args.runtime.no_stack_guard);
    if let Demo::Preempt { interval_ms, .. } = &args.demo {
        config = config.preempt_interval(Duration::from_millis(*interval_ms));
    }
    uthread::init(config.build()?)?;

    match args.demo {
        Demo::Rotate { threads, rounds } => {
            let order = uthread_demo::rotate(threads, rounds)?;
            let order: Vec<_> = order.iter().map(|id| id.as_usize()).collect();
            info!("run order: {order:?}");
        }
        Demo::Counter {
            threads,
            increments,
        } => {
            let total = uthread_demo::counter(threads, increments)?;
            info!("counter: {total}");
        }
        Demo::Buffer {
            producers,
            consumers,
            items,
            capacity,
        } => {
            let report = uthread_demo::buffer(producers, consumers, items, capacity)?;
            info!(
                "consumed {} items, checksum {}",
                report.consumed, report.checksum
            );
        }
        Demo::Mesa { waiters } => {
            let reblocked = uthread_demo::mesa(waiters)?;
            info!("{reblocked} of {waiters} threads went back to sleep after the broadcast");
        }
        Demo::Preempt {
            threads,
            duration_ms,
            ..
        } => {
            let counts = uthread_demo::preempt(threads, Duration::from_millis(duration_ms))?;
            uthread::shutdown()?;
            for (index, count) in counts.iter().enumerate() {
                info!("spinner {index}: {count} iterations");
            }
            return Ok(());
        }
    }

    uthread::shutdown()?;
    Ok(())
}
