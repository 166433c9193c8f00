//! Inspect command - summarize the channels of a log.

use anyhow::Result;
use prettytable::{Table, row};

use crate::source::ChannelSource;

/// Print a per-channel summary table: name, payload kind, message count and
/// time span.
pub fn inspect_source(source: &dyn ChannelSource) -> Result<()> {
    let mut table = Table::new();
    table.add_row(row!["Channel", "Kind", "Count", "Start(s)", "End(s)"]);

    let mut total: u64 = 0;
    let mut global_first = f64::INFINITY;
    let mut global_last = f64::NEG_INFINITY;

    for channel in source.channels() {
        let mut count: u64 = 0;
        let mut first = f64::INFINITY;
        let mut last = f64::NEG_INFINITY;
        for msg in source.iter_channel(&channel.name) {
            count += 1;
            first = first.min(msg.timestamp);
            last = last.max(msg.timestamp);
        }
        total += count;
        global_first = global_first.min(first);
        global_last = global_last.max(last);
        if count == 0 {
            table.add_row(row![channel.name, channel.kind, count, "-", "-"]);
        } else {
            table.add_row(row![
                channel.name,
                channel.kind,
                count,
                format!("{first:.6}"),
                format!("{last:.6}")
            ]);
        }
    }

    let duration = if global_last.is_finite() && global_first.is_finite() {
        global_last - global_first
    } else {
        0.0
    };
    println!("Total messages: {total}, Duration (s): {duration:.6}");
    table.printstd();
    Ok(())
}

/// Print every registered `(kind, format, mode)` routine and each processor
/// with its required arguments.
pub fn print_formats(registry: &crate::registry::Registry) -> Result<()> {
    println!("Export routines:");
    let mut table = Table::new();
    table.add_row(row!["Kind", "Format", "Mode"]);
    for (kind, fmt, mode) in registry.all_routines() {
        table.add_row(row![kind, fmt, mode]);
    }
    table.printstd();

    println!("Processors:");
    let mut table = Table::new();
    table.add_row(row!["Kind", "Name", "Required args"]);
    for (kind, name, args) in registry.all_processors() {
        table.add_row(row![kind, name, args.join(", ")]);
    }
    table.printstd();
    Ok(())
}
