// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! Latency CSV output.
//!
//! One row per table id. Rows for the direct-attached memory come first:
//!
//! ```text
//! 0,<table>,<count>,<average latency>
//! 1,<table in hex>,<count>,<average end-to-end>,<average link>,<average memory>
//! ```
//!
//! Latencies are in ticks.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use cxl_engine::types::{SimError, SimResult};
use cxl_models::stats::{CxlLatencyTable, DamLatencyTable};

pub fn write_latency_csv<W: Write>(
    dam: &DamLatencyTable,
    cxl: &CxlLatencyTable,
    out: &mut W,
) -> std::io::Result<()> {
    for (table, average) in dam {
        writeln!(out, "0,{},{},{:.6}", table, average.count, average.mean)?;
    }
    for (table, latency) in cxl {
        writeln!(
            out,
            "1,{:x},{},{:.6},{:.6},{:.6}",
            table,
            latency.count(),
            latency.end_to_end.mean,
            latency.link.mean,
            latency.memory.mean
        )?;
    }
    out.flush()
}

pub fn write_latency_file(path: &Path, dam: &DamLatencyTable, cxl: &CxlLatencyTable) -> SimResult {
    let to_error = |e: std::io::Error| SimError(format!("Unable to write '{}': {e}", path.display()));
    let file = File::create(path).map_err(to_error)?;
    write_latency_csv(dam, cxl, &mut BufWriter::new(file)).map_err(to_error)
}
