// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! Memory-access traces.
//!
//! A trace is a text file with one access per line:
//!
//! ```text
//! <address> <R|W> <gap>
//! ```
//!
//! The address and the gap are parsed with base auto-detection (`0x` prefix
//! for hexadecimal, a leading `0` for octal, decimal otherwise). The gap is
//! the number of instructions between the previous access and this one and
//! can't be negative.

use std::collections::VecDeque;
use std::io::BufRead;

use cxl_engine::sim_error;
use cxl_engine::types::SimError;
use cxl_protocols::message::Opcode;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceEntry {
    pub address: u64,
    pub opcode: Opcode,
    pub gap: i64,
}

fn parse_unsigned(token: &str) -> Option<u64> {
    if let Some(hex) = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
    {
        u64::from_str_radix(hex, 16).ok()
    } else if token.len() > 1 && token.starts_with('0') {
        u64::from_str_radix(&token[1..], 8).ok()
    } else {
        token.parse().ok()
    }
}

/// Parse one line of a trace.
pub fn parse_line(line: &str) -> Result<TraceEntry, SimError> {
    let tokens: Vec<&str> = line.trim_end_matches(['\r', '\n']).split(' ').collect();
    if tokens.len() != 3 {
        return sim_error!("Invalid trace line '{}'", line);
    }
    let Some(address) = parse_unsigned(tokens[0]) else {
        return sim_error!("Invalid trace line '{}': bad address", line);
    };
    let opcode = match tokens[1] {
        "R" => Opcode::Req,
        "W" => Opcode::RwD,
        op => return sim_error!("Illegal opcode '{}'", op),
    };
    let Some(gap) = parse_unsigned(tokens[2]).and_then(|gap| i64::try_from(gap).ok()) else {
        return sim_error!("Invalid trace line '{}': bad gap", line);
    };
    Ok(TraceEntry {
        address,
        opcode,
        gap,
    })
}

/// Where a host reads its accesses from.
pub trait TraceSource {
    /// The next access, or `None` once the trace is exhausted.
    fn next_entry(&mut self) -> Result<Option<TraceEntry>, SimError>;
}

/// Reads a trace lazily from any buffered reader.
pub struct TraceReader<R: BufRead> {
    reader: R,
    line: String,
    line_number: usize,
}

impl<R: BufRead> TraceReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: String::new(),
            line_number: 0,
        }
    }
}

impl<R: BufRead> TraceSource for TraceReader<R> {
    fn next_entry(&mut self) -> Result<Option<TraceEntry>, SimError> {
        self.line.clear();
        let read = self
            .reader
            .read_line(&mut self.line)
            .map_err(|e| SimError(format!("Failed to read trace: {e}")))?;
        if read == 0 {
            return Ok(None);
        }
        self.line_number += 1;
        parse_line(&self.line)
            .map(Some)
            .map_err(|e| SimError(format!("{} (line {})", e.0, self.line_number)))
    }
}

impl TraceSource for VecDeque<TraceEntry> {
    fn next_entry(&mut self) -> Result<Option<TraceEntry>, SimError> {
        Ok(self.pop_front())
    }
}

/// Number of requests a trace will produce: one per newline.
pub fn count_requests<R: BufRead>(mut reader: R) -> Result<u64, SimError> {
    let mut count = 0;
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let read = reader
            .read_until(b'\n', &mut buf)
            .map_err(|e| SimError(format!("Failed to read trace: {e}")))?;
        if read == 0 {
            return Ok(count);
        }
        if buf.last() == Some(&b'\n') {
            count += 1;
        }
    }
}
