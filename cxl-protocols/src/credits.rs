// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! Link-layer credits.
//!
//! Every node keeps _internal_ credits (space it owns in its receive
//! channels) and _external_ credits (space the peer has granted it). Credits
//! are granted to the peer in flit headers.

use std::fmt;
use std::ops::AddAssign;

use cxl_engine::sim_error;
use cxl_engine::types::{SimError, SimResult};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Credits {
    pub req: i64,
    pub rsp: i64,
    pub data: i64,
}

impl Credits {
    #[must_use]
    pub fn new(req: i64, rsp: i64, data: i64) -> Self {
        Self { req, rsp, data }
    }

    /// Check that every counter lies within `[0, capacity]`.
    pub fn check_within(&self, capacity: &Credits, what: &str) -> SimResult {
        let within = |value: i64, limit: i64| (0..=limit).contains(&value);
        if !within(self.req, capacity.req) {
            return sim_error!("{} req credits {} out of range", what, self.req);
        }
        if !within(self.rsp, capacity.rsp) {
            return sim_error!("{} rsp credits {} out of range", what, self.rsp);
        }
        if !within(self.data, capacity.data) {
            return sim_error!("{} data credits {} out of range", what, self.data);
        }
        Ok(())
    }

    /// Take one credit from a counter, failing if none are left.
    pub fn consume(counter: &mut i64, what: &str) -> Result<(), SimError> {
        if *counter <= 0 {
            return sim_error!("No {} credit to consume", what);
        }
        *counter -= 1;
        Ok(())
    }
}

impl AddAssign for Credits {
    fn add_assign(&mut self, other: Self) {
        self.req += other.req;
        self.rsp += other.rsp;
        self.data += other.data;
    }
}

impl fmt::Display for Credits {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{{{},{},{}}}", self.req, self.rsp, self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_returned_credits() {
        let mut ext = Credits::new(1, 0, 1);
        ext += Credits::new(3, 0, 2);
        assert_eq!(ext, Credits::new(4, 0, 3));
        assert_eq!(ext.to_string(), "{4,0,3}");
    }

    #[test]
    fn range_check() {
        let cap = Credits::new(0, 1024, 1024);
        assert!(Credits::new(0, 1024, 0).check_within(&cap, "host").is_ok());
        let err = Credits::new(1, 0, 0).check_within(&cap, "host").unwrap_err();
        assert_eq!(err.0, "host req credits 1 out of range");
        assert!(Credits::new(0, 3, -1).check_within(&cap, "host").is_err());
    }

    #[test]
    fn consume_stops_at_zero() {
        let mut credits = Credits::new(1, 0, 0);
        Credits::consume(&mut credits.req, "req").unwrap();
        assert_eq!(credits.req, 0);
        assert!(Credits::consume(&mut credits.req, "req").is_err());
    }
}
