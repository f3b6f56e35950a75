// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

use cxl_track::test_helpers::create_tracker;

use crate::context::SimContext;
use crate::params::CxlParams;

#[must_use]
pub fn start_test(full_filepath: &str) -> SimContext {
    start_test_with_params(full_filepath, &CxlParams::default())
}

#[must_use]
pub fn start_test_with_params(full_filepath: &str, params: &CxlParams) -> SimContext {
    SimContext::new(&create_tracker(full_filepath), params).unwrap()
}
