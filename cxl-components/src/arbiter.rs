// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! Arbitration between two message classes and between the lanes of a
//! virtual channel.
//!
//! Every two-way choice in the link layer (packing requests against
//! requests-with-data, retiring NDR against DRS, ...) uses the same
//! three-state token. One class is the _lead_ class: it is tried first in the
//! [`Token::PreferLead`] state. The other states try the other class first.
//! The state reached after a grant depends on the [`TokenPolicy`].

use std::fmt;

use cxl_engine::types::SimError;

/// The two classes an arbiter chooses between.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Class {
    Lead,
    Other,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Token {
    /// Try the lead class first.
    #[default]
    PreferLead,
    /// Try the other class first.
    PreferOther,
    /// The lead class was granted last. Try the other class first.
    LeadGranted,
}

/// How the token moves when the other class is granted.
///
/// Granting the lead class always moves the token to [`Token::LeadGranted`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenPolicy {
    /// From [`Token::PreferLead`] the token goes to [`Token::PreferOther`],
    /// otherwise back to [`Token::PreferLead`].
    Alternate,

    /// From [`Token::LeadGranted`] the token goes to [`Token::PreferOther`],
    /// otherwise to [`Token::PreferLead`].
    Packer,
}

pub struct ClassArbiter {
    token: Token,
    policy: TokenPolicy,
}

impl ClassArbiter {
    #[must_use]
    pub fn new(policy: TokenPolicy) -> Self {
        Self {
            token: Token::default(),
            policy,
        }
    }

    #[must_use]
    pub fn token(&self) -> Token {
        self.token
    }

    /// The order in which the classes are tried in the current state.
    #[must_use]
    pub fn order(&self) -> [Class; 2] {
        match self.token {
            Token::PreferLead => [Class::Lead, Class::Other],
            Token::PreferOther | Token::LeadGranted => [Class::Other, Class::Lead],
        }
    }

    pub fn grant(&mut self, class: Class) {
        self.token = match (class, self.policy, self.token) {
            (Class::Lead, _, _) => Token::LeadGranted,
            (Class::Other, TokenPolicy::Alternate, Token::PreferLead) => Token::PreferOther,
            (Class::Other, TokenPolicy::Alternate, _) => Token::PreferLead,
            (Class::Other, TokenPolicy::Packer, Token::LeadGranted) => Token::PreferOther,
            (Class::Other, TokenPolicy::Packer, _) => Token::PreferLead,
        };
    }

    /// Offer each class in turn to `attempt` and grant the first one that
    /// produces a value. The token is unchanged if neither does.
    pub fn arbitrate<T, F>(&mut self, mut attempt: F) -> Result<Option<T>, SimError>
    where
        F: FnMut(Class) -> Result<Option<T>, SimError>,
    {
        for class in self.order() {
            if let Some(value) = attempt(class)? {
                self.grant(class);
                return Ok(Some(value));
            }
        }
        Ok(None)
    }
}

impl fmt::Display for ClassArbiter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self.token {
            Token::PreferLead => "R",
            Token::PreferOther => "r",
            Token::LeadGranted => "w",
        };
        write!(f, "{s}")
    }
}

/// Start position for scanning the lanes of a virtual channel.
///
/// After a hit at lane `i` the next scan starts at `i + 1`, except when the
/// scan itself started at the last lane, in which case it restarts at 0. The
/// start can therefore reach `num_lanes`, which wraps to lane 0.
#[derive(Clone, Debug, Default)]
pub struct LaneCursor {
    start: usize,
}

impl LaneCursor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn start(&self) -> usize {
        self.start
    }

    /// Return the first lane for which `eligible` holds and move the cursor.
    pub fn scan<F>(&mut self, num_lanes: usize, mut eligible: F) -> Option<usize>
    where
        F: FnMut(usize) -> bool,
    {
        for i in self.start..(self.start + num_lanes) {
            let lane = i % num_lanes;
            if eligible(lane) {
                self.start = if self.start == num_lanes - 1 {
                    0
                } else {
                    lane + 1
                };
                return Some(lane);
            }
        }
        None
    }
}
