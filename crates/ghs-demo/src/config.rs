// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Demo configuration: the agent roster and runtime knobs.
//!
//! A JSON document with two sections. `ghs` lists every agent and its TCP
//! endpoint (every node loads the same roster); `runtime` holds optional
//! behavior switches.
//!
//! ```json
//! {
//!   "ghs": {
//!     "agents": [
//!       { "id": 0, "endpoint": "127.0.0.1:4710" },
//!       { "id": 1, "endpoint": "127.0.0.1:4711" }
//!     ]
//!   },
//!   "runtime": { "wait_s": 1, "retry_connections": true }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read};
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;

/// Ways the config can be unusable.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// The document is not valid JSON of the expected shape.
    #[error(transparent)]
    Parse(#[from] serde_json::Error),
    /// Fewer than two agents: nothing to elect.
    #[error("need at least two agents, got {0}")]
    TooFewAgents(usize),
    /// The node's own id is missing from the roster.
    #[error("agent {0} is not in the roster")]
    UnknownAgent(u16),
    /// Two roster entries share an id.
    #[error("duplicate agent id {0}")]
    DuplicateAgent(u16),
    /// Two roster entries share an endpoint.
    #[error("duplicate endpoint {0}")]
    DuplicateEndpoint(SocketAddr),
}

/// One roster entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentEndpoint {
    /// Agent id, unique across the roster.
    pub id: u16,
    /// Where that agent listens.
    pub endpoint: SocketAddr,
}

/// The `ghs` section: who participates and where.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GhsSection {
    /// Every participating agent.
    pub agents: Vec<AgentEndpoint>,
}

/// The `runtime` section: behavior switches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeSection {
    /// Seconds to wait before the first send.
    #[serde(default)]
    pub wait_s: u64,
    /// Keep retrying unreachable peers instead of hanging up at once.
    #[serde(default)]
    pub retry_connections: bool,
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            wait_s: 0,
            retry_connections: false,
        }
    }
}

/// The whole document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Agent roster.
    pub ghs: GhsSection,
    /// Runtime switches; every field optional.
    #[serde(default)]
    pub runtime: RuntimeSection,
}

impl Config {
    /// Loads and parses the file at `path`.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        Self::from_reader(BufReader::new(File::open(path)?))
    }

    /// Parses a document from any reader (a file, or stdin when piped).
    pub fn from_reader(reader: impl Read) -> Result<Self, ConfigError> {
        Ok(serde_json::from_reader(reader)?)
    }

    /// Checks the roster is usable from `my_id`'s point of view.
    pub fn validate(&self, my_id: u16) -> Result<(), ConfigError> {
        let agents = &self.ghs.agents;
        if agents.len() < 2 {
            return Err(ConfigError::TooFewAgents(agents.len()));
        }
        for (i, a) in agents.iter().enumerate() {
            for b in &agents[i + 1..] {
                if a.id == b.id {
                    return Err(ConfigError::DuplicateAgent(a.id));
                }
                if a.endpoint == b.endpoint {
                    return Err(ConfigError::DuplicateEndpoint(a.endpoint));
                }
            }
        }
        if self.endpoint_of(my_id).is_none() {
            return Err(ConfigError::UnknownAgent(my_id));
        }
        Ok(())
    }

    /// The listen address for `id`, if rostered.
    #[must_use]
    pub fn endpoint_of(&self, id: u16) -> Option<SocketAddr> {
        self.ghs
            .agents
            .iter()
            .find(|a| a.id == id)
            .map(|a| a.endpoint)
    }

    /// Everyone except `my_id`.
    #[must_use]
    pub fn peers_of(&self, my_id: u16) -> Vec<AgentEndpoint> {
        self.ghs
            .agents
            .iter()
            .copied()
            .filter(|a| a.id != my_id)
            .collect()
    }
}
