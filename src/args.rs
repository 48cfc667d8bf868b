// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Context;
use argh::FromArgs;
use scsi_target::ScsisConfig;

/// A step of the scripted host session.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HostCommand {
    /// TEST UNIT READY
    TestUnitReady,
    /// REQUEST SENSE
    RequestSense,
    /// INQUIRY
    Inquiry,
    /// READ CAPACITY(10)
    ReadCapacity,
    /// START STOP UNIT with the eject bit.
    Eject,
    /// The storage collaborator loads a medium and reports the change.
    Insert,
    /// Device reset.
    Reset,
}

impl fmt::Display for HostCommand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            HostCommand::TestUnitReady => "tur",
            HostCommand::RequestSense => "sense",
            HostCommand::Inquiry => "inquiry",
            HostCommand::ReadCapacity => "capacity",
            HostCommand::Eject => "eject",
            HostCommand::Insert => "insert",
            HostCommand::Reset => "reset",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for HostCommand {
    type Err = String;
    fn from_str(s: &str) -> Result<HostCommand, Self::Err> {
        match s {
            "tur" => Ok(HostCommand::TestUnitReady),
            "sense" => Ok(HostCommand::RequestSense),
            "inquiry" => Ok(HostCommand::Inquiry),
            "capacity" => Ok(HostCommand::ReadCapacity),
            "eject" => Ok(HostCommand::Eject),
            "insert" => Ok(HostCommand::Insert),
            "reset" => Ok(HostCommand::Reset),
            _ => Err(format!("unknown host command `{}`", s)),
        }
    }
}

fn default_block_count() -> u32 {
    2048
}

fn default_block_size() -> u32 {
    512
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Clone, Debug, FromArgs)]
/// Runs a removable SCSI logical unit against a simulated storage collaborator.
pub struct Args {
    /// path to a JSON configuration file for the logical unit.
    #[argh(option, arg_name = "PATH")]
    pub cfg: Option<PathBuf>,
    /// number of sense records kept for REQUEST SENSE (overrides --cfg).
    #[argh(option)]
    pub sense_depth: Option<usize>,
    /// start with an empty drive.
    #[argh(switch)]
    pub no_medium: bool,
    /// number of blocks of the simulated medium. (default: 2048)
    #[argh(option, default = "default_block_count()")]
    pub block_count: u32,
    /// block size of the simulated medium. (default: 512)
    #[argh(option, default = "default_block_size()")]
    pub block_size: u32,
    /// log filter, in RUST_LOG syntax. (default: info)
    #[argh(option, default = "default_log_level()")]
    pub log_level: String,
    /// host commands to run in order: tur, sense, inquiry, capacity, eject, insert, reset.
    #[argh(positional)]
    pub commands: Vec<HostCommand>,
}

impl Args {
    /// Builds the logical unit configuration from `--cfg` and the command line overrides.
    pub fn config(&self) -> anyhow::Result<ScsisConfig> {
        let mut config = match &self.cfg {
            Some(path) => {
                let contents = fs::read_to_string(path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                serde_json::from_str(&contents)
                    .with_context(|| format!("failed to parse {}", path.display()))?
            }
            None => ScsisConfig::default(),
        };
        if let Some(sense_depth) = self.sense_depth {
            config.sense_depth = sense_depth;
        }
        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}
