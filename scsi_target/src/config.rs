// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use remain::sorted;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error as ThisError;

use crate::descriptor::DESCRIPTOR_HEADER_SIZE;
use crate::sense::SCSI_SENSE_DEPTH;

fn sense_depth_default() -> usize {
    SCSI_SENSE_DEPTH
}

fn io_size_default() -> usize {
    512
}

#[sorted]
#[derive(ThisError, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("io-size {0} is smaller than a descriptor header")]
    IoSizeTooSmall(usize),
    #[error("sense-depth must be at least 1")]
    ZeroSenseDepth,
}

/// Parameters for setting up a logical unit.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct ScsisConfig {
    /// Number of sense records kept for REQUEST SENSE.
    #[serde(default = "sense_depth_default")]
    pub sense_depth: usize,
    /// Initial capacity of working buffers.
    #[serde(default = "io_size_default")]
    pub io_size: usize,
}

impl ScsisConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sense_depth == 0 {
            return Err(ConfigError::ZeroSenseDepth);
        }
        if self.io_size < DESCRIPTOR_HEADER_SIZE {
            return Err(ConfigError::IoSizeTooSmall(self.io_size));
        }
        Ok(())
    }
}

impl Default for ScsisConfig {
    fn default() -> Self {
        Self {
            sense_depth: sense_depth_default(),
            io_size: io_size_default(),
        }
    }
}
