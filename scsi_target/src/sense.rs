// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Sense records and the bounded history the host drains with REQUEST SENSE.

use std::collections::VecDeque;
use std::fmt;

use crate::constants::NO_ADDITIONAL_SENSE_INFORMATION;
use crate::constants::NO_SENSE;

/// Length of fixed format sense data.
pub const FIXED_SENSE_LEN: usize = 18;

/// Default depth of the error history.
pub const SCSI_SENSE_DEPTH: usize = 10;

/// The cause of a recoverable command failure.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct SenseRecord {
    /// Provides generic information describing an error or exception condition.
    pub sense_key: u8,
    /// Additional sense code in the high byte, qualifier in the low byte.
    pub ascq: u16,
}

impl SenseRecord {
    /// Reported when the history has nothing to replay.
    pub const NO_SENSE: SenseRecord = SenseRecord {
        sense_key: NO_SENSE,
        ascq: NO_ADDITIONAL_SENSE_INFORMATION,
    };

    pub const fn new(sense_key: u8, ascq: u16) -> Self {
        Self { sense_key, ascq }
    }

    /// Additional Sense Code.
    pub fn asc(&self) -> u8 {
        (self.ascq >> 8) as u8
    }

    /// Additional Sense Code Qualifier.
    pub fn qualifier(&self) -> u8 {
        (self.ascq & 0xff) as u8
    }

    // Details are in SPC-3 t10 revision 23: <https://www.t10.org/cgi-bin/ac.pl?t=f&f=spc3r23.pdf>
    /// Renders the record as fixed format sense data.
    pub fn to_fixed_format(&self) -> [u8; FIXED_SENSE_LEN] {
        let mut sense_data = [0u8; FIXED_SENSE_LEN];
        // Response code 0x70: current error.
        sense_data[0] = 0x70;
        // sense_data[1]: Obsolete
        sense_data[2] = self.sense_key;
        // sense_data[3..7]: Information field, which we do not support.
        // Additional length. The data is 18 bytes, and this byte is 8th.
        sense_data[7] = 10;
        // sense_data[8..12]: Command specific information, which we do not support.
        sense_data[12] = self.asc();
        sense_data[13] = self.qualifier();
        // sense_data[14..18]: Field replaceable unit code and sense key specific bytes.
        sense_data
    }
}

impl fmt::Display for SenseRecord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "sense key: {:02x}h, ASC: {:02x}h, ASCQ: {:02x}h",
            self.sense_key,
            self.asc(),
            self.qualifier()
        )
    }
}

/// Fixed-capacity FIFO of sense records. The oldest record is evicted when a new one does not
/// fit.
#[derive(Clone, Debug)]
pub struct SenseRing {
    records: VecDeque<SenseRecord>,
    capacity: usize,
}

impl SenseRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.records.len() >= self.capacity
    }

    /// Records `record`, discarding the oldest one if the history is full.
    pub fn push(&mut self, record: SenseRecord) {
        if self.capacity == 0 {
            return;
        }
        if self.is_full() {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// Removes and returns the oldest record, or `SenseRecord::NO_SENSE` if there is none.
    pub fn pop_oldest(&mut self) -> SenseRecord {
        self.records.pop_front().unwrap_or(SenseRecord::NO_SENSE)
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Iterates over the recorded entries, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &SenseRecord> {
        self.records.iter()
    }
}

impl Default for SenseRing {
    fn default() -> Self {
        Self::new(SCSI_SENSE_DEPTH)
    }
}
