// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use log::warn;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;

use crate::constants::ILLEGAL_REQUEST;
use crate::constants::INVALID_COMMAND_OPERATION_CODE;
use crate::constants::INVALID_FIELD_IN_CDB;
use crate::constants::REQUEST_SENSE;
use crate::constants::START_STOP_UNIT;
use crate::constants::TEST_UNIT_READY;
use crate::descriptor::Descriptor;
use crate::io::IoBuffer;
use crate::sense::SenseRecord;

/// Commands whose semantics belong to the logical unit state machine itself. Everything else is
/// forwarded to a `CommandHandler`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    TestUnitReady(TestUnitReady),
    RequestSense(RequestSense),
    StartStopUnit(StartStopUnit),
    Other(Vec<u8>),
}

impl Command {
    pub fn new(cdb: &[u8]) -> Result<Self, SenseRecord> {
        let op = *cdb.first().ok_or_else(|| {
            warn!("empty SCSI command");
            invalid_field()
        })?;
        match op {
            TEST_UNIT_READY => Ok(Self::TestUnitReady(parse_cdb(cdb)?)),
            REQUEST_SENSE => Ok(Self::RequestSense(parse_cdb(cdb)?)),
            START_STOP_UNIT => Ok(Self::StartStopUnit(parse_cdb(cdb)?)),
            _ => Ok(Self::Other(cdb.to_vec())),
        }
    }
}

/// Decodes the fixed-size CDB `T` from the front of `cdb`. A short CDB fails with
/// ILLEGAL REQUEST / INVALID FIELD IN CDB.
pub fn parse_cdb<T: FromBytes>(cdb: &[u8]) -> Result<T, SenseRecord> {
    let size = std::mem::size_of::<T>();
    cdb.get(..size)
        .and_then(|bytes| T::read_from_bytes(bytes).ok())
        .ok_or_else(|| {
            warn!(
                "SCSI command {:#x} is {} bytes, expected {}",
                cdb.first().copied().unwrap_or_default(),
                cdb.len(),
                size
            );
            invalid_field()
        })
}

fn invalid_field() -> SenseRecord {
    SenseRecord::new(ILLEGAL_REQUEST, INVALID_FIELD_IN_CDB)
}

#[derive(Copy, Clone, Debug, Default, FromBytes, IntoBytes, Immutable, PartialEq, Eq)]
#[repr(C, packed)]
pub struct TestUnitReady {
    opcode: u8,
    reserved: [u8; 4],
    control: u8,
}

#[derive(Copy, Clone, Debug, Default, FromBytes, IntoBytes, Immutable, PartialEq, Eq)]
#[repr(C, packed)]
pub struct RequestSense {
    opcode: u8,
    desc_field: u8,
    reserved: [u8; 2],
    alloc_len: u8,
    control: u8,
}

impl RequestSense {
    pub fn alloc_len(&self) -> usize {
        self.alloc_len as usize
    }

    /// Writes `sense` in fixed format, truncated to the allocation length.
    pub fn emulate(&self, sense: &SenseRecord, io: &mut IoBuffer) {
        let sense_data = sense.to_fixed_format();
        let len = std::cmp::min(self.alloc_len(), sense_data.len());
        io.set_data(&sense_data[..len]);
    }
}

#[derive(Copy, Clone, Debug, Default, FromBytes, IntoBytes, Immutable, PartialEq, Eq)]
#[repr(C, packed)]
pub struct StartStopUnit {
    opcode: u8,
    immed_field: u8,
    reserved: u8,
    power_condition_modifier: u8,
    start_field: u8,
    control: u8,
}

impl StartStopUnit {
    fn start(&self) -> bool {
        self.start_field & 0x1 != 0
    }

    fn load_eject(&self) -> bool {
        self.start_field & 0x2 != 0
    }

    /// The host asks for the medium to be unloaded.
    pub fn eject(&self) -> bool {
        self.load_eject() && !self.start()
    }
}

/// Descriptors a forwarded command needs before it can run.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Requirements {
    pub storage: bool,
    /// The media descriptor must be resolved and report an inserted medium.
    pub media: bool,
}

impl Requirements {
    pub const NONE: Requirements = Requirements {
        storage: false,
        media: false,
    };
    pub const STORAGE: Requirements = Requirements {
        storage: true,
        media: false,
    };
    pub const ALL: Requirements = Requirements {
        storage: true,
        media: true,
    };
}

/// Descriptors resolved for a forwarded command. A descriptor is `None` only if the command did
/// not require it and it has not been fetched yet.
#[derive(Copy, Clone, Debug)]
pub struct Resolved<'a> {
    pub storage: Option<&'a Descriptor>,
    pub media: Option<&'a Descriptor>,
}

/// Outcome of a command that ran to completion.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Disposition {
    Pass,
    Fail(SenseRecord),
}

/// Executes the commands the logical unit does not implement itself.
pub trait CommandHandler {
    fn requirements(&self, cdb: &[u8]) -> Requirements;

    /// Runs `cdb` once its requirements are met. Data for the host goes into `io`.
    fn execute(
        &mut self,
        cdb: &[u8],
        descriptors: Resolved<'_>,
        io: &mut IoBuffer,
    ) -> Disposition;
}

/// Rejects every forwarded command.
#[derive(Copy, Clone, Debug, Default)]
pub struct UnsupportedCommands;

impl CommandHandler for UnsupportedCommands {
    fn requirements(&self, _cdb: &[u8]) -> Requirements {
        Requirements::NONE
    }

    fn execute(&mut self, cdb: &[u8], _: Resolved<'_>, _: &mut IoBuffer) -> Disposition {
        warn!("SCSI command {:#x?} is not implemented", cdb[0]);
        Disposition::Fail(SenseRecord::new(
            ILLEGAL_REQUEST,
            INVALID_COMMAND_OPERATION_CODE,
        ))
    }
}
