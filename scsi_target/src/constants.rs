// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

#![deny(missing_docs)]
//! This file contains values specified in spec.
//! SPC-3: <https://www.t10.org/cgi-bin/ac.pl?t=f&f=spc3r23.pdf>
//!
//! Additional sense codes are stored as a single `u16`: the additional sense code (ASC) in the
//! high byte and the additional sense code qualifier (ASCQ) in the low byte.

// OPERATION CODES
/// TEST UNIT READY
pub const TEST_UNIT_READY: u8 = 0x00;
/// REQUEST SENSE
pub const REQUEST_SENSE: u8 = 0x03;
/// INQUIRY
pub const INQUIRY: u8 = 0x12;
/// START STOP UNIT
pub const START_STOP_UNIT: u8 = 0x1b;
/// READ CAPACITY(10)
pub const READ_CAPACITY_10: u8 = 0x25;

// SENSE KEYS
/// Indicates that there is no specific sense key information to be reported.
pub const NO_SENSE: u8 = 0x00;
/// Indicates that the logical unit is not accessible.
pub const NOT_READY: u8 = 0x02;
/// Indicates an error that may have been caused by a flaw in the medium or an error in the
/// recorded data.
pub const MEDIUM_ERROR: u8 = 0x03;
/// Indicates a non-recoverable hardware failure.
pub const HARDWARE_ERROR: u8 = 0x04;
/// Indicates an illegal parameter in the command descriptor block or in the additional
/// parameters supplied as data.
pub const ILLEGAL_REQUEST: u8 = 0x05;

// ADDITIONAL SENSE CODES AND QUALIFIERS
/// NO ADDITIONAL SENSE INFORMATION
pub const NO_ADDITIONAL_SENSE_INFORMATION: u16 = 0x0000;
/// LOGICAL UNIT NOT READY, CAUSE NOT REPORTABLE
pub const LOGICAL_UNIT_NOT_READY: u16 = 0x0400;
/// UNRECOVERED READ ERROR
pub const UNRECOVERED_READ_ERROR: u16 = 0x1100;
/// INVALID COMMAND OPERATION CODE
pub const INVALID_COMMAND_OPERATION_CODE: u16 = 0x2000;
/// INVALID FIELD IN CDB
pub const INVALID_FIELD_IN_CDB: u16 = 0x2400;
/// MEDIUM NOT PRESENT
pub const MEDIUM_NOT_PRESENT: u16 = 0x3a00;
