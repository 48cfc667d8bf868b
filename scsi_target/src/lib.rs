// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Command-processing core of a removable SCSI logical unit.
//!
//! The medium behind the logical unit is reached through an asynchronous storage collaborator,
//! so commands that need the storage or media descriptors are suspended until the descriptor
//! arrives. Results go back to the host through a fire-and-forget `Gateway`; recoverable failures
//! are kept in a bounded sense history for REQUEST SENSE.

pub mod commands;
pub mod config;
pub mod constants;
mod controller;
pub mod descriptor;
pub mod gateway;
mod io;
pub mod sense;
mod worker;

pub use commands::CommandHandler;
pub use commands::Disposition;
pub use commands::Requirements;
pub use commands::Resolved;
pub use config::ScsisConfig;
pub use controller::ControllerError;
pub use controller::Event;
pub use controller::Scsis;
pub use controller::State;
pub use descriptor::Descriptor;
pub use descriptor::DescriptorKind;
pub use descriptor::Encoding;
pub use gateway::Gateway;
pub use gateway::Notification;
pub use gateway::Request;
pub use io::IoBuffer;
pub use sense::SenseRecord;
pub use sense::SenseRing;
pub use worker::run_worker;
