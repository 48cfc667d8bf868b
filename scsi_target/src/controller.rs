// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The logical unit state machine.
//!
//! A command may need the storage and media descriptors before it can run. Missing descriptors
//! are requested from the storage collaborator one at a time, and the command is suspended until
//! the response arrives. Every command then resolves to exactly one of:
//!
//! * pass: the host is notified `PASS`,
//! * fail: a sense record is queued for REQUEST SENSE and the host is notified `FAIL`,
//! * fatal: the logical unit is reset and the host is notified `INTERNAL_ERROR`.

use log::debug;
use log::error;
use log::info;
use log::warn;
use remain::sorted;
use thiserror::Error as ThisError;

use crate::commands::Command;
use crate::commands::CommandHandler;
use crate::commands::Disposition;
use crate::commands::Resolved;
use crate::commands::UnsupportedCommands;
use crate::config::ScsisConfig;
use crate::constants::MEDIUM_NOT_PRESENT;
use crate::constants::NOT_READY;
use crate::descriptor::Descriptor;
use crate::descriptor::DescriptorCache;
use crate::descriptor::DescriptorError;
use crate::descriptor::DescriptorKind;
use crate::gateway::Gateway;
use crate::gateway::Request;
use crate::io::IoBuffer;
use crate::sense::SenseRecord;
use crate::sense::SenseRing;

/// Faults that leave the logical unit in an unknown state. They are never reported through
/// sense data.
#[sorted]
#[derive(ThisError, Debug)]
pub enum ControllerError {
    #[error("invalid {kind} descriptor response: {source}")]
    Descriptor {
        kind: DescriptorKind,
        source: DescriptorError,
    },
    #[error("invalid state on {kind} descriptor request: {state:?}")]
    InvalidState { kind: DescriptorKind, state: State },
    #[error("command received while {0:?}")]
    UnexpectedCommand(State),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum State {
    Idle,
    AwaitingStorageDescriptor,
    AwaitingMediaDescriptor,
}

impl State {
    fn awaiting(kind: DescriptorKind) -> Self {
        match kind {
            DescriptorKind::Storage => Self::AwaitingStorageDescriptor,
            DescriptorKind::Media => Self::AwaitingMediaDescriptor,
        }
    }
}

/// Inbound events delivered by the owning context.
#[derive(Debug)]
pub enum Event {
    /// A command from the host.
    Command { cdb: Vec<u8>, io: IoBuffer },
    /// The storage collaborator answers the pending descriptor request.
    Response { io: IoBuffer },
    /// The medium was ejected or inserted.
    MediaChanged,
    /// Device reset.
    Reset,
}

/// One logical unit session.
pub struct Scsis<C> {
    state: State,
    descriptors: DescriptorCache,
    errors: SenseRing,
    // Held only while an event is being processed.
    io: Option<IoBuffer>,
    io_size: usize,
    context: C,
    gateway: Gateway<C>,
    handler: Box<dyn CommandHandler>,
    // The suspended or running command.
    command: Option<Command>,
}

impl<C: Clone> Scsis<C> {
    pub fn new(config: &ScsisConfig, context: C, gateway: Gateway<C>) -> Self {
        Self {
            state: State::Idle,
            descriptors: DescriptorCache::new(),
            errors: SenseRing::new(config.sense_depth),
            io: None,
            io_size: config.io_size,
            context,
            gateway,
            handler: Box::new(UnsupportedCommands),
            command: None,
        }
    }

    /// Sets the handler for commands not implemented by the logical unit itself.
    pub fn set_handler(&mut self, handler: Box<dyn CommandHandler>) {
        self.handler = handler;
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == State::Idle
    }

    pub fn descriptor(&self, kind: DescriptorKind) -> Option<&Descriptor> {
        self.descriptors.get(kind)
    }

    pub fn sense_history(&self) -> &SenseRing {
        &self.errors
    }

    /// Removes the oldest sense record, as REQUEST SENSE does.
    pub fn next_sense(&mut self) -> SenseRecord {
        self.errors.pop_oldest()
    }

    pub fn handle_event(&mut self, event: Event) {
        match event {
            Event::Command { cdb, io } => {
                self.io = Some(io);
                if self.state != State::Idle {
                    self.fault(ControllerError::UnexpectedCommand(self.state));
                    return;
                }
                match Command::new(&cdb) {
                    Ok(command) => {
                        self.command = Some(command);
                        self.run_command();
                    }
                    Err(sense) => self.fail(sense.sense_key, sense.ascq),
                }
            }
            Event::Response { io } => {
                if self.state == State::Idle {
                    warn!(
                        "SCSI: dropping unsolicited storage response of {} bytes",
                        io.data_size()
                    );
                    return;
                }
                self.io = Some(io);
                // Without a command, the caller drives `ensure_*` itself.
                if self.command.is_some() {
                    self.run_command();
                }
            }
            Event::MediaChanged => {
                info!("SCSI: media changed");
                self.reset();
            }
            Event::Reset => self.reset(),
        }
    }

    fn run_command(&mut self) {
        let command = match &self.command {
            Some(command) => command.clone(),
            None => return,
        };
        match command {
            Command::TestUnitReady(_) => {
                if self.ensure_media_present() {
                    self.pass();
                }
            }
            Command::RequestSense(request_sense) => {
                let sense = self.errors.pop_oldest();
                request_sense.emulate(&sense, self.io_mut());
                self.pass();
            }
            Command::StartStopUnit(start_stop_unit) => {
                if start_stop_unit.eject() {
                    info!("SCSI: medium unloaded by host");
                    self.reset();
                }
                self.pass();
            }
            Command::Other(cdb) => self.run_forwarded(&cdb),
        }
    }

    fn run_forwarded(&mut self, cdb: &[u8]) {
        let requirements = self.handler.requirements(cdb);
        if requirements.storage && !self.ensure_storage_descriptor() {
            return;
        }
        if requirements.media && !self.ensure_media_present() {
            return;
        }
        let io_size = self.io_size;
        let resolved = Resolved {
            storage: self.descriptors.get(DescriptorKind::Storage),
            media: self.descriptors.get(DescriptorKind::Media),
        };
        let io = self
            .io
            .get_or_insert_with(|| IoBuffer::with_capacity(io_size));
        match self.handler.execute(cdb, resolved, io) {
            Disposition::Pass => self.pass(),
            Disposition::Fail(sense) => self.fail(sense.sense_key, sense.ascq),
        }
    }

    fn io_mut(&mut self) -> &mut IoBuffer {
        let io_size = self.io_size;
        self.io
            .get_or_insert_with(|| IoBuffer::with_capacity(io_size))
    }

    fn notify(&mut self, request: Request) {
        let io = match self.io.take() {
            Some(io) => io,
            None => IoBuffer::with_capacity(self.io_size),
        };
        self.gateway.notify(self.context.clone(), io, request);
    }

    /// Returns true if the storage descriptor is cached. Otherwise the descriptor is requested
    /// and the current command must wait for the response.
    pub fn ensure_storage_descriptor(&mut self) -> bool {
        self.ensure_descriptor(DescriptorKind::Storage)
    }

    /// Returns true if the media descriptor is cached. Otherwise the descriptor is requested and
    /// the current command must wait for the response.
    pub fn ensure_media_descriptor(&mut self) -> bool {
        self.ensure_descriptor(DescriptorKind::Media)
    }

    fn ensure_descriptor(&mut self, kind: DescriptorKind) -> bool {
        if self.descriptors.is_cached(kind) {
            return true;
        }
        match self.state {
            State::Idle => {
                self.state = State::awaiting(kind);
                self.notify(kind.request());
                false
            }
            // The buffer is still out with the storage collaborator.
            state if state == State::awaiting(kind) && self.io.is_none() => false,
            state if state == State::awaiting(kind) => match self.accept_response(kind) {
                Ok(()) => {
                    self.state = State::Idle;
                    true
                }
                Err(e) => {
                    self.fault(e);
                    false
                }
            },
            state => {
                self.fault(ControllerError::InvalidState { kind, state });
                false
            }
        }
    }

    fn accept_response(&mut self, kind: DescriptorKind) -> Result<(), ControllerError> {
        let payload = self.io.as_ref().map(IoBuffer::data).unwrap_or_default();
        let descriptor = self
            .descriptors
            .insert_response(kind, payload)
            .map_err(|source| ControllerError::Descriptor { kind, source })?;
        debug!("SCSI: cached {} descriptor {:?}", kind, descriptor);
        if let Some(io) = self.io.as_mut() {
            io.clear();
        }
        Ok(())
    }

    /// Returns true if a medium is inserted. An empty drive fails the current command with
    /// NOT READY / MEDIUM NOT PRESENT.
    pub fn ensure_media_present(&mut self) -> bool {
        if !self.ensure_media_descriptor() {
            return false;
        }
        let present = self
            .descriptors
            .get(DescriptorKind::Media)
            .map_or(false, Descriptor::medium_present);
        if !present {
            self.fail(NOT_READY, MEDIUM_NOT_PRESENT);
            return false;
        }
        true
    }

    pub fn pass(&mut self) {
        self.state = State::Idle;
        self.command = None;
        self.notify(Request::Pass);
    }

    pub fn fail(&mut self, sense_key: u8, ascq: u16) {
        let sense = SenseRecord::new(sense_key, ascq);
        warn!("SCSI error: {}", sense);
        self.errors.push(sense);
        self.state = State::Idle;
        self.command = None;
        self.notify(Request::Fail(sense));
    }

    /// Resets the logical unit and reports an internal error to the host.
    pub fn fatal(&mut self) {
        self.reset();
        self.notify(Request::InternalError);
    }

    fn fault(&mut self, e: ControllerError) {
        error!("SCSI: {}", e);
        self.fatal();
    }

    /// Drops both descriptors and any suspended command.
    pub fn reset(&mut self) {
        debug!("SCSI: reset in {:?}", self.state);
        self.descriptors.clear();
        self.command = None;
        self.state = State::Idle;
    }
}
