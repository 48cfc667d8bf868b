// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Fire-and-forget notification channels towards the host and the storage collaborator.
//!
//! Requests never block and never return a value. Whatever a collaborator has to say comes back
//! later as an inbound `Event` carrying the `IoBuffer`. There is no correlation identifier: at
//! most one request per direction is outstanding for a logical unit.

use std::fmt;

use futures::channel::mpsc;
use futures::channel::mpsc::UnboundedReceiver;
use futures::channel::mpsc::UnboundedSender;
use log::debug;
use log::error;

use crate::io::IoBuffer;
use crate::sense::SenseRecord;

/// Every outbound request a logical unit can make.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Request {
    /// Storage: fetch the storage descriptor.
    GetStorageDescriptor,
    /// Storage: fetch the media descriptor.
    GetMediaDescriptor,
    /// Host: the command succeeded.
    Pass,
    /// Host: the command failed, sense data is queued for REQUEST SENSE.
    Fail(SenseRecord),
    /// Host: the logical unit hit a protocol fault and has been reset.
    InternalError,
}

impl Request {
    pub fn is_storage_request(&self) -> bool {
        matches!(
            self,
            Self::GetStorageDescriptor | Self::GetMediaDescriptor
        )
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::GetStorageDescriptor => write!(f, "GET_STORAGE_DESCRIPTOR"),
            Self::GetMediaDescriptor => write!(f, "GET_MEDIA_DESCRIPTOR"),
            Self::Pass => write!(f, "PASS"),
            Self::Fail(sense) => write!(f, "FAIL ({})", sense),
            Self::InternalError => write!(f, "INTERNAL_ERROR"),
        }
    }
}

/// A request together with the caller context and the working buffer.
#[derive(Debug)]
pub struct Notification<C> {
    pub context: C,
    pub io: IoBuffer,
    pub request: Request,
}

/// One direction of the gateway.
pub struct Channel<C> {
    name: &'static str,
    tx: UnboundedSender<Notification<C>>,
}

impl<C> Channel<C> {
    fn new(name: &'static str) -> (Self, UnboundedReceiver<Notification<C>>) {
        let (tx, rx) = mpsc::unbounded();
        (Self { name, tx }, rx)
    }

    /// Queues a notification. A closed channel drops it.
    pub fn notify(&self, context: C, io: IoBuffer, request: Request) {
        debug!("{} request: {}", self.name, request);
        if let Err(e) = self.tx.unbounded_send(Notification {
            context,
            io,
            request,
        }) {
            error!(
                "failed to send {} to the {}: receiver is gone",
                e.into_inner().request,
                self.name
            );
        }
    }
}

/// Routes requests to the host or the storage collaborator.
pub struct Gateway<C> {
    host: Channel<C>,
    storage: Channel<C>,
}

/// Receiving ends handed to the collaborators.
pub struct GatewayReceivers<C> {
    pub host: UnboundedReceiver<Notification<C>>,
    pub storage: UnboundedReceiver<Notification<C>>,
}

impl<C> Gateway<C> {
    pub fn new() -> (Self, GatewayReceivers<C>) {
        let (host, host_rx) = Channel::new("host");
        let (storage, storage_rx) = Channel::new("storage");
        (
            Self { host, storage },
            GatewayReceivers {
                host: host_rx,
                storage: storage_rx,
            },
        )
    }

    pub fn notify(&self, context: C, io: IoBuffer, request: Request) {
        if request.is_storage_request() {
            self.storage.notify(context, io, request);
        } else {
            self.host.notify(context, io, request);
        }
    }
}
