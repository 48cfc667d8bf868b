// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Drives a logical unit through whole host sessions, with the test playing both the host and the
//! storage collaborator.

use std::mem::size_of;

use futures::channel::mpsc;
use futures::channel::mpsc::UnboundedReceiver;
use futures::executor::block_on;
use scsi_target::constants::ILLEGAL_REQUEST;
use scsi_target::constants::INVALID_FIELD_IN_CDB;
use scsi_target::constants::MEDIUM_NOT_PRESENT;
use scsi_target::constants::NOT_READY;
use scsi_target::gateway::GatewayReceivers;
use scsi_target::run_worker;
use scsi_target::CommandHandler;
use scsi_target::DescriptorKind;
use scsi_target::Disposition;
use scsi_target::Encoding;
use scsi_target::Event;
use scsi_target::Gateway;
use scsi_target::IoBuffer;
use scsi_target::Notification;
use scsi_target::Request;
use scsi_target::Requirements;
use scsi_target::Resolved;
use scsi_target::Scsis;
use scsi_target::ScsisConfig;
use scsi_target::SenseRecord;
use scsi_target::SenseRing;
use scsi_target::State;

const TEST_UNIT_READY: [u8; 6] = [0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
const REQUEST_SENSE: [u8; 6] = [0x03, 0x00, 0x00, 0x00, 0x12, 0x00];
const EJECT: [u8; 6] = [0x1b, 0x00, 0x00, 0x00, 0x02, 0x00];
const READ_CAPACITY_10: [u8; 10] = [0x25, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];

fn new_session(sense_depth: usize) -> (Scsis<&'static str>, GatewayReceivers<&'static str>) {
    let (gateway, rx) = Gateway::new();
    let config = ScsisConfig {
        sense_depth,
        ..Default::default()
    };
    (Scsis::new(&config, "lun0", gateway), rx)
}

fn next<C>(rx: &mut UnboundedReceiver<Notification<C>>) -> Notification<C> {
    rx.try_recv().expect("no notification pending")
}

fn inline(content: &[u8]) -> IoBuffer {
    let mut io = IoBuffer::from_slice(&[0u8; size_of::<usize>()]);
    io.append(content);
    io
}

fn command(cdb: &[u8]) -> Event {
    Event::Command {
        cdb: cdb.to_vec(),
        io: IoBuffer::default(),
    }
}

/// Reports the block count stored in the media descriptor.
struct Capacity;

impl CommandHandler for Capacity {
    fn requirements(&self, _cdb: &[u8]) -> Requirements {
        Requirements::ALL
    }

    fn execute(
        &mut self,
        _cdb: &[u8],
        descriptors: Resolved<'_>,
        io: &mut IoBuffer,
    ) -> Disposition {
        let media = descriptors.media.expect("media descriptor resolved");
        match media.encoding() {
            Encoding::Inline(content) if content.len() >= 4 => {
                io.set_data(&content[..4]);
                Disposition::Pass
            }
            _ => Disposition::Fail(SenseRecord::new(ILLEGAL_REQUEST, INVALID_FIELD_IN_CDB)),
        }
    }
}

#[test]
fn empty_history_reports_no_sense() {
    let (mut scsis, mut rx) = new_session(3);
    scsis.handle_event(command(&REQUEST_SENSE));
    let reply = next(&mut rx.host);
    assert_eq!(reply.request, Request::Pass);
    assert_eq!(reply.io.data_size(), 18);
    assert_eq!(reply.io.data()[2], 0x00);
    assert_eq!(reply.io.data()[12], 0x00);
    assert_eq!(reply.io.data()[13], 0x00);
}

#[test]
fn history_keeps_newest_records() {
    let mut ring = SenseRing::new(3);
    let records: Vec<_> = (1..=4).map(|i| SenseRecord::new(NOT_READY, i)).collect();
    for record in &records {
        ring.push(*record);
    }
    assert_eq!(ring.len(), 3);
    assert_eq!(ring.pop_oldest(), records[1]);
}

#[test]
fn first_request_goes_to_storage() {
    let (mut scsis, mut rx) = new_session(3);
    assert_eq!(scsis.state(), State::Idle);
    assert!(!scsis.ensure_storage_descriptor());
    assert_eq!(scsis.state(), State::AwaitingStorageDescriptor);
    let request = next(&mut rx.storage);
    assert_eq!(request.request, Request::GetStorageDescriptor);
    assert_eq!(request.context, "lun0");

    // Asking again before the answer arrives sends nothing.
    assert!(!scsis.ensure_storage_descriptor());
    assert_eq!(scsis.state(), State::AwaitingStorageDescriptor);
    assert!(rx.storage.try_recv().is_err());
    assert!(rx.host.try_recv().is_err());
}

#[test]
fn header_only_descriptor_is_normalized() {
    let (mut scsis, mut rx) = new_session(3);
    assert!(!scsis.ensure_storage_descriptor());
    let request = next(&mut rx.storage);
    scsis.handle_event(Event::Response {
        io: inline(&[]),
    });
    assert_eq!(request.io.data_size(), 0);

    assert!(scsis.ensure_storage_descriptor());
    assert_eq!(scsis.state(), State::Idle);
    let descriptor = scsis.descriptor(DescriptorKind::Storage).unwrap();
    let base = descriptor.as_bytes().as_ptr() as usize;
    assert_eq!(descriptor.header(), base + size_of::<usize>());

    assert!(scsis.ensure_storage_descriptor());
    assert!(rx.storage.try_recv().is_err());
}

#[test]
fn truncated_descriptor_is_fatal() {
    let (mut scsis, mut rx) = new_session(3);
    scsis.handle_event(command(&TEST_UNIT_READY));
    let request = next(&mut rx.storage);
    assert_eq!(request.request, Request::GetMediaDescriptor);

    scsis.handle_event(Event::Response {
        io: IoBuffer::from_slice(&[0xff, 0xff]),
    });
    assert_eq!(next(&mut rx.host).request, Request::InternalError);
    assert!(scsis.descriptor(DescriptorKind::Media).is_none());
    assert_eq!(scsis.state(), State::Idle);
    assert!(scsis.sense_history().is_empty());
}

#[test]
fn missing_medium_fails_with_sense() {
    let (mut scsis, mut rx) = new_session(3);
    scsis.handle_event(command(&TEST_UNIT_READY));
    next(&mut rx.storage);
    scsis.handle_event(Event::Response { io: inline(&[]) });

    let sense = SenseRecord::new(NOT_READY, MEDIUM_NOT_PRESENT);
    assert_eq!(next(&mut rx.host).request, Request::Fail(sense));
    assert_eq!(scsis.sense_history().len(), 1);

    scsis.handle_event(command(&REQUEST_SENSE));
    let reply = next(&mut rx.host);
    assert_eq!(reply.request, Request::Pass);
    assert_eq!(reply.io.data()[2], NOT_READY);
    assert_eq!(reply.io.data()[12], 0x3a);
    assert!(scsis.sense_history().is_empty());
}

#[test]
fn forwarded_command_resolves_descriptors_in_order() {
    let (mut scsis, mut rx) = new_session(3);
    scsis.set_handler(Box::new(Capacity));

    scsis.handle_event(command(&READ_CAPACITY_10));
    assert_eq!(next(&mut rx.storage).request, Request::GetStorageDescriptor);
    scsis.handle_event(Event::Response {
        io: inline(b"VENDOR"),
    });
    assert_eq!(next(&mut rx.storage).request, Request::GetMediaDescriptor);
    scsis.handle_event(Event::Response {
        io: inline(&0x1000u32.to_be_bytes()),
    });

    let reply = next(&mut rx.host);
    assert_eq!(reply.request, Request::Pass);
    assert_eq!(reply.io.data(), &0x1000u32.to_be_bytes());

    // Both descriptors are cached now.
    scsis.handle_event(command(&READ_CAPACITY_10));
    assert_eq!(next(&mut rx.host).request, Request::Pass);
    assert!(rx.storage.try_recv().is_err());

    // Ejecting drops them.
    scsis.handle_event(command(&EJECT));
    assert_eq!(next(&mut rx.host).request, Request::Pass);
    assert!(scsis.descriptor(DescriptorKind::Storage).is_none());
    scsis.handle_event(command(&READ_CAPACITY_10));
    assert_eq!(next(&mut rx.storage).request, Request::GetStorageDescriptor);
}

#[test]
fn malformed_cdb_fails() {
    let (mut scsis, mut rx) = new_session(3);
    scsis.handle_event(command(&[0x03, 0x00]));
    assert_eq!(
        next(&mut rx.host).request,
        Request::Fail(SenseRecord::new(ILLEGAL_REQUEST, INVALID_FIELD_IN_CDB))
    );
}

#[test]
fn worker_queues_commands_during_fetch() {
    let (scsis, mut rx) = new_session(3);
    let (events_tx, events_rx) = mpsc::unbounded();

    events_tx.unbounded_send(command(&TEST_UNIT_READY)).unwrap();
    events_tx.unbounded_send(command(&REQUEST_SENSE)).unwrap();
    events_tx
        .unbounded_send(Event::Response {
            io: inline(&[1, 2, 3, 4]),
        })
        .unwrap();
    drop(events_tx);

    let scsis = block_on(run_worker(scsis, events_rx));

    assert_eq!(next(&mut rx.storage).request, Request::GetMediaDescriptor);
    // TEST UNIT READY completes first, then the queued REQUEST SENSE.
    assert_eq!(next(&mut rx.host).request, Request::Pass);
    let sense = next(&mut rx.host);
    assert_eq!(sense.request, Request::Pass);
    assert_eq!(sense.io.data()[2], 0x00);
    assert!(scsis.is_idle());
    assert!(scsis.descriptor(DescriptorKind::Media).is_some());
}
