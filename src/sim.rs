// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! In-process collaborators for a single logical unit: a storage collaborator answering
//! descriptor requests, and a scripted host.
//!
//! Descriptors use the inline encoding. After the header, the storage descriptor holds the
//! vendor (8 bytes), product (16 bytes) and revision (4 bytes) strings; the media descriptor holds
//! the block count and block size as little endian `u32`s, or nothing when the drive is empty.

use std::cell::Cell;
use std::cmp;
use std::mem::size_of;
use std::rc::Rc;

use futures::channel::mpsc;
use futures::channel::mpsc::UnboundedReceiver;
use futures::channel::mpsc::UnboundedSender;
use futures::StreamExt;
use log::debug;
use log::error;
use scsi_target::commands::parse_cdb;
use scsi_target::constants::HARDWARE_ERROR;
use scsi_target::constants::ILLEGAL_REQUEST;
use scsi_target::constants::INQUIRY;
use scsi_target::constants::INVALID_COMMAND_OPERATION_CODE;
use scsi_target::constants::INVALID_FIELD_IN_CDB;
use scsi_target::constants::LOGICAL_UNIT_NOT_READY;
use scsi_target::constants::READ_CAPACITY_10;
use scsi_target::constants::REQUEST_SENSE;
use scsi_target::constants::START_STOP_UNIT;
use scsi_target::constants::TEST_UNIT_READY;
use scsi_target::run_worker;
use scsi_target::CommandHandler;
use scsi_target::Disposition;
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

use zerocopy::FromBytes;
use zerocopy::FromZeros;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

use crate::args::HostCommand;

const HEADER_SIZE: usize = size_of::<usize>();
const VENDOR: &str = "SCSIS";
const PRODUCT: &str = "REMOVABLE DISK";
const REVISION: &str = "0.1";
// Peripheral device type: direct access block device.
const TYPE_DISK: u8 = 0x00;

type U32LE = zerocopy::byteorder::U32<zerocopy::byteorder::LittleEndian>;

/// Geometry of the simulated medium.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Medium {
    pub block_count: u32,
    pub block_size: u32,
}

/// Body of the inline storage descriptor.
#[derive(Copy, Clone, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
struct StorageStrings {
    vendor: [u8; 8],
    product: [u8; 16],
    revision: [u8; 4],
}

/// Body of the inline media descriptor of a loaded drive.
#[derive(Copy, Clone, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
struct Geometry {
    block_count: U32LE,
    block_size: U32LE,
}

#[derive(Copy, Clone, Debug, Default, FromBytes, IntoBytes, Immutable, PartialEq, Eq)]
#[repr(C, packed)]
struct Inquiry {
    opcode: u8,
    vpd_field: u8,
    page_code: u8,
    alloc_len_bytes: [u8; 2],
    control: u8,
}

impl Inquiry {
    fn vital_product_data_enabled(&self) -> bool {
        self.vpd_field & 0x1 != 0
    }

    fn alloc_len(&self) -> usize {
        u16::from_be_bytes(self.alloc_len_bytes) as usize
    }
}

#[derive(Copy, Clone, Debug, Default, FromBytes, IntoBytes, Immutable, PartialEq, Eq)]
#[repr(C, packed)]
struct ReadCapacity10 {
    opcode: u8,
    _obsolete1: u8,
    _obsolete2: [u8; 4],
    _reserved: [u8; 2],
    _obsolete3: u8,
    control: u8,
}

fn fill_left_aligned_ascii(buf: &mut [u8], s: &str) {
    debug_assert!(s.len() <= buf.len());
    buf[..s.len()].copy_from_slice(s.as_bytes());
    buf[s.len()..].fill(b' ');
}

/// Answers descriptor requests for a drive that may or may not hold a medium.
pub struct StorageSim {
    medium: Medium,
    loaded: Rc<Cell<bool>>,
}

impl StorageSim {
    pub fn new(medium: Medium, loaded: Rc<Cell<bool>>) -> Self {
        Self { medium, loaded }
    }

    fn storage_descriptor(io: &mut IoBuffer) {
        let mut strings = StorageStrings::new_zeroed();
        fill_left_aligned_ascii(&mut strings.vendor, VENDOR);
        fill_left_aligned_ascii(&mut strings.product, PRODUCT);
        fill_left_aligned_ascii(&mut strings.revision, REVISION);
        io.set_data(&[0u8; HEADER_SIZE]);
        io.append(strings.as_bytes());
    }

    fn media_descriptor(&self, io: &mut IoBuffer) {
        io.set_data(&[0u8; HEADER_SIZE]);
        if self.loaded.get() {
            let geometry = Geometry {
                block_count: U32LE::new(self.medium.block_count),
                block_size: U32LE::new(self.medium.block_size),
            };
            io.append(geometry.as_bytes());
        }
    }

    /// Serves `requests` until the logical unit goes away.
    pub async fn run<C>(
        self,
        mut requests: UnboundedReceiver<Notification<C>>,
        events: UnboundedSender<Event>,
    ) {
        while let Some(Notification {
            request, mut io, ..
        }) = requests.next().await
        {
            match request {
                Request::GetStorageDescriptor => Self::storage_descriptor(&mut io),
                Request::GetMediaDescriptor => self.media_descriptor(&mut io),
                r => {
                    error!("storage collaborator received host request {}", r);
                    continue;
                }
            }
            debug!("storage: answering {} with {} bytes", request, io.data_size());
            if events.unbounded_send(Event::Response { io }).is_err() {
                error!("storage: logical unit is gone");
                return;
            }
        }
    }
}

/// The forwarded commands of the simulated disk.
#[derive(Default)]
pub struct SimCommands;

impl SimCommands {
    fn inquiry(cdb: &[u8], descriptors: Resolved<'_>, io: &mut IoBuffer) -> Disposition {
        let inquiry: Inquiry = match parse_cdb(cdb) {
            Ok(inquiry) => inquiry,
            Err(sense) => return Disposition::Fail(sense),
        };
        // No vital product data pages are supported, and PAGE CODE must be 0 without EVPD.
        if inquiry.vital_product_data_enabled() || inquiry.page_code != 0 {
            return Disposition::Fail(SenseRecord::new(ILLEGAL_REQUEST, INVALID_FIELD_IN_CDB));
        }
        let strings = descriptors
            .storage
            .and_then(|d| d.inline_content())
            .and_then(|content| StorageStrings::read_from_prefix(content).ok());
        let Some((strings, _)) = strings else {
            return Disposition::Fail(SenseRecord::new(HARDWARE_ERROR, LOGICAL_UNIT_NOT_READY));
        };
        let mut outbuf = [0u8; 36];
        outbuf[0] = TYPE_DISK;
        // Removable medium.
        outbuf[1] = 0x80;
        // Version 0x5 indicates that the device complies to SPC-3.
        outbuf[2] = 0x5;
        // Response Data Format should be 2.
        outbuf[3] = 0x2;
        // Additional Length
        outbuf[4] = 36 - 5;
        outbuf[8..36].copy_from_slice(strings.as_bytes());
        io.set_data(&outbuf[..cmp::min(inquiry.alloc_len(), outbuf.len())]);
        Disposition::Pass
    }

    fn read_capacity_10(
        cdb: &[u8],
        descriptors: Resolved<'_>,
        io: &mut IoBuffer,
    ) -> Disposition {
        if let Err(sense) = parse_cdb::<ReadCapacity10>(cdb) {
            return Disposition::Fail(sense);
        }
        let geometry = descriptors
            .media
            .and_then(|d| d.inline_content())
            .and_then(|content| Geometry::read_from_prefix(content).ok());
        let Some((geometry, _)) = geometry else {
            return Disposition::Fail(SenseRecord::new(HARDWARE_ERROR, LOGICAL_UNIT_NOT_READY));
        };
        // Returned value is the block address of the last sector.
        let last_lba = geometry.block_count.get().saturating_sub(1);
        let mut outbuf = [0u8; 8];
        outbuf[..4].copy_from_slice(&last_lba.to_be_bytes());
        outbuf[4..8].copy_from_slice(&geometry.block_size.get().to_be_bytes());
        io.set_data(&outbuf);
        Disposition::Pass
    }
}

impl CommandHandler for SimCommands {
    fn requirements(&self, cdb: &[u8]) -> Requirements {
        match cdb[0] {
            INQUIRY => Requirements::STORAGE,
            READ_CAPACITY_10 => Requirements::ALL,
            _ => Requirements::NONE,
        }
    }

    fn execute(
        &mut self,
        cdb: &[u8],
        descriptors: Resolved<'_>,
        io: &mut IoBuffer,
    ) -> Disposition {
        match cdb[0] {
            INQUIRY => Self::inquiry(cdb, descriptors, io),
            READ_CAPACITY_10 => Self::read_capacity_10(cdb, descriptors, io),
            op => {
                debug!("SCSI command {:#x?} is not implemented", op);
                Disposition::Fail(SenseRecord::new(
                    ILLEGAL_REQUEST,
                    INVALID_COMMAND_OPERATION_CODE,
                ))
            }
        }
    }
}

fn cdb(command: HostCommand) -> Option<Vec<u8>> {
    match command {
        HostCommand::TestUnitReady => Some(vec![TEST_UNIT_READY, 0, 0, 0, 0, 0]),
        HostCommand::RequestSense => Some(vec![REQUEST_SENSE, 0, 0, 0, 18, 0]),
        HostCommand::Inquiry => Some(vec![INQUIRY, 0, 0, 0, 36, 0]),
        HostCommand::ReadCapacity => Some(vec![READ_CAPACITY_10, 0, 0, 0, 0, 0, 0, 0, 0, 0]),
        // LOEJ set, START clear.
        HostCommand::Eject => Some(vec![START_STOP_UNIT, 0, 0, 0, 0x02, 0]),
        HostCommand::Insert | HostCommand::Reset => None,
    }
}

fn describe(command: HostCommand, reply: &Notification<u32>) -> String {
    let data = reply.io.data();
    match (command, reply.request) {
        (HostCommand::RequestSense, Request::Pass) if data.len() >= 14 => format!(
            "{}: PASS ({})",
            command,
            SenseRecord::new(data[2], u16::from_be_bytes([data[12], data[13]]))
        ),
        (HostCommand::Inquiry, Request::Pass) if data.len() >= 36 => format!(
            "{}: PASS ({} {} {})",
            command,
            String::from_utf8_lossy(&data[8..16]).trim_end(),
            String::from_utf8_lossy(&data[16..32]).trim_end(),
            String::from_utf8_lossy(&data[32..36]).trim_end()
        ),
        (HostCommand::ReadCapacity, Request::Pass) if data.len() >= 8 => format!(
            "{}: PASS (last lba {}, block size {})",
            command,
            u32::from_be_bytes([data[0], data[1], data[2], data[3]]),
            u32::from_be_bytes([data[4], data[5], data[6], data[7]])
        ),
        (_, request) => format!("{}: {}", command, request),
    }
}

async fn run_host(
    commands: Vec<HostCommand>,
    events: UnboundedSender<Event>,
    mut replies: UnboundedReceiver<Notification<u32>>,
    loaded: Rc<Cell<bool>>,
    io_size: usize,
) -> Vec<String> {
    let mut transcript = Vec::new();
    for command in commands {
        let event = match (command, cdb(command)) {
            (_, Some(cdb)) => Event::Command {
                cdb,
                io: IoBuffer::with_capacity(io_size),
            },
            (HostCommand::Insert, None) => {
                loaded.set(true);
                Event::MediaChanged
            }
            (_, None) => Event::Reset,
        };
        let expects_reply = matches!(event, Event::Command { .. });
        if events.unbounded_send(event).is_err() {
            transcript.push(format!("{}: logical unit is gone", command));
            break;
        }
        if !expects_reply {
            transcript.push(format!("{}: done", command));
            continue;
        }
        match replies.next().await {
            Some(reply) => {
                if command == HostCommand::Eject && reply.request == Request::Pass {
                    loaded.set(false);
                }
                transcript.push(describe(command, &reply));
            }
            None => {
                transcript.push(format!("{}: logical unit is gone", command));
                break;
            }
        }
    }
    // Lets the worker drain the remaining events and stop.
    events.close_channel();
    transcript
}

/// Runs `commands` against a fresh logical unit and returns one line per command.
pub fn run_session(
    config: &ScsisConfig,
    medium: Medium,
    loaded: bool,
    commands: Vec<HostCommand>,
) -> Vec<String> {
    let (gateway, receivers) = Gateway::new();
    let mut scsis = Scsis::new(config, 0u32, gateway);
    scsis.set_handler(Box::new(SimCommands));

    let loaded = Rc::new(Cell::new(loaded));
    let (events_tx, events_rx) = mpsc::unbounded();
    let storage = StorageSim::new(medium, Rc::clone(&loaded));

    let worker = async move {
        // Dropping the logical unit closes the storage channel.
        drop(run_worker(scsis, events_rx).await);
    };
    let host = run_host(
        commands,
        events_tx.clone(),
        receivers.host,
        loaded,
        config.io_size,
    );
    let storage = storage.run(receivers.storage, events_tx);

    let ((), transcript, ()) = futures::executor::block_on(futures::future::join3(
        worker, host, storage,
    ));
    transcript
}

#[cfg(test)]
mod tests {
    use scsi_target::Descriptor;

    use super::*;

    const MEDIUM: Medium = Medium {
        block_count: 2048,
        block_size: 512,
    };

    #[test]
    fn inquiry_and_capacity() {
        let transcript = run_session(
            &ScsisConfig::default(),
            MEDIUM,
            true,
            vec![
                HostCommand::Inquiry,
                HostCommand::TestUnitReady,
                HostCommand::ReadCapacity,
            ],
        );
        assert_eq!(
            transcript,
            vec![
                "inquiry: PASS (SCSIS REMOVABLE DISK 0.1)",
                "tur: PASS",
                "capacity: PASS (last lba 2047, block size 512)",
            ]
        );
    }

    #[test]
    fn empty_drive_then_insert() {
        let transcript = run_session(
            &ScsisConfig::default(),
            MEDIUM,
            false,
            vec![
                HostCommand::TestUnitReady,
                HostCommand::RequestSense,
                HostCommand::RequestSense,
                HostCommand::Insert,
                HostCommand::TestUnitReady,
            ],
        );
        assert_eq!(
            transcript,
            vec![
                "tur: FAIL (sense key: 02h, ASC: 3ah, ASCQ: 00h)",
                "sense: PASS (sense key: 02h, ASC: 3ah, ASCQ: 00h)",
                "sense: PASS (sense key: 00h, ASC: 00h, ASCQ: 00h)",
                "insert: done",
                "tur: PASS",
            ]
        );
    }

    #[test]
    fn eject_unloads_medium() {
        let transcript = run_session(
            &ScsisConfig::default(),
            MEDIUM,
            true,
            vec![
                HostCommand::TestUnitReady,
                HostCommand::Eject,
                HostCommand::ReadCapacity,
                HostCommand::Reset,
            ],
        );
        assert_eq!(
            transcript,
            vec![
                "tur: PASS",
                "eject: PASS",
                "capacity: FAIL (sense key: 02h, ASC: 3ah, ASCQ: 00h)",
                "reset: done",
            ]
        );
    }

    #[test]
    fn media_descriptor_layout() {
        let loaded = Rc::new(Cell::new(true));
        let storage = StorageSim::new(MEDIUM, Rc::clone(&loaded));
        let mut io = IoBuffer::default();
        storage.media_descriptor(&mut io);
        assert_eq!(io.data_size(), HEADER_SIZE + 8);
        assert_eq!(&io.data()[..HEADER_SIZE], &[0u8; HEADER_SIZE]);

        loaded.set(false);
        storage.media_descriptor(&mut io);
        assert_eq!(io.data_size(), HEADER_SIZE);
    }

    fn loaded_descriptors() -> (Descriptor, Descriptor) {
        let storage = StorageSim::new(MEDIUM, Rc::new(Cell::new(true)));
        let mut io = IoBuffer::default();
        StorageSim::storage_descriptor(&mut io);
        let storage_descriptor = Descriptor::from_response(io.data()).unwrap();
        storage.media_descriptor(&mut io);
        let media_descriptor = Descriptor::from_response(io.data()).unwrap();
        (storage_descriptor, media_descriptor)
    }

    #[test]
    fn inquiry_checks_cdb() {
        let (storage, media) = loaded_descriptors();
        let resolved = Resolved {
            storage: Some(&storage),
            media: Some(&media),
        };
        let invalid = Disposition::Fail(SenseRecord::new(ILLEGAL_REQUEST, INVALID_FIELD_IN_CDB));
        let mut handler = SimCommands;
        let mut io = IoBuffer::default();

        // EVPD set: no vital product data pages.
        let vpd = [INQUIRY, 0x01, 0x80, 0x00, 0x24, 0x00];
        assert_eq!(handler.execute(&vpd, resolved, &mut io), invalid);
        // PAGE CODE without EVPD.
        let page = [INQUIRY, 0x00, 0x80, 0x00, 0x24, 0x00];
        assert_eq!(handler.execute(&page, resolved, &mut io), invalid);
        // Too short.
        let short = [INQUIRY, 0x00, 0x00, 0x00, 0x24];
        assert_eq!(handler.execute(&short, resolved, &mut io), invalid);

        let truncated = [INQUIRY, 0x00, 0x00, 0x00, 0x08, 0x00];
        assert_eq!(
            handler.execute(&truncated, resolved, &mut io),
            Disposition::Pass
        );
        assert_eq!(io.data(), &[TYPE_DISK, 0x80, 0x05, 0x02, 31, 0, 0, 0]);
    }

    #[test]
    fn read_capacity_decodes_geometry() {
        let (storage, media) = loaded_descriptors();
        let resolved = Resolved {
            storage: Some(&storage),
            media: Some(&media),
        };
        let mut handler = SimCommands;
        let mut io = IoBuffer::default();

        let cdb = [READ_CAPACITY_10, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(handler.execute(&cdb, resolved, &mut io), Disposition::Pass);
        assert_eq!(io.data(), &[0x00, 0x00, 0x07, 0xff, 0x00, 0x00, 0x02, 0x00]);

        assert_eq!(
            handler.execute(&cdb[..6], resolved, &mut io),
            Disposition::Fail(SenseRecord::new(ILLEGAL_REQUEST, INVALID_FIELD_IN_CDB))
        );
    }
}
