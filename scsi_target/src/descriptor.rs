// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Storage and media descriptors supplied by the storage collaborator.
//!
//! A descriptor is an opaque record whose leading pointer-sized field (native endianness)
//! describes where its content lives:
//!
//! * zero: the content follows the header inside the record (inline encoding),
//! * non-zero: an address owned by the storage collaborator (out-of-line encoding).
//!
//! Once cached, the inline header is rewritten to the address of the first byte after the header
//! so that consumers can always follow the header field, whatever the encoding was.

use std::collections::TryReserveError;
use std::fmt;
use std::mem::size_of;
use std::num::NonZeroUsize;

use remain::sorted;
use thiserror::Error as ThisError;

use crate::gateway::Request;

/// Size of the self-describing header at the start of every descriptor.
pub const DESCRIPTOR_HEADER_SIZE: usize = size_of::<usize>();

#[sorted]
#[derive(ThisError, Debug)]
pub enum DescriptorError {
    #[error("out of memory allocating {size} byte descriptor: {source}")]
    Alloc {
        size: usize,
        source: TryReserveError,
    },
    #[error("descriptor response of {0} bytes is shorter than its header")]
    Truncated(usize),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DescriptorKind {
    Storage,
    Media,
}

impl DescriptorKind {
    /// The storage request fetching this descriptor.
    pub fn request(self) -> Request {
        match self {
            Self::Storage => Request::GetStorageDescriptor,
            Self::Media => Request::GetMediaDescriptor,
        }
    }
}

impl fmt::Display for DescriptorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Storage => write!(f, "storage"),
            Self::Media => write!(f, "media"),
        }
    }
}

/// Typed view of where the content of a descriptor lives.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Encoding<'a> {
    /// The content follows the header inside the cached record.
    Inline(&'a [u8]),
    /// The content is owned by the storage collaborator at this address.
    OutOfLine(NonZeroUsize),
}

/// An owned, exact-sized descriptor record with a normalized header.
pub struct Descriptor {
    record: Box<[u8]>,
    inline: bool,
}

impl Descriptor {
    /// Validates and copies a fetch response, normalizing an inline header.
    pub fn from_response(payload: &[u8]) -> Result<Self, DescriptorError> {
        let size = payload.len();
        if size < DESCRIPTOR_HEADER_SIZE {
            return Err(DescriptorError::Truncated(size));
        }
        let mut record = Vec::new();
        record
            .try_reserve_exact(size)
            .map_err(|source| DescriptorError::Alloc { size, source })?;
        record.extend_from_slice(payload);
        // The heap address is stable from here on, the header may refer to it.
        let mut record = record.into_boxed_slice();

        let inline = read_header(&record) == 0;
        if inline {
            let content = record.as_ptr() as usize + DESCRIPTOR_HEADER_SIZE;
            record[..DESCRIPTOR_HEADER_SIZE].copy_from_slice(&content.to_ne_bytes());
        }
        Ok(Self { record, inline })
    }

    /// The normalized record, header included.
    pub fn as_bytes(&self) -> &[u8] {
        &self.record
    }

    pub fn len(&self) -> usize {
        self.record.len()
    }

    pub fn is_empty(&self) -> bool {
        self.record.is_empty()
    }

    /// The normalized header value: always the address of the descriptor content.
    pub fn header(&self) -> usize {
        read_header(&self.record)
    }

    pub fn encoding(&self) -> Encoding<'_> {
        if self.inline {
            return Encoding::Inline(&self.record[DESCRIPTOR_HEADER_SIZE..]);
        }
        match NonZeroUsize::new(self.header()) {
            Some(addr) => Encoding::OutOfLine(addr),
            // Only inline records can carry a zero header before normalization.
            None => Encoding::Inline(&self.record[DESCRIPTOR_HEADER_SIZE..]),
        }
    }

    /// The inline content, if the descriptor uses the inline encoding.
    pub fn inline_content(&self) -> Option<&[u8]> {
        match self.encoding() {
            Encoding::Inline(content) => Some(content),
            Encoding::OutOfLine(_) => None,
        }
    }

    /// Whether a media descriptor reports an inserted medium.
    ///
    /// The storage collaborator signals an empty drive with an inline descriptor that has no
    /// content after its header.
    pub fn medium_present(&self) -> bool {
        match self.encoding() {
            Encoding::Inline(content) => !content.is_empty(),
            Encoding::OutOfLine(_) => true,
        }
    }
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Descriptor")
            .field("len", &self.record.len())
            .field("inline", &self.inline)
            .field("header", &format_args!("{:#x}", self.header()))
            .finish()
    }
}

fn read_header(record: &[u8]) -> usize {
    let mut header = [0u8; DESCRIPTOR_HEADER_SIZE];
    header.copy_from_slice(&record[..DESCRIPTOR_HEADER_SIZE]);
    usize::from_ne_bytes(header)
}

/// Lazily populated storage and media descriptor slots.
#[derive(Debug, Default)]
pub struct DescriptorCache {
    storage: Option<Descriptor>,
    media: Option<Descriptor>,
}

impl DescriptorCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, kind: DescriptorKind) -> &Option<Descriptor> {
        match kind {
            DescriptorKind::Storage => &self.storage,
            DescriptorKind::Media => &self.media,
        }
    }

    fn slot_mut(&mut self, kind: DescriptorKind) -> &mut Option<Descriptor> {
        match kind {
            DescriptorKind::Storage => &mut self.storage,
            DescriptorKind::Media => &mut self.media,
        }
    }

    pub fn get(&self, kind: DescriptorKind) -> Option<&Descriptor> {
        self.slot(kind).as_ref()
    }

    pub fn is_cached(&self, kind: DescriptorKind) -> bool {
        self.slot(kind).is_some()
    }

    /// Caches the descriptor carried by a fetch response. The slot is left untouched on error.
    pub fn insert_response(
        &mut self,
        kind: DescriptorKind,
        payload: &[u8],
    ) -> Result<&Descriptor, DescriptorError> {
        let descriptor = Descriptor::from_response(payload)?;
        Ok(self.slot_mut(kind).insert(descriptor))
    }

    /// Frees both descriptors.
    pub fn clear(&mut self) {
        self.storage = None;
        self.media = None;
    }
}
