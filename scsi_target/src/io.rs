// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

/// Working buffer exchanged between a logical unit and its collaborators.
///
/// The buffer is a size plus a payload region. It is moved along with every event and
/// notification, so exactly one party holds it at a time.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IoBuffer {
    data: Vec<u8>,
}

impl IoBuffer {
    /// Creates an empty buffer able to hold `capacity` bytes without reallocating.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
        }
    }

    pub fn from_slice(data: &[u8]) -> Self {
        Self {
            data: data.to_vec(),
        }
    }

    /// Number of valid payload bytes.
    pub fn data_size(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Replaces the payload with `data`.
    pub fn set_data(&mut self, data: &[u8]) {
        self.data.clear();
        self.data.extend_from_slice(data);
    }

    pub fn append(&mut self, data: &[u8]) {
        self.data.extend_from_slice(data);
    }
}

impl From<Vec<u8>> for IoBuffer {
    fn from(data: Vec<u8>) -> Self {
        Self { data }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_data_replaces_payload() {
        let mut io = IoBuffer::with_capacity(16);
        assert!(io.is_empty());
        io.set_data(&[1, 2, 3]);
        io.append(&[4]);
        assert_eq!(io.data_size(), 4);
        io.set_data(&[9]);
        assert_eq!(io.data(), &[9]);
        io.clear();
        assert_eq!(io.data_size(), 0);
    }
}
