//! Scripted bus for unit tests.

use std::collections::VecDeque;

use embedded_hal::delay::DelayNs;

use crate::bus::{Bus, Transmission};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Write { address: u8, bytes: Vec<u8> },
    Read { address: u8, len: usize },
}

/// Records every transaction. Writes complete unless a status was queued
/// with [`MockBus::push_status`]; reads are served from
/// [`MockBus::push_reply`] and return nothing once the queue is empty.
#[derive(Default)]
pub struct MockBus {
    pub ops: Vec<Op>,
    pub elapsed_ns: u64,
    statuses: VecDeque<Transmission>,
    replies: VecDeque<Vec<u8>>,
}

impl MockBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_status(&mut self, status: Transmission) -> &mut Self {
        self.statuses.push_back(status);
        self
    }

    pub fn push_reply(&mut self, bytes: &[u8]) -> &mut Self {
        self.replies.push_back(bytes.to_vec());
        self
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                Op::Write { bytes, .. } => Some(bytes.clone()),
                Op::Read { .. } => None,
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.ops.clear();
    }
}

impl DelayNs for MockBus {
    fn delay_ns(&mut self, ns: u32) {
        self.elapsed_ns += ns as u64;
    }
}

impl Bus for MockBus {
    fn write(&mut self, address: u8, bytes: &[u8]) -> Transmission {
        self.ops.push(Op::Write {
            address,
            bytes: bytes.to_vec(),
        });
        self.statuses.pop_front().unwrap_or(Transmission::Complete)
    }

    fn read(&mut self, address: u8, buffer: &mut [u8]) -> usize {
        self.ops.push(Op::Read {
            address,
            len: buffer.len(),
        });
        match self.replies.pop_front() {
            Some(reply) => {
                let n = reply.len().min(buffer.len());
                buffer[..n].copy_from_slice(&reply[..n]);
                n
            }
            None => 0,
        }
    }
}
