//! In-process transport
//!
//! Records everything sent and lets callers inject incoming messages as if the
//! device had produced them. Used for running without hardware and in tests.

use super::{MessageCallback, Transport};
use crate::midi::MidiMessage;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::trace;

/// A message recorded by [`MemoryTransport::send`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentMessage {
    pub message: MidiMessage,
    pub timestamp: Option<u64>,
}

pub struct MemoryTransport {
    on_message: MessageCallback,
    sent: Mutex<Vec<SentMessage>>,
    output_open: AtomicBool,
    input_open: AtomicBool,
}

impl MemoryTransport {
    /// Transport with both directions open
    pub fn new(on_message: MessageCallback) -> Self {
        Self {
            on_message,
            sent: Mutex::new(Vec::new()),
            output_open: AtomicBool::new(true),
            input_open: AtomicBool::new(true),
        }
    }

    /// Transport whose output is missing; every send fails
    pub fn without_output(on_message: MessageCallback) -> Self {
        let transport = Self::new(on_message);
        transport.output_open.store(false, Ordering::SeqCst);
        transport
    }

    /// Deliver a message as if the device had sent it
    ///
    /// Dropped once the transport is closed.
    pub fn inject(&self, message: MidiMessage, timestamp: u64) {
        if !self.input_open.load(Ordering::SeqCst) {
            trace!("Input closed, dropping injected {}", message);
            return;
        }
        (self.on_message)(message, timestamp);
    }

    /// Everything sent so far, oldest first
    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().clone()
    }

    /// Sent messages without timestamps
    pub fn sent_messages(&self) -> Vec<MidiMessage> {
        self.sent.lock().iter().map(|s| s.message).collect()
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }
}

impl Transport for MemoryTransport {
    fn send(&self, message: &MidiMessage, timestamp: Option<u64>) -> bool {
        if !self.output_open.load(Ordering::SeqCst) {
            return false;
        }
        self.sent.lock().push(SentMessage {
            message: *message,
            timestamp,
        });
        true
    }

    fn close(&self) {
        self.output_open.store(false, Ordering::SeqCst);
        self.input_open.store(false, Ordering::SeqCst);
    }

    fn has_output(&self) -> bool {
        self.output_open.load(Ordering::SeqCst)
    }

    fn has_input(&self) -> bool {
        self.input_open.load(Ordering::SeqCst)
    }
}
