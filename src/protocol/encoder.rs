//! Batching datagram encoder
//!
//! Messages are accumulated into a fixed buffer that already carries the
//! header prefix; `flush` patches the sequence number and message count in
//! place and hands the finished datagram to the send callback. The encoder
//! never allocates after construction and never blocks.

use super::{
    HEARTBEAT_SIZE, MTU_BUDGET, N_DEVICE_NAME, N_SOURCE_HASH, N_SOURCE_NAME,
    POSITION_SENSOR_SIZE, RESET_SIZE, SET_DUTY_CYCLE_SIZE, SYNC, TYPE_HEARTBEAT,
    TYPE_POSITION_SENSOR, TYPE_RESET, TYPE_SET_DUTY_CYCLE, copy_padded,
};
use crate::source_id::SourceId;

/// Send callback invoked with each finished datagram. Returning `false`
/// trips the encoder's sticky error flag; I/O errors stay on this side of
/// the boundary.
pub type SendFn = Box<dyn FnMut(&[u8]) -> bool>;

pub struct Encoder {
    sink: SendFn,
    buf: [u8; MTU_BUDGET],
    /// Write position, always past the header.
    cursor: usize,
    sequence: u32,
    n_messages: u8,
    /// Offset of the sequence field, patched on flush.
    sequence_offset: usize,
    /// Offset of the first message body, cursor reset target.
    payload_offset: usize,
    good: bool,
}

impl Encoder {
    pub fn new(source_id: &SourceId, sink: SendFn) -> Self {
        let mut buf = [0u8; MTU_BUDGET];
        buf[0..4].copy_from_slice(&SYNC.to_be_bytes());
        copy_padded(source_id.name().as_bytes(), &mut buf[4..4 + N_SOURCE_NAME]);
        copy_padded(
            source_id.hash().as_bytes(),
            &mut buf[4 + N_SOURCE_NAME..4 + N_SOURCE_NAME + N_SOURCE_HASH],
        );

        let sequence_offset = 4 + N_SOURCE_NAME + N_SOURCE_HASH;
        let payload_offset = sequence_offset + 4 + 1;
        Self {
            sink,
            buf,
            cursor: payload_offset,
            sequence: 0,
            n_messages: 0,
            sequence_offset,
            payload_offset,
            good: true,
        }
    }

    /// `false` once the send callback has reported a failure. Subsequent
    /// flushes stop sending but keep advancing the sequence counter.
    pub fn is_good(&self) -> bool {
        self.good
    }

    /// Emit the current batch and start a new one.
    ///
    /// The sequence counter advances on every call, even when the batch is
    /// empty or sending is suppressed, so a receiver can read any sequence
    /// gap as datagram loss.
    pub fn flush(&mut self) {
        if self.good && self.n_messages > 0 {
            let seq = self.sequence_offset;
            self.buf[seq..seq + 4].copy_from_slice(&self.sequence.to_be_bytes());
            self.buf[seq + 4] = self.n_messages;
            self.good = (self.sink)(&self.buf[..self.cursor]);
        }
        self.n_messages = 0;
        self.sequence = self.sequence.wrapping_add(1);
        self.cursor = self.payload_offset;
    }

    pub fn write_position_sensor(&mut self, device_name: &str, position: i32) {
        self.begin_message(POSITION_SENSOR_SIZE);
        self.push_byte(TYPE_POSITION_SENSOR);
        self.push_field(device_name.as_bytes(), N_DEVICE_NAME);
        self.push_i32(position);
        self.n_messages += 1;
    }

    pub fn write_set_duty_cycle(&mut self, device_name: &str, duty_cycle: i32) {
        self.begin_message(SET_DUTY_CYCLE_SIZE);
        self.push_byte(TYPE_SET_DUTY_CYCLE);
        self.push_field(device_name.as_bytes(), N_DEVICE_NAME);
        self.push_i32(duty_cycle);
        self.n_messages += 1;
    }

    pub fn write_heartbeat(&mut self) {
        self.begin_message(HEARTBEAT_SIZE);
        self.push_byte(TYPE_HEARTBEAT);
        self.n_messages += 1;
    }

    pub fn write_reset(&mut self) {
        self.begin_message(RESET_SIZE);
        self.push_byte(TYPE_RESET);
        self.n_messages += 1;
    }

    /// Flush first when the next message would overrun the buffer or the
    /// header's message counter.
    fn begin_message(&mut self, size_required: usize) {
        if self.cursor + size_required > self.buf.len() || self.n_messages == u8::MAX {
            self.flush();
        }
    }

    fn push_byte(&mut self, value: u8) {
        self.buf[self.cursor] = value;
        self.cursor += 1;
    }

    fn push_field(&mut self, value: &[u8], width: usize) {
        copy_padded(value, &mut self.buf[self.cursor..self.cursor + width]);
        self.cursor += width;
    }

    fn push_i32(&mut self, value: i32) {
        self.buf[self.cursor..self.cursor + 4].copy_from_slice(&value.to_be_bytes());
        self.cursor += 4;
    }
}

impl std::fmt::Debug for Encoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Encoder")
            .field("sequence", &self.sequence)
            .field("n_messages", &self.n_messages)
            .field("cursor", &self.cursor)
            .field("good", &self.good)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Header;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Reconstruct the header of an encoded datagram.
    fn header_of(datagram: &[u8]) -> Header {
        let mut source_name = [0u8; N_SOURCE_NAME];
        let mut source_hash = [0u8; N_SOURCE_HASH];
        source_name.copy_from_slice(&datagram[4..20]);
        source_hash.copy_from_slice(&datagram[20..28]);
        Header {
            source_name,
            source_hash,
            sequence: u32::from_be_bytes([datagram[28], datagram[29], datagram[30], datagram[31]]),
            n_messages: datagram[32],
        }
    }

    fn capture() -> (Rc<RefCell<Vec<Vec<u8>>>>, SendFn) {
        let sent: Rc<RefCell<Vec<Vec<u8>>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&sent);
        (
            sent,
            Box::new(move |datagram: &[u8]| {
                sink.borrow_mut().push(datagram.to_vec());
                true
            }),
        )
    }

    fn test_source() -> SourceId {
        SourceId::new("test")
    }

    #[test]
    fn empty_flush_sends_nothing_but_advances_sequence() {
        let (sent, sink) = capture();
        let mut enc = Encoder::new(&test_source(), sink);

        enc.flush();
        enc.flush();
        assert!(sent.borrow().is_empty());

        enc.write_heartbeat();
        enc.flush();
        let datagrams = sent.borrow();
        assert_eq!(datagrams.len(), 1);
        // Two empty flushes came first
        assert_eq!(header_of(&datagrams[0]).sequence, 2);
    }

    #[test]
    fn header_prefix_layout() {
        let (sent, sink) = capture();
        let mut enc = Encoder::new(&test_source(), sink);
        enc.write_heartbeat();
        enc.flush();

        let datagrams = sent.borrow();
        let d = &datagrams[0];
        assert_eq!(&d[0..4], &[0xCA, 0xA2, 0x9C, 0x3A]);
        assert_eq!(&d[4..8], b"test");
        assert!(d[8..20].iter().all(|&b| b == 0));
        assert_eq!(d.len(), 34);
        assert_eq!(d[32], 1);
        assert_eq!(d[33], TYPE_HEARTBEAT);
    }

    #[test]
    fn batch_splits_when_buffer_fills() {
        let (sent, sink) = capture();
        let mut enc = Encoder::new(&test_source(), sink);

        // 60 position messages of 21 bytes each exceed 1280 - 33 bytes
        for i in 0..60 {
            enc.write_position_sensor("motor_outA", i);
        }
        enc.flush();

        let datagrams = sent.borrow();
        assert_eq!(datagrams.len(), 2);
        for d in datagrams.iter() {
            assert!(d.len() <= MTU_BUDGET);
            let header = header_of(d);
            let body = d.len() - 33;
            assert_eq!(body, header.n_messages as usize * POSITION_SENSOR_SIZE);
        }
        assert_eq!(header_of(&datagrams[0]).sequence, 0);
        assert_eq!(header_of(&datagrams[1]).sequence, 1);
        let total: usize = datagrams.iter().map(|d| header_of(d).n_messages as usize).sum();
        assert_eq!(total, 60);
    }

    #[test]
    fn message_counter_caps_at_255() {
        let (sent, sink) = capture();
        let mut enc = Encoder::new(&test_source(), sink);

        for _ in 0..256 {
            enc.write_heartbeat();
        }
        enc.flush();

        let datagrams = sent.borrow();
        assert_eq!(datagrams.len(), 2);
        assert_eq!(header_of(&datagrams[0]).n_messages, 255);
        assert_eq!(header_of(&datagrams[1]).n_messages, 1);
    }

    #[test]
    fn sequence_wraps_after_overflow() {
        let (sent, sink) = capture();
        let mut enc = Encoder::new(&test_source(), sink);
        enc.sequence = u32::MAX;

        enc.write_heartbeat();
        enc.flush();
        enc.write_heartbeat();
        enc.flush();

        let datagrams = sent.borrow();
        assert_eq!(header_of(&datagrams[0]).sequence, u32::MAX);
        assert_eq!(header_of(&datagrams[1]).sequence, 0);
    }

    #[test]
    fn failed_send_sticks_and_suppresses_later_sends() {
        let calls = Rc::new(RefCell::new(0usize));
        let sink_calls = Rc::clone(&calls);
        let mut enc = Encoder::new(
            &test_source(),
            Box::new(move |_: &[u8]| {
                *sink_calls.borrow_mut() += 1;
                false
            }),
        );

        enc.write_heartbeat();
        enc.flush();
        assert!(!enc.is_good());

        enc.write_heartbeat();
        enc.flush();
        assert_eq!(*calls.borrow(), 1);
    }
}
