//! Streaming datagram decoder
//!
//! The decoder scans for the sync word one byte at a time, so any amount of
//! leading garbage is skipped and a corrupted datagram can never desync the
//! following ones: each parse call serves exactly one datagram and starts
//! its own sync search.

use super::{
    Header, N_DEVICE_NAME, N_SOURCE_HASH, N_SOURCE_NAME, PositionSensor, SYNC, SetDutyCycle,
    TYPE_HEARTBEAT, TYPE_POSITION_SENSOR, TYPE_RESET, TYPE_SET_DUTY_CYCLE,
};

/// Receives the decoded contents of a datagram.
///
/// `filter` runs once per datagram right after the header; returning `false`
/// discards the whole datagram before any body callback fires. The body
/// callbacks default to no-ops so a listener only implements the variants it
/// cares about.
pub trait Listener {
    fn filter(&mut self, _header: &Header) -> bool {
        true
    }

    fn on_position_sensor(&mut self, _header: &Header, _msg: &PositionSensor) {}

    fn on_set_duty_cycle(&mut self, _header: &Header, _msg: &SetDutyCycle) {}

    fn on_heartbeat(&mut self, _header: &Header) {}

    fn on_reset(&mut self, _header: &Header) {}
}

/// Byte-streaming parser for one datagram at a time.
///
/// Deliberately stateless across parse calls: datagrams are atomic, so an
/// incomplete tail terminates the call instead of waiting for more bytes,
/// and the sync search starts afresh with the next datagram.
#[derive(Clone, Default)]
pub struct Decoder;

impl Decoder {
    pub fn new() -> Self {
        Self
    }

    /// Walk one datagram, invoking the listener for each complete message.
    ///
    /// Truncated tails and unknown type bytes terminate the datagram without
    /// the partial callback; messages decoded before that point have already
    /// been dispatched. Several back-to-back datagrams inside one buffer are
    /// each decoded, provided every one presents its own sync word.
    pub fn parse<L: Listener>(&mut self, listener: &mut L, buf: &[u8]) {
        let mut sync: u32 = 0;
        let mut pos = 0;
        while pos < buf.len() {
            // Shift bytes into the sync register until it matches
            if sync != SYNC {
                sync = (sync << 8) | buf[pos] as u32;
                pos += 1;
                continue;
            }

            let Some(header) = read_header(buf, &mut pos) else {
                return;
            };
            if !listener.filter(&header) {
                return;
            }

            for _ in 0..header.n_messages {
                if pos >= buf.len() {
                    return;
                }
                let msg_type = buf[pos];
                pos += 1;
                match msg_type {
                    TYPE_POSITION_SENSOR => {
                        let Some((device_name, position)) = read_device_i32(buf, &mut pos) else {
                            return;
                        };
                        listener.on_position_sensor(
                            &header,
                            &PositionSensor {
                                device_name,
                                position,
                            },
                        );
                    }
                    TYPE_SET_DUTY_CYCLE => {
                        let Some((device_name, duty_cycle)) = read_device_i32(buf, &mut pos) else {
                            return;
                        };
                        listener.on_set_duty_cycle(
                            &header,
                            &SetDutyCycle {
                                device_name,
                                duty_cycle,
                            },
                        );
                    }
                    TYPE_HEARTBEAT => listener.on_heartbeat(&header),
                    TYPE_RESET => listener.on_reset(&header),
                    _ => {
                        // Unknown type: no recovery within this datagram
                        return;
                    }
                }
            }

            // The next datagram has to present its own sync word
            sync = 0;
        }
    }
}

/// Read the header fields following the sync word, or `None` if the buffer
/// ends first.
fn read_header(buf: &[u8], pos: &mut usize) -> Option<Header> {
    if buf.len() - *pos < N_SOURCE_NAME + N_SOURCE_HASH + 4 + 1 {
        return None;
    }
    let mut source_name = [0u8; N_SOURCE_NAME];
    let mut source_hash = [0u8; N_SOURCE_HASH];
    source_name.copy_from_slice(&buf[*pos..*pos + N_SOURCE_NAME]);
    *pos += N_SOURCE_NAME;
    source_hash.copy_from_slice(&buf[*pos..*pos + N_SOURCE_HASH]);
    *pos += N_SOURCE_HASH;
    let sequence = u32::from_be_bytes([buf[*pos], buf[*pos + 1], buf[*pos + 2], buf[*pos + 3]]);
    *pos += 4;
    let n_messages = buf[*pos];
    *pos += 1;
    Some(Header {
        source_name,
        source_hash,
        sequence,
        n_messages,
    })
}

/// Read a device name field followed by a big-endian i32.
fn read_device_i32(buf: &[u8], pos: &mut usize) -> Option<([u8; N_DEVICE_NAME], i32)> {
    if buf.len() - *pos < N_DEVICE_NAME + 4 {
        return None;
    }
    let mut device_name = [0u8; N_DEVICE_NAME];
    device_name.copy_from_slice(&buf[*pos..*pos + N_DEVICE_NAME]);
    *pos += N_DEVICE_NAME;
    let value = i32::from_be_bytes([buf[*pos], buf[*pos + 1], buf[*pos + 2], buf[*pos + 3]]);
    *pos += 4;
    Some((device_name, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::field_str;

    #[derive(Debug, PartialEq)]
    enum Event {
        Position(String, i32),
        DutyCycle(String, i32),
        Heartbeat,
        Reset,
    }

    #[derive(Default)]
    struct Recorder {
        events: Vec<Event>,
        reject_all: bool,
    }

    impl Listener for Recorder {
        fn filter(&mut self, _header: &Header) -> bool {
            !self.reject_all
        }

        fn on_position_sensor(&mut self, _header: &Header, msg: &PositionSensor) {
            self.events
                .push(Event::Position(msg.device().to_string(), msg.position));
        }

        fn on_set_duty_cycle(&mut self, _header: &Header, msg: &SetDutyCycle) {
            self.events
                .push(Event::DutyCycle(msg.device().to_string(), msg.duty_cycle));
        }

        fn on_heartbeat(&mut self, _header: &Header) {
            self.events.push(Event::Heartbeat);
        }

        fn on_reset(&mut self, _header: &Header) {
            self.events.push(Event::Reset);
        }
    }

    /// Hand-build a datagram: header plus raw message bytes.
    fn datagram(sequence: u32, messages: &[&[u8]]) -> Vec<u8> {
        let mut d = Vec::new();
        d.extend_from_slice(&SYNC.to_be_bytes());
        d.extend_from_slice(b"src_name\0\0\0\0\0\0\0\0");
        d.extend_from_slice(b"hashhash");
        d.extend_from_slice(&sequence.to_be_bytes());
        d.push(messages.len() as u8);
        for m in messages {
            d.extend_from_slice(m);
        }
        d
    }

    fn position_msg(device: &str, position: i32) -> Vec<u8> {
        let mut m = vec![TYPE_POSITION_SENSOR];
        let mut field = [0u8; N_DEVICE_NAME];
        crate::protocol::copy_padded(device.as_bytes(), &mut field);
        m.extend_from_slice(&field);
        m.extend_from_slice(&position.to_be_bytes());
        m
    }

    #[test]
    fn decodes_a_plain_datagram() {
        let msg = position_msg("motor_outA", -42);
        let d = datagram(7, &[&msg, &[TYPE_HEARTBEAT], &[TYPE_RESET]]);

        let mut rec = Recorder::default();
        Decoder::new().parse(&mut rec, &d);
        assert_eq!(
            rec.events,
            vec![
                Event::Position("motor_outA".into(), -42),
                Event::Heartbeat,
                Event::Reset,
            ]
        );
    }

    #[test]
    fn header_fields_reach_the_listener() {
        struct Check(bool);
        impl Listener for Check {
            fn filter(&mut self, header: &Header) -> bool {
                assert_eq!(header.source_name(), "src_name");
                assert_eq!(header.source_hash(), "hashhash");
                assert_eq!(header.sequence, 0xDEAD_BEEF);
                assert_eq!(header.n_messages, 1);
                self.0 = true;
                true
            }
        }
        let d = datagram(0xDEAD_BEEF, &[&[TYPE_HEARTBEAT]]);
        let mut check = Check(false);
        Decoder::new().parse(&mut check, &d);
        assert!(check.0);
    }

    #[test]
    fn leading_garbage_is_skipped() {
        let msg = position_msg("motor_outB", 778);
        let mut d = vec![0x00, 0xFF, 0xCA, 0xA2, 0x11, 0x22, 0x33];
        d.extend_from_slice(&datagram(0, &[&msg]));

        let mut rec = Recorder::default();
        Decoder::new().parse(&mut rec, &d);
        assert_eq!(rec.events, vec![Event::Position("motor_outB".into(), 778)]);
    }

    #[test]
    fn filter_rejection_drops_the_whole_datagram() {
        let d = datagram(0, &[&[TYPE_HEARTBEAT]]);
        let mut rec = Recorder {
            reject_all: true,
            ..Default::default()
        };
        Decoder::new().parse(&mut rec, &d);
        assert!(rec.events.is_empty());
    }

    #[test]
    fn unknown_type_keeps_earlier_messages() {
        let msg = position_msg("motor_outA", 1);
        let d = datagram(0, &[&msg, &[0x7F], &[TYPE_HEARTBEAT]]);

        let mut rec = Recorder::default();
        Decoder::new().parse(&mut rec, &d);
        assert_eq!(rec.events, vec![Event::Position("motor_outA".into(), 1)]);
    }

    #[test]
    fn truncation_drops_only_the_partial_message() {
        let first = position_msg("motor_outA", 1);
        let second = position_msg("motor_outB", 2);
        let d = datagram(0, &[&first, &second]);

        let mut rec = Recorder::default();
        // Cut into the middle of the second message
        Decoder::new().parse(&mut rec, &d[..d.len() - 10]);
        assert_eq!(rec.events, vec![Event::Position("motor_outA".into(), 1)]);
    }

    #[test]
    fn truncated_header_yields_nothing() {
        let d = datagram(0, &[&[TYPE_HEARTBEAT]]);
        let mut rec = Recorder::default();
        Decoder::new().parse(&mut rec, &d[..20]);
        assert!(rec.events.is_empty());
    }

    #[test]
    fn error_does_not_leak_sync_state_into_next_parse() {
        let mut dec = Decoder::new();

        // First datagram ends mid-header
        let cut = datagram(0, &[&[TYPE_HEARTBEAT]]);
        let mut rec = Recorder::default();
        dec.parse(&mut rec, &cut[..10]);
        assert!(rec.events.is_empty());

        // A following datagram with a payload that happens to start where
        // the header would have continued must still decode on its own
        let d = datagram(1, &[&[TYPE_HEARTBEAT]]);
        dec.parse(&mut rec, &d);
        assert_eq!(rec.events, vec![Event::Heartbeat]);
    }

    #[test]
    fn back_to_back_datagrams_in_one_buffer() {
        let mut d = datagram(0, &[&[TYPE_HEARTBEAT]]);
        d.extend_from_slice(&datagram(1, &[&[TYPE_RESET]]));

        let mut rec = Recorder::default();
        Decoder::new().parse(&mut rec, &d);
        assert_eq!(rec.events, vec![Event::Heartbeat, Event::Reset]);
    }

    #[test]
    fn device_name_full_width_round_trips() {
        let name = "sixteen_chars_ab";
        assert_eq!(name.len(), N_DEVICE_NAME);
        let msg = position_msg(name, 5);
        let d = datagram(0, &[&msg]);

        let mut rec = Recorder::default();
        Decoder::new().parse(&mut rec, &d);
        assert_eq!(rec.events, vec![Event::Position(name.into(), 5)]);
    }

    #[test]
    fn non_utf8_device_name_reads_as_empty() {
        let mut msg = position_msg("motor_outA", 5);
        msg[1] = 0xFF;
        let d = datagram(0, &[&msg]);

        let mut rec = Recorder::default();
        Decoder::new().parse(&mut rec, &d);
        assert_eq!(rec.events, vec![Event::Position(String::new(), 5)]);
        let field = [0xFFu8, 0, 0, 0];
        assert_eq!(field_str(&field), "");
    }
}
