//! Server node: the broker personality running on the robot
//!
//! Three timers drive it: a fast position broadcast, a heartbeat that also
//! runs the quarantine startup state machine, and a periodic motor rescan.
//! Inbound datagrams are dispatched through the self-filtering listener.
//!
//! # Quarantine startup
//!
//! The node must not start broadcasting under a name another node already
//! owns. It therefore spends its first four heartbeat intervals only
//! listening: a heartbeat carrying our name but a foreign hash in that
//! window marks a conflict, and the node exits non-zero at the next
//! heartbeat tick. Only after four quiet heartbeats does it promote itself
//! to broadcasting, and from then on the name is kept until process exit.

use super::RECV_BUF_SIZE;
use crate::error::{Error, Result};
use crate::event_loop::EventLoop;
use crate::motors::{Motor, MotorRegistry};
use crate::protocol::{Decoder, Encoder, Header, Listener, SetDutyCycle, field_matches};
use crate::source_id::SourceId;
use crate::transport;
use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::os::fd::AsRawFd;
use std::path::PathBuf;
use std::time::Duration;

/// Position broadcast interval.
const BROADCAST_INTERVAL: Duration = Duration::from_millis(10);
/// Heartbeat interval; also paces the startup state machine.
const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(250);
/// Unconditional motor rescan interval.
const RESCAN_INTERVAL: Duration = Duration::from_secs(1);
/// Heartbeats to listen for conflicts before claiming the name.
const QUARANTINE_HEARTBEATS: u32 = 4;

pub struct ServerNode {
    source_id: SourceId,
    sock: UdpSocket,
    encoder: Encoder,
    decoder: Decoder,
    registry: MotorRegistry,
    recv_buf: [u8; RECV_BUF_SIZE],
    broadcast_enabled: bool,
    conflict: bool,
    heartbeats: u32,
    fatal: Option<Error>,
}

impl ServerNode {
    pub fn new(name: &str, port: u16, motor_root: impl Into<PathBuf>) -> Result<Self> {
        let source_id = SourceId::new(name);
        let sock = transport::open_socket(port)?;

        let broadcast_addr = SocketAddrV4::new(Ipv4Addr::BROADCAST, port);
        let send_sock = sock.try_clone()?;
        let encoder = Encoder::new(
            &source_id,
            Box::new(move |datagram| {
                match transport::send_to(&send_sock, broadcast_addr, datagram) {
                    Ok(sent) => sent,
                    Err(e) => {
                        log::warn!("broadcast send failed: {e}");
                        false
                    }
                }
            }),
        );

        let registry = MotorRegistry::new(motor_root);
        log::info!(
            "server {}:{} on port {}, {} motor(s)",
            source_id.name(),
            source_id.hash(),
            port,
            registry.len()
        );

        Ok(Self {
            source_id,
            sock,
            encoder,
            decoder: Decoder::new(),
            registry,
            recv_buf: [0; RECV_BUF_SIZE],
            broadcast_enabled: false,
            conflict: false,
            heartbeats: 0,
            fatal: None,
        })
    }

    /// Run until the socket closes, the send path fails, or a name conflict
    /// aborts the startup.
    pub fn run(&mut self) -> Result<()> {
        let mut events: EventLoop<ServerNode> = EventLoop::new();
        events
            .register_fd(self.sock.as_raw_fd(), ServerNode::handle_datagram)
            .register_timer(BROADCAST_INTERVAL, ServerNode::broadcast_positions)
            .register_timer(HEARTBEAT_INTERVAL, ServerNode::heartbeat_tick)
            .register_timer(RESCAN_INTERVAL, |node| {
                node.registry.rescan();
                true
            });
        events.run(self)?;

        if let Some(fatal) = self.fatal.take() {
            return Err(fatal);
        }
        if !self.encoder.is_good() {
            return Err(Error::SendFailed);
        }
        Ok(())
    }

    fn handle_datagram(&mut self) -> bool {
        let len = match transport::recv_from(&self.sock, &mut self.recv_buf) {
            Ok(Some((_, len))) => len,
            Ok(None) => {
                log::info!("socket shut down");
                return false;
            }
            Err(e) => {
                self.fatal = Some(e);
                return false;
            }
        };

        let mut dispatch = ServerDispatch {
            source_id: &self.source_id,
            registry: &mut self.registry,
            conflict: &mut self.conflict,
            rescan_needed: false,
        };
        self.decoder.parse(&mut dispatch, &self.recv_buf[..len]);
        if dispatch.rescan_needed {
            self.registry.rescan();
        }
        true
    }

    fn broadcast_positions(&mut self) -> bool {
        if !self.broadcast_enabled {
            return true;
        }

        let mut rescan_needed = false;
        for motor in self.registry.iter_mut() {
            match motor.position() {
                Ok(position) => self.encoder.write_position_sensor(motor.name(), position),
                Err(e) => {
                    log::warn!("lost contact with {}: {}", motor.name(), e);
                    rescan_needed = true;
                    break;
                }
            }
        }
        self.encoder.flush();

        if rescan_needed {
            self.registry.rescan();
        }
        self.encoder.is_good()
    }

    fn heartbeat_tick(&mut self) -> bool {
        self.encoder.write_heartbeat();
        self.encoder.flush();
        self.heartbeats += 1;

        if !self.broadcast_enabled {
            if self.conflict {
                log::error!(
                    "source name {:?} is already in use on this network, giving up",
                    self.source_id.name()
                );
                self.fatal = Some(Error::NameConflict(self.source_id.name().to_string()));
                return false;
            }
            if self.heartbeats > QUARANTINE_HEARTBEATS {
                log::info!(
                    "no conflict within {} heartbeats, starting to broadcast",
                    QUARANTINE_HEARTBEATS
                );
                self.broadcast_enabled = true;
            }
        }
        self.encoder.is_good()
    }
}

/// Datagram dispatcher for the server.
struct ServerDispatch<'a> {
    source_id: &'a SourceId,
    registry: &'a mut MotorRegistry,
    conflict: &'a mut bool,
    rescan_needed: bool,
}

impl Listener for ServerDispatch<'_> {
    /// Self-echo guard: our own broadcasts come back on our own socket and
    /// must be dropped before any body callback runs.
    fn filter(&mut self, header: &Header) -> bool {
        !(field_matches(&header.source_name, self.source_id.name())
            && field_matches(&header.source_hash, self.source_id.hash()))
    }

    fn on_heartbeat(&mut self, header: &Header) {
        if field_matches(&header.source_name, self.source_id.name())
            && !field_matches(&header.source_hash, self.source_id.hash())
        {
            log::warn!(
                "conflicting heartbeat: {} claims our name with hash {}",
                header.source_name(),
                header.source_hash()
            );
            *self.conflict = true;
        }
    }

    fn on_set_duty_cycle(&mut self, _header: &Header, msg: &SetDutyCycle) {
        let Some(motor) = self.registry.find(msg.device()) else {
            // Commands for unknown devices are lost, like any dropped datagram
            return;
        };
        if let Err(e) = motor.set_duty_cycle(msg.duty_cycle) {
            log::warn!("set_duty_cycle on {} failed: {}", msg.device(), e);
            self.rescan_needed = true;
        }
    }

    fn on_reset(&mut self, _header: &Header) {
        // Give every motor its chance even if one fails
        for motor in self.registry.iter_mut() {
            if let Err(e) = motor.reset() {
                log::warn!("reset of {} failed: {}", motor.name(), e);
            }
        }
    }
}
