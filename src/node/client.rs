//! Client node: the UDP ↔ JSON transcoder running on the operator host
//!
//! Inbound datagrams become one JSON object per message on stdout. Lines on
//! stdin are parsed as JSON commands and sent as one datagram each to the
//! address named in the line, so a single client can fan commands out to
//! several servers. Stdin is switched to non-blocking before it joins the
//! event loop; partial lines are buffered across readiness callbacks.

use super::RECV_BUF_SIZE;
use crate::error::{Error, Result};
use crate::event_loop::EventLoop;
use crate::protocol::{Decoder, Encoder, Header, Listener, PositionSensor, field_matches};
use crate::source_id::SourceId;
use crate::transport;
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::os::fd::AsRawFd;
use std::rc::Rc;

/// One stdin line: a command addressed to a single server.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Command {
    SetDutyCycle {
        ip: [u8; 4],
        port: u16,
        device: String,
        duty_cycle: i32,
    },
    Reset {
        ip: [u8; 4],
        port: u16,
    },
}

impl Command {
    fn target(&self) -> SocketAddrV4 {
        let (ip, port) = match self {
            Command::SetDutyCycle { ip, port, .. } | Command::Reset { ip, port } => (ip, port),
        };
        SocketAddrV4::new(Ipv4Addr::from(*ip), *port)
    }
}

/// One stdout line: a decoded message or a transcoding error.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Event<'a> {
    Position {
        source_name: &'a str,
        source_hash: &'a str,
        ip: [u8; 4],
        port: u16,
        seq: u32,
        device: &'a str,
        position: i32,
    },
    Heartbeat {
        source_name: &'a str,
        source_hash: &'a str,
        ip: [u8; 4],
        port: u16,
        seq: u32,
    },
    Error {
        what: String,
    },
}

pub struct ClientNode {
    source_id: SourceId,
    sock: UdpSocket,
    encoder: Encoder,
    decoder: Decoder,
    /// Per-command send target, shared with the encoder's callback.
    target: Rc<Cell<SocketAddrV4>>,
    recv_buf: [u8; RECV_BUF_SIZE],
    line_buf: Vec<u8>,
    fatal: Option<Error>,
}

impl ClientNode {
    pub fn new(name: &str, port: u16) -> Result<Self> {
        let source_id = SourceId::new(name);
        let sock = transport::open_socket(port)?;

        let target = Rc::new(Cell::new(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)));
        let send_sock = sock.try_clone()?;
        let send_target = Rc::clone(&target);
        let encoder = Encoder::new(
            &source_id,
            Box::new(move |datagram| {
                match transport::send_to(&send_sock, send_target.get(), datagram) {
                    Ok(sent) => sent,
                    Err(e) => {
                        log::warn!("send to {} failed: {e}", send_target.get());
                        false
                    }
                }
            }),
        );

        log::info!(
            "client {}:{} listening on port {}",
            source_id.name(),
            source_id.hash(),
            port
        );

        Ok(Self {
            source_id,
            sock,
            encoder,
            decoder: Decoder::new(),
            target,
            recv_buf: [0; RECV_BUF_SIZE],
            line_buf: Vec::new(),
            fatal: None,
        })
    }

    /// Run until stdin closes, the socket shuts down, or writing stdout
    /// fails (the consumer went away).
    pub fn run(&mut self) -> Result<()> {
        set_nonblocking(libc::STDIN_FILENO)?;

        let mut events: EventLoop<ClientNode> = EventLoop::new();
        events
            .register_fd(self.sock.as_raw_fd(), ClientNode::handle_datagram)
            .register_fd(libc::STDIN_FILENO, ClientNode::handle_stdin);
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
        let (peer, len) = match transport::recv_from(&self.sock, &mut self.recv_buf) {
            Ok(Some(received)) => received,
            Ok(None) => {
                log::info!("socket shut down");
                return false;
            }
            Err(e) => {
                self.fatal = Some(e);
                return false;
            }
        };

        let mut dispatch = ClientDispatch {
            source_id: &self.source_id,
            peer,
            out: io::stdout().lock(),
            failed: false,
        };
        self.decoder.parse(&mut dispatch, &self.recv_buf[..len]);
        let failed = dispatch.failed || dispatch.out.flush().is_err();
        if failed {
            log::info!("stdout closed");
        }
        !failed
    }

    fn handle_stdin(&mut self) -> bool {
        let mut eof = false;
        let mut chunk = [0u8; 1024];
        loop {
            match io::stdin().lock().read(&mut chunk) {
                Ok(0) => {
                    eof = true;
                    break;
                }
                Ok(len) => self.line_buf.extend_from_slice(&chunk[..len]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.fatal = Some(e.into());
                    return false;
                }
            }
        }

        while let Some(newline) = self.line_buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.line_buf.drain(..=newline).collect();
            let line = trim_line(&line);
            if !line.is_empty() && !self.execute_line(line) {
                return false;
            }
        }

        self.encoder.is_good() && !eof
    }

    /// Translate one command line into a datagram. `false` when stdout went
    /// away, which ends the loop like stdin EOF does.
    fn execute_line(&mut self, line: &[u8]) -> bool {
        let command: Command = match serde_json::from_slice(line) {
            Ok(command) => command,
            Err(e) => {
                log::debug!("bad command line: {e}");
                return self.emit_error(e.to_string());
            }
        };

        self.target.set(command.target());
        match &command {
            Command::SetDutyCycle {
                device, duty_cycle, ..
            } => self.encoder.write_set_duty_cycle(device, *duty_cycle),
            Command::Reset { .. } => self.encoder.write_reset(),
        }
        self.encoder.flush();
        true
    }

    fn emit_error(&mut self, what: String) -> bool {
        let mut out = io::stdout().lock();
        let written = write_event(&mut out, &Event::Error { what }).and_then(|_| out.flush());
        if let Err(e) = written {
            log::info!("stdout closed: {e}");
            return false;
        }
        true
    }
}

/// Datagram dispatcher for the client: every decoded message becomes one
/// JSON line on stdout.
struct ClientDispatch<'a> {
    source_id: &'a SourceId,
    peer: SocketAddrV4,
    out: io::StdoutLock<'static>,
    failed: bool,
}

impl ClientDispatch<'_> {
    fn emit(&mut self, event: &Event) {
        if write_event(&mut self.out, event).is_err() {
            self.failed = true;
        }
    }
}

impl Listener for ClientDispatch<'_> {
    /// Drop our own datagrams should one ever loop back.
    fn filter(&mut self, header: &Header) -> bool {
        !(field_matches(&header.source_name, self.source_id.name())
            && field_matches(&header.source_hash, self.source_id.hash()))
    }

    fn on_position_sensor(&mut self, header: &Header, msg: &PositionSensor) {
        self.emit(&Event::Position {
            source_name: header.source_name(),
            source_hash: header.source_hash(),
            ip: self.peer.ip().octets(),
            port: self.peer.port(),
            seq: header.sequence,
            device: msg.device(),
            position: msg.position,
        });
    }

    fn on_heartbeat(&mut self, header: &Header) {
        self.emit(&Event::Heartbeat {
            source_name: header.source_name(),
            source_hash: header.source_hash(),
            ip: self.peer.ip().octets(),
            port: self.peer.port(),
            seq: header.sequence,
        });
    }
}

fn write_event(out: &mut impl Write, event: &Event) -> io::Result<()> {
    serde_json::to_writer(&mut *out, event)?;
    out.write_all(b"\n")
}

fn trim_line(line: &[u8]) -> &[u8] {
    let mut line = line;
    while let [rest @ .., last] = line {
        if *last == b'\n' || *last == b'\r' {
            line = rest;
        } else {
            break;
        }
    }
    line
}

fn set_nonblocking(fd: std::os::fd::RawFd) -> Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error().into());
    }
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if rc < 0 {
        return Err(io::Error::last_os_error().into());
    }
    Ok(())
}
