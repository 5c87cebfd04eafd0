//! AgentX sub-agent session per RFC 2741.
//!
//! Implements only the sub-agent side: Open, Register, Close, and serving
//! Get/GetNext/GetBulk request PDUs from the master agent out of a
//! [`MibTable`]. Socket I/O is synchronous; run it from `spawn_blocking`.

use std::{
    fmt,
    io::{self, Read, Write},
    net::TcpStream,
    os::unix::net::UnixStream,
    path::PathBuf,
    str::FromStr,
    sync::atomic::{AtomicU32, Ordering},
    time::Duration,
};

use bytes::BytesMut;
use tokio_util::sync::CancellationToken;

use super::{
    encodings::{ObjectIdentifier, NETWORK_BYTE_ORDER},
    error::AgentXError,
    mib::MibTable,
    pdu::{
        declared_payload_length, ClosePdu, OpenPdu, Pdu, PduHeader, PduType, RegisterPdu,
        ResponsePdu, PDU_HEADER_SIZE, REASON_PARSE_ERROR, REASON_SHUTDOWN, RES_NO_ERROR,
    },
};

/// Largest payload accepted from the master.
const MAX_PAYLOAD: usize = 1 << 20;

/// Read timeout while waiting for a Response during Open/Register/Close.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Read timeout in the serve loop; bounds how long cancellation goes unnoticed.
const POLL_TIMEOUT: Duration = Duration::from_secs(1);

const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default registration priority (RFC 2741 §6.2.3).
const DEFAULT_PRIORITY: u8 = 127;

/// Where the master agent listens: a Unix socket path or `tcp:host:port`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AgentXAddress {
    Unix(PathBuf),
    Tcp(String),
}

impl FromStr for AgentXAddress {
    type Err = AgentXError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(target) = s.strip_prefix("tcp:") {
            let valid = target
                .rsplit_once(':')
                .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok());
            if !valid {
                return Err(AgentXError::InvalidAddress(s.to_string()));
            }
            return Ok(AgentXAddress::Tcp(target.to_string()));
        }

        let path = s.strip_prefix("unix:").unwrap_or(s);
        if path.is_empty() {
            return Err(AgentXError::InvalidAddress(s.to_string()));
        }
        Ok(AgentXAddress::Unix(PathBuf::from(path)))
    }
}

impl fmt::Display for AgentXAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentXAddress::Unix(path) => write!(f, "{}", path.display()),
            AgentXAddress::Tcp(target) => write!(f, "tcp:{}", target),
        }
    }
}

/// The byte stream to the master agent.
pub enum Transport {
    Unix(UnixStream),
    Tcp(TcpStream),
}

impl Transport {
    pub fn connect(address: &AgentXAddress) -> io::Result<Self> {
        Ok(match address {
            AgentXAddress::Unix(path) => Transport::Unix(UnixStream::connect(path)?),
            AgentXAddress::Tcp(target) => Transport::Tcp(TcpStream::connect(target.as_str())?),
        })
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            Transport::Unix(s) => s.set_read_timeout(timeout),
            Transport::Tcp(s) => s.set_read_timeout(timeout),
        }
    }

    fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            Transport::Unix(s) => s.set_write_timeout(timeout),
            Transport::Tcp(s) => s.set_write_timeout(timeout),
        }
    }
}

impl From<UnixStream> for Transport {
    fn from(stream: UnixStream) -> Self {
        Transport::Unix(stream)
    }
}

impl From<TcpStream> for Transport {
    fn from(stream: TcpStream) -> Self {
        Transport::Tcp(stream)
    }
}

impl Read for Transport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Transport::Unix(s) => s.read(buf),
            Transport::Tcp(s) => s.read(buf),
        }
    }
}

impl Write for Transport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Transport::Unix(s) => s.write(buf),
            Transport::Tcp(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Transport::Unix(s) => s.flush(),
            Transport::Tcp(s) => s.flush(),
        }
    }
}

/// Why [`AgentXSession::run_loop`] returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionEnd {
    /// Shutdown was requested; a Close PDU has been sent.
    Cancelled,
    /// The master sent Close.
    ClosedByMaster,
}

/// What to do with one incoming message.
#[derive(Debug, PartialEq, Eq)]
pub enum Dispatch {
    Reply(Vec<u8>),
    Closed,
    Ignored,
}

/// Resolves one framed message against `table`.
///
/// Header-level corruption drops the message. A request whose payload does
/// not parse is answered with parseError.
pub fn dispatch(table: &MibTable, frame: &[u8]) -> Dispatch {
    let header = match PduHeader::decode(frame) {
        Ok(header) => header,
        Err(e) => {
            log::warn!("Dropping AgentX message: {}", e);
            return Dispatch::Ignored;
        }
    };

    match Pdu::decode_payload(header.clone(), &frame[PDU_HEADER_SIZE..]) {
        Ok(Pdu::Close(close)) => {
            log::info!("Master agent closed session (reason={})", close.reason);
            Dispatch::Closed
        }
        Ok(Pdu::Other { header, .. }) if header.pdu_type == PduType::TestSet => {
            reply(table, ResponsePdu::not_writable(&header, table.sys_up_time()))
        }
        Ok(pdu) => match pdu.make_response(table) {
            Some(response) => reply(table, response),
            None => {
                log::debug!("Ignoring {:?} PDU", pdu.header().pdu_type);
                Dispatch::Ignored
            }
        },
        Err(e) => {
            log::warn!(
                "Malformed {:?} PDU (packet_id={}): {}",
                header.pdu_type,
                header.packet_id,
                e
            );
            match header.pdu_type {
                PduType::Get | PduType::GetNext | PduType::GetBulk => {
                    reply(table, ResponsePdu::parse_error(&header, table.sys_up_time()))
                }
                _ => Dispatch::Ignored,
            }
        }
    }
}

/// Encodes `response`, answering genErr when it cannot go on the wire.
fn reply(table: &MibTable, response: ResponsePdu) -> Dispatch {
    match response.encode() {
        Ok(bytes) => Dispatch::Reply(bytes),
        Err(e) => {
            log::warn!(
                "Cannot encode response (packet_id={}): {}",
                response.header.packet_id,
                e
            );
            ResponsePdu::gen_err(&response.header, table.sys_up_time())
                .encode()
                .map_or(Dispatch::Ignored, Dispatch::Reply)
        }
    }
}

/// An AgentX sub-agent session connected to a master agent.
pub struct AgentXSession {
    stream: Transport,
    pending: BytesMut,
    session_id: u32,
    packet_id: AtomicU32,
}

impl AgentXSession {
    /// Connects to the master agent and opens a session.
    pub fn connect(
        address: &AgentXAddress,
        description: &str,
        timeout: u8,
    ) -> Result<Self, AgentXError> {
        let stream = Transport::connect(address)?;
        stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;
        stream.set_write_timeout(Some(WRITE_TIMEOUT))?;

        let mut session = AgentXSession::from_stream(stream);
        session.open(description, timeout)?;
        Ok(session)
    }

    /// Wraps an already connected stream; no PDU is exchanged yet.
    pub fn from_stream(stream: impl Into<Transport>) -> Self {
        AgentXSession {
            stream: stream.into(),
            pending: BytesMut::with_capacity(4096),
            session_id: 0,
            packet_id: AtomicU32::new(1),
        }
    }

    pub fn session_id(&self) -> u32 {
        self.session_id
    }

    fn next_packet_id(&self) -> u32 {
        self.packet_id.fetch_add(1, Ordering::Relaxed)
    }

    fn header(&self, pdu_type: PduType) -> PduHeader {
        PduHeader::new(
            pdu_type,
            NETWORK_BYTE_ORDER,
            self.session_id,
            0,
            self.next_packet_id(),
        )
    }

    fn send(&mut self, pdu: &Pdu) -> Result<(), AgentXError> {
        self.stream.write_all(&pdu.encode()?)?;
        Ok(())
    }

    /// Sends an Open PDU (RFC 2741 §6.2.1) and records the assigned session id.
    pub fn open(&mut self, description: &str, timeout: u8) -> Result<(), AgentXError> {
        let pdu = Pdu::Open(OpenPdu {
            header: self.header(PduType::Open),
            timeout,
            id: ObjectIdentifier::null(),
            description: description.as_bytes().to_vec(),
        })
        .sealed();
        self.send(&pdu)?;

        let response = self.expect_response()?;
        self.session_id = response.header.session_id;
        log::info!("AgentX session opened (session_id={})", self.session_id);
        Ok(())
    }

    /// Registers an OID subtree with the master agent (RFC 2741 §6.2.3).
    pub fn register(&mut self, subtree: &ObjectIdentifier, timeout: u8) -> Result<(), AgentXError> {
        let pdu = Pdu::Register(RegisterPdu {
            header: self.header(PduType::Register),
            context: None,
            timeout,
            priority: DEFAULT_PRIORITY,
            range_subid: 0,
            subtree: subtree.clone(),
            upper_bound: None,
        })
        .sealed();
        self.send(&pdu)?;
        self.expect_response()?;

        log::info!("Registered OID subtree {}", subtree);
        Ok(())
    }

    /// Sends a Close PDU (RFC 2741 §6.2.2). The master's answer is optional.
    pub fn close(&mut self, reason: u8) -> Result<(), AgentXError> {
        let pdu = Pdu::Close(ClosePdu {
            header: self.header(PduType::Close),
            reason,
        })
        .sealed();
        self.send(&pdu)?;

        self.stream.set_read_timeout(Some(POLL_TIMEOUT))?;
        if let Err(e) = self.read_frame(None) {
            log::debug!("No response to Close: {}", e);
        }
        log::info!("AgentX session closed");
        Ok(())
    }

    fn expect_response(&mut self) -> Result<ResponsePdu, AgentXError> {
        let Some(frame) = self.read_frame(None)? else {
            return Err(AgentXError::Io(io::ErrorKind::Interrupted.into()));
        };
        match Pdu::decode(&frame)? {
            Pdu::Response(response) if response.error == RES_NO_ERROR => Ok(response),
            Pdu::Response(response) => Err(AgentXError::ResponseError(response.error)),
            other => Err(AgentXError::UnexpectedPdu(other.header().pdu_type)),
        }
    }

    /// Length of the frame at the head of `pending`, once its header is in.
    fn frame_len(&self) -> Result<Option<usize>, AgentXError> {
        let Some(payload) = declared_payload_length(&self.pending) else {
            return Ok(None);
        };
        let payload = payload as usize;
        if payload > MAX_PAYLOAD {
            return Err(AgentXError::malformed(format!(
                "payload of {} bytes exceeds {}",
                payload, MAX_PAYLOAD
            )));
        }
        Ok(Some(PDU_HEADER_SIZE + payload))
    }

    /// Reads one complete frame (header + payload).
    ///
    /// With a cancel token, read timeouts are polls and `Ok(None)` is
    /// returned once the token fires. Partial frames are kept across polls.
    fn read_frame(
        &mut self,
        cancel: Option<&CancellationToken>,
    ) -> Result<Option<Vec<u8>>, AgentXError> {
        let mut chunk = [0u8; 4096];
        loop {
            if let Some(len) = self.frame_len()? {
                if self.pending.len() >= len {
                    return Ok(Some(self.pending.split_to(len).to_vec()));
                }
            }

            match self.stream.read(&mut chunk) {
                Ok(0) => return Err(AgentXError::Io(io::ErrorKind::UnexpectedEof.into())),
                Ok(n) => self.pending.extend_from_slice(&chunk[..n]),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(ref e)
                    if cancel.is_some()
                        && matches!(
                            e.kind(),
                            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                        ) =>
                {
                    if cancel.is_some_and(CancellationToken::is_cancelled) {
                        return Ok(None);
                    }
                }
                Err(e) => return Err(AgentXError::Io(e)),
            }
        }
    }

    /// Serves requests until the master closes the session or `cancel` fires.
    ///
    /// Malformed messages are logged and skipped. An I/O failure or a frame
    /// too large to buffer ends the loop with an error, the latter after
    /// closing the session with parseError.
    pub fn run_loop(
        &mut self,
        table: &MibTable,
        cancel: &CancellationToken,
    ) -> Result<SessionEnd, AgentXError> {
        self.stream.set_read_timeout(Some(POLL_TIMEOUT))?;

        loop {
            if cancel.is_cancelled() {
                if let Err(e) = self.close(REASON_SHUTDOWN) {
                    log::debug!("Failed to send Close: {}", e);
                }
                return Ok(SessionEnd::Cancelled);
            }

            let frame = match self.read_frame(Some(cancel)) {
                Ok(Some(frame)) => frame,
                Ok(None) => continue,
                Err(e @ AgentXError::MalformedPdu(_)) => {
                    // The stream cannot be resynchronised past an unusable frame
                    self.pending.clear();
                    if let Err(close_err) = self.close(REASON_PARSE_ERROR) {
                        log::debug!("Failed to send Close: {}", close_err);
                    }
                    return Err(e);
                }
                Err(e) => return Err(e),
            };

            match dispatch(table, &frame) {
                Dispatch::Reply(bytes) => self.stream.write_all(&bytes)?,
                Dispatch::Closed => return Ok(SessionEnd::ClosedByMaster),
                Dispatch::Ignored => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snmp::mib::testing::static_table;
    use crate::snmp::pdu::{
        GetNextPdu, GetPdu, SearchRange, RES_GEN_ERR, RES_NOT_WRITABLE, RES_PARSE_ERROR,
    };
    use crate::snmp::value::{VarBind, VarBindValue};
    use std::thread;

    fn read_pdu(stream: &mut UnixStream) -> Pdu {
        let mut header = [0u8; PDU_HEADER_SIZE];
        stream.read_exact(&mut header).unwrap();
        let len = declared_payload_length(&header).unwrap() as usize;
        let mut frame = header.to_vec();
        frame.resize(PDU_HEADER_SIZE + len, 0);
        stream.read_exact(&mut frame[PDU_HEADER_SIZE..]).unwrap();
        Pdu::decode(&frame).unwrap()
    }

    fn respond(stream: &mut UnixStream, request: &Pdu, session_id: u32, error: u16) {
        let mut header = request.header().response_header();
        header.session_id = session_id;
        let response = ResponsePdu {
            header,
            sys_up_time: 0,
            error,
            index: 0,
            varbinds: vec![],
        };
        stream.write_all(&response.encode().unwrap()).unwrap();
    }

    fn oid(subs: &[u32]) -> ObjectIdentifier {
        ObjectIdentifier::from_slice(subs)
    }

    #[test]
    fn test_address_parse() {
        assert_eq!(
            "/var/agentx/master".parse::<AgentXAddress>().unwrap(),
            AgentXAddress::Unix(PathBuf::from("/var/agentx/master"))
        );
        assert_eq!(
            "unix:/tmp/agentx".parse::<AgentXAddress>().unwrap(),
            AgentXAddress::Unix(PathBuf::from("/tmp/agentx"))
        );
        assert_eq!(
            "tcp:localhost:705".parse::<AgentXAddress>().unwrap(),
            AgentXAddress::Tcp("localhost:705".to_string())
        );
        assert!("tcp:localhost".parse::<AgentXAddress>().is_err());
        assert!("tcp::705".parse::<AgentXAddress>().is_err());
        assert!("".parse::<AgentXAddress>().is_err());
        assert_eq!(
            "tcp:127.0.0.1:705".parse::<AgentXAddress>().unwrap().to_string(),
            "tcp:127.0.0.1:705"
        );
    }

    #[test]
    fn test_open_and_register() {
        let (client, mut master) = UnixStream::pair().unwrap();
        let subtree = oid(&[1, 3, 6, 1, 4, 1, 9, 9, 580, 1, 5, 5, 1, 4]);
        let expected = subtree.clone();

        let master_thread = thread::spawn(move || {
            let open = read_pdu(&mut master);
            match &open {
                Pdu::Open(p) => assert_eq!(p.description, b"test agent"),
                other => panic!("Expected Open, got {:?}", other),
            }
            respond(&mut master, &open, 77, RES_NO_ERROR);

            let register = read_pdu(&mut master);
            match &register {
                Pdu::Register(p) => {
                    assert_eq!(p.header.session_id, 77);
                    assert_eq!(p.subtree, expected);
                    assert_eq!(p.priority, DEFAULT_PRIORITY);
                }
                other => panic!("Expected Register, got {:?}", other),
            }
            respond(&mut master, &register, 77, RES_NO_ERROR);
        });

        let mut session = AgentXSession::from_stream(client);
        session.open("test agent", 5).unwrap();
        assert_eq!(session.session_id(), 77);
        session.register(&subtree, 5).unwrap();
        master_thread.join().unwrap();
    }

    #[test]
    fn test_register_rejected() {
        let (client, mut master) = UnixStream::pair().unwrap();
        let master_thread = thread::spawn(move || {
            let register = read_pdu(&mut master);
            // duplicateRegistration
            respond(&mut master, &register, 1, 263);
        });

        let mut session = AgentXSession::from_stream(client);
        let err = session.register(&oid(&[1, 3, 6, 1, 4, 1, 9]), 5).unwrap_err();
        assert!(matches!(err, AgentXError::ResponseError(263)));
        master_thread.join().unwrap();
    }

    #[test]
    fn test_run_loop_serves_until_master_closes() {
        let (client, mut master) = UnixStream::pair().unwrap();

        let master_thread = thread::spawn(move || {
            let get = Pdu::Get(GetPdu {
                header: PduHeader::new(PduType::Get, NETWORK_BYTE_ORDER, 5, 1, 10),
                context: None,
                oids: vec![oid(&[1, 3, 6, 1, 4, 1, 99999, 1, 2])],
            });
            master.write_all(&get.encode().unwrap()).unwrap();
            match read_pdu(&mut master) {
                Pdu::Response(r) => {
                    assert_eq!(r.header.packet_id, 10);
                    assert_eq!(r.varbinds[0].value, VarBindValue::Counter32(2));
                }
                other => panic!("Expected Response, got {:?}", other),
            }

            // Unknown PDU type: dropped without a reply
            let mut bogus = Pdu::Close(ClosePdu {
                header: PduHeader::new(PduType::Close, NETWORK_BYTE_ORDER, 5, 2, 11),
                reason: 1,
            })
            .encode()
            .unwrap();
            bogus[1] = 99;
            master.write_all(&bogus).unwrap();

            // Truncated GetNext payload: answered with parseError
            let get_next = Pdu::GetNext(GetNextPdu {
                header: PduHeader::new(PduType::GetNext, NETWORK_BYTE_ORDER, 5, 3, 12),
                context: None,
                ranges: vec![SearchRange::unbounded(oid(&[1, 3, 6, 1, 4, 1, 99999]))],
            })
            .encode()
            .unwrap();
            let mut truncated = get_next[..get_next.len() - 4].to_vec();
            let new_len = (truncated.len() - PDU_HEADER_SIZE) as u32;
            truncated[16..20].copy_from_slice(&new_len.to_be_bytes());
            master.write_all(&truncated).unwrap();
            match read_pdu(&mut master) {
                Pdu::Response(r) => {
                    assert_eq!(r.header.packet_id, 12);
                    assert_eq!(r.error, RES_PARSE_ERROR);
                }
                other => panic!("Expected Response, got {:?}", other),
            }

            let close = Pdu::Close(ClosePdu {
                header: PduHeader::new(PduType::Close, NETWORK_BYTE_ORDER, 5, 4, 13),
                reason: REASON_SHUTDOWN,
            });
            master.write_all(&close.encode().unwrap()).unwrap();
        });

        let table = static_table();
        let mut session = AgentXSession::from_stream(client);
        let end = session.run_loop(&table, &CancellationToken::new()).unwrap();
        assert_eq!(end, SessionEnd::ClosedByMaster);
        master_thread.join().unwrap();
    }

    #[test]
    fn test_run_loop_cancel_sends_close() {
        let (client, mut master) = UnixStream::pair().unwrap();
        let master_thread = thread::spawn(move || match read_pdu(&mut master) {
            Pdu::Close(p) => assert_eq!(p.reason, REASON_SHUTDOWN),
            other => panic!("Expected Close, got {:?}", other),
        });

        let cancel = CancellationToken::new();
        cancel.cancel();
        let table = static_table();
        let mut session = AgentXSession::from_stream(client);
        assert_eq!(
            session.run_loop(&table, &cancel).unwrap(),
            SessionEnd::Cancelled
        );
        master_thread.join().unwrap();
    }

    #[test]
    fn test_dispatch_test_set_not_writable() {
        let table = static_table();
        let frame = Pdu::Other {
            header: PduHeader::new(PduType::TestSet, NETWORK_BYTE_ORDER, 1, 2, 3),
            payload: vec![],
        }
        .encode()
        .unwrap();
        match dispatch(&table, &frame) {
            Dispatch::Reply(bytes) => match Pdu::decode(&bytes).unwrap() {
                Pdu::Response(r) => assert_eq!(r.error, RES_NOT_WRITABLE),
                other => panic!("Expected Response, got {:?}", other),
            },
            other => panic!("Expected reply, got {:?}", other),
        }
    }

    #[test]
    fn test_unencodable_response_becomes_gen_err() {
        let table = static_table();
        let request = PduHeader::new(PduType::Get, NETWORK_BYTE_ORDER, 1, 2, 3);
        let response = ResponsePdu::answering(
            &request,
            0,
            vec![VarBind::new(
                ObjectIdentifier::new(vec![1; 300]),
                VarBindValue::Counter64(1),
            )],
        );
        match reply(&table, response) {
            Dispatch::Reply(bytes) => match Pdu::decode(&bytes).unwrap() {
                Pdu::Response(r) => {
                    assert_eq!(r.error, RES_GEN_ERR);
                    assert_eq!(r.header.packet_id, 3);
                    assert!(r.varbinds.is_empty());
                }
                other => panic!("Expected Response, got {:?}", other),
            },
            other => panic!("Expected reply, got {:?}", other),
        }
    }

    #[test]
    fn test_run_loop_oversized_frame_closes_session() {
        let (client, mut master) = UnixStream::pair().unwrap();
        let master_thread = thread::spawn(move || {
            let mut header = Pdu::Close(ClosePdu {
                header: PduHeader::new(PduType::Close, NETWORK_BYTE_ORDER, 5, 1, 10),
                reason: 0,
            })
            .encode()
            .unwrap();
            header.truncate(PDU_HEADER_SIZE);
            header[16..20].copy_from_slice(&(MAX_PAYLOAD as u32 + 1).to_be_bytes());
            master.write_all(&header).unwrap();

            match read_pdu(&mut master) {
                Pdu::Close(p) => assert_eq!(p.reason, REASON_PARSE_ERROR),
                other => panic!("Expected Close, got {:?}", other),
            }
        });

        let table = static_table();
        let mut session = AgentXSession::from_stream(client);
        let err = session
            .run_loop(&table, &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, AgentXError::MalformedPdu(_)));
        master_thread.join().unwrap();
    }
}
