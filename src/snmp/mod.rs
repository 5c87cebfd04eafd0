//! SNMP AgentX sub-agent for the CISCO-SWITCH-QOS-MIB.
//!
//! Connects to an existing net-snmpd master agent via Unix socket or TCP
//! (AgentX protocol, RFC 2741), registers every subtree of a [`MibTable`]
//! and serves requests from its published snapshots. A lost connection is
//! retried until shutdown.
//!
//! # Usage
//!
//! ```bash
//! # Default AgentX socket
//! qos-subagent --data-dir /var/lib/qos-subagent
//!
//! # Master listening on TCP
//! qos-subagent --agentx-socket tcp:localhost:705
//! ```

pub mod agentx;
pub mod encodings;
pub mod error;
pub mod mib;
pub mod oids;
pub mod pdu;
pub mod value;

use std::{sync::Arc, time::Duration};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use agentx::{AgentXAddress, AgentXSession, SessionEnd};
pub use error::AgentXError;
use mib::MibTable;

/// Error type for SNMP session failures.
#[derive(Debug, thiserror::Error)]
pub enum SnmpError {
    /// Failed to talk to the AgentX master agent.
    #[error("AgentX session failed: {0}")]
    Session(#[from] AgentXError),
    /// The blocking session task panicked or was aborted.
    #[error("AgentX session task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// How to reach and identify ourselves to the master agent.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub address: AgentXAddress,
    pub description: String,
    /// Timeout advertised in Open and Register, in seconds.
    pub timeout: u8,
    pub reconnect_interval: Duration,
}

/// Handle to the running SNMP sub-agent.
pub struct SnmpServer {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SnmpServer {
    /// Signals the SNMP sub-agent to shut down and waits for it to close its session.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            log::error!("SNMP sub-agent task failed: {}", e);
        }
    }
}

/// Spawns the SNMP AgentX sub-agent.
///
/// The task connects, registers and serves until `cancel` fires,
/// reconnecting after `reconnect_interval` whenever the session ends.
pub fn init(config: SessionConfig, table: Arc<MibTable>, cancel: CancellationToken) -> SnmpServer {
    let task = tokio::spawn(serve(config, table, cancel.clone()));
    SnmpServer { cancel, task }
}

/// Serves the table until `cancel` fires.
pub async fn serve(config: SessionConfig, table: Arc<MibTable>, cancel: CancellationToken) {
    loop {
        match run_session(&config, table.clone(), cancel.clone()).await {
            Ok(SessionEnd::Cancelled) => return,
            Ok(SessionEnd::ClosedByMaster) => {
                log::warn!("AgentX master at {} closed the session", config.address)
            }
            Err(e) => log::warn!("AgentX master at {}: {}", config.address, e),
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(config.reconnect_interval) => {
                log::info!("Reconnecting to AgentX master at {}", config.address);
            }
        }
    }
}

/// One connect → register → serve cycle on a blocking thread.
pub async fn run_session(
    config: &SessionConfig,
    table: Arc<MibTable>,
    cancel: CancellationToken,
) -> Result<SessionEnd, SnmpError> {
    let config = config.clone();
    let end = tokio::task::spawn_blocking(move || -> Result<SessionEnd, AgentXError> {
        let mut session =
            AgentXSession::connect(&config.address, &config.description, config.timeout)?;
        for subtree in table.subtrees() {
            session.register(subtree, config.timeout)?;
        }
        log::info!("SNMP AgentX sub-agent connected to {}", config.address);
        session.run_loop(&table, &cancel)
    })
    .await??;
    Ok(end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snmp::mib::testing::static_table;
    use crate::snmp::pdu::{Pdu, PDU_HEADER_SIZE, RES_NO_ERROR};
    use std::io::{Read, Write};
    use std::os::unix::net::{UnixListener, UnixStream};

    fn read_pdu(stream: &mut UnixStream) -> Pdu {
        let mut header = [0u8; PDU_HEADER_SIZE];
        stream.read_exact(&mut header).unwrap();
        let len = pdu::declared_payload_length(&header).unwrap() as usize;
        let mut frame = header.to_vec();
        frame.resize(PDU_HEADER_SIZE + len, 0);
        stream.read_exact(&mut frame[PDU_HEADER_SIZE..]).unwrap();
        Pdu::decode(&frame).unwrap()
    }

    fn acknowledge(stream: &mut UnixStream, request: &Pdu) {
        let response = pdu::ResponsePdu {
            header: request.header().response_header(),
            sys_up_time: 0,
            error: RES_NO_ERROR,
            index: 0,
            varbinds: vec![],
        };
        stream.write_all(&response.encode().unwrap()).unwrap();
    }

    #[tokio::test]
    async fn test_serve_registers_every_subtree_and_reconnects() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("master");
        let listener = UnixListener::bind(&socket).unwrap();

        let master = std::thread::spawn(move || {
            let mut registered = Vec::new();
            // First session: master closes right after registration
            for round in 0..2 {
                let (mut stream, _) = listener.accept().unwrap();
                let open = read_pdu(&mut stream);
                acknowledge(&mut stream, &open);
                for _ in 0..2 {
                    let register = read_pdu(&mut stream);
                    if let Pdu::Register(p) = &register {
                        registered.push(p.subtree.clone());
                    }
                    acknowledge(&mut stream, &register);
                }
                if round == 0 {
                    drop(stream);
                } else {
                    // Second session stays until the sub-agent sends Close
                    loop {
                        if let Pdu::Close(_) = read_pdu(&mut stream) {
                            break;
                        }
                    }
                }
            }
            registered
        });

        let config = SessionConfig {
            address: AgentXAddress::Unix(socket),
            description: "test".to_string(),
            timeout: 5,
            reconnect_interval: Duration::from_millis(50),
        };
        let cancel = CancellationToken::new();
        let server = init(config, Arc::new(static_table()), cancel.clone());

        tokio::time::sleep(Duration::from_millis(500)).await;
        server.shutdown().await;

        let registered = tokio::task::spawn_blocking(move || master.join().unwrap())
            .await
            .unwrap();
        assert_eq!(registered.len(), 4);
        assert_eq!(registered[0].to_string(), ".1.3.6.1.4.1.99998");
        assert_eq!(registered[1].to_string(), ".1.3.6.1.4.1.99999");
    }
}
