//! QoS sub-agent - AgentX (RFC 2741) sub-agent serving per-port, per-queue
//! QoS counters.
//!
//! The sub-agent registers the `csqIfQosGroupStatsTable` of the
//! CISCO-SWITCH-QOS-MIB with an SNMP master agent and answers Get, GetNext
//! and GetBulk requests from counter snapshots that are refreshed in the
//! background from one backing store per hardware namespace.
//!
//! # Usage
//!
//! ```bash
//! qos-subagent --agentx-socket /var/agentx/master --data-dir /var/lib/qos-subagent
//! ```

/// Command-line configuration and validation.
pub mod configuration;
/// csqIfQosGroupStatsTable handler and updater.
pub mod qos;
/// AgentX codec, MIB table and session.
pub mod snmp;
/// Per-namespace counter stores.
pub mod store;
/// Periodic snapshot refresh.
pub mod updater;
