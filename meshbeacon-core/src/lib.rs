//! Mesh beaconing core: frame codecs, peer table, transmit cadence and send policy.
//! Host-driven: no I/O; the host owns the radio and calls `NodeRuntime::tick`.

pub mod bridge;
pub mod cadence;
pub mod codec;
pub mod config;
pub mod hal;
pub mod identity;
pub mod protocol;
pub mod runtime;
pub mod scheduler;
pub mod self_update;
pub mod table;
pub mod wire;

pub use bridge::{DeviceInfo, PageHeader};
pub use cadence::{CadenceEngine, RxOutcome, SelfFields, TxFrame};
pub use codec::{DecodeError, EncodeError, Prefix};
pub use config::{BeaconConfig, ConfigError};
pub use hal::{ChannelSense, CompanionTransport, FixState, PositionSnapshot, Radio, SenseResult};
pub use identity::{NodeId, ShortId};
pub use protocol::{PacketKind, MAX_FRAME_SIZE, PAYLOAD_VERSION};
pub use runtime::{NodeRuntime, RuntimeStats, TickReport};
pub use scheduler::SendPolicy;
pub use self_update::{SelfUpdatePolicy, UpdateReason};
pub use table::{NodeEntry, NodeRecord, PeerTable, Position, RECORD_SIZE};
pub use wire::{decode_frame, FrameError, HeaderError, Packet};
