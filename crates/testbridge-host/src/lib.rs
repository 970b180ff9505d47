//! Host side of the test runner bridge.
//!
//! A [`TestServerSession`] owns one connection to an out-of-process test
//! runner. Requests go down as framed JSON tagged with a fresh correlation
//! id; results come back on the same stream, in any order and split across
//! reads at arbitrary byte offsets, and are routed to whichever request is
//! waiting for that id.

pub mod adapter;
pub mod buffer;
pub mod config;
pub mod env;
pub mod error;
pub mod frame;
pub mod ident;
pub mod payload;
pub mod report;
pub mod router;
pub mod session;

pub use adapter::{DiscoveryAdapter, ExecutionAdapter, RecordingResolver, ResultResolver, RunContext};
pub use buffer::ChunkBuffer;
pub use config::SessionConfig;
pub use env::{AttachedRunner, CommandRunner, ExecutionEnvironment};
pub use error::{BufferError, ProtocolError, SessionError};
pub use frame::{encode_frame, FrameDecoder};
pub use ident::split_test_name;
pub use router::{CorrelationRouter, ResolverKind};
pub use session::TestServerSession;
