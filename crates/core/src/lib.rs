pub mod bitstream;
pub mod congestion;
pub mod demux;
pub mod error;
pub mod media;
pub mod registry;
pub mod rtcp;
pub mod scheduler;
pub mod server;
pub mod session;
pub mod transport;

pub use demux::{InputStream, Resource};
pub use error::{PlayoutError, Result, Status};
pub use registry::PluginRegistry;
pub use scheduler::{Scheduler, SlotId};
pub use server::{Server, ServerConfig};
pub use session::RtpSession;
