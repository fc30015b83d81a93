pub mod error;
pub mod media;
pub mod protocol;
pub mod server;
pub mod session;
pub mod source;
pub mod stream;
pub mod transport;

pub use error::{Result, RtspError};
pub use media::JpegPacketizer;
pub use server::{Server, ServerConfig, SessionMultiplexer, Viewer};
pub use source::{FrameSource, JpegFileSource, JpegFrame};
pub use stream::{Credentials, FrameRate, StreamInfo};
