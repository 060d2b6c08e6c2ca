use crate::config_channel::ConfigChannel;
use crate::error::{AttachError, ChannelError, StreamOpenError};
use crate::probe::{Attachment, ProbeTarget};
use crate::stream::EventStream;

pub mod ebpf;
pub mod simulated;

/// Everything the controller needs from the kernel side.
pub trait Backend: Send {
    type Stream: EventStream + 'static;

    fn config_channel(&mut self) -> Result<Box<dyn ConfigChannel + '_>, ChannelError>;

    fn attach(&mut self, target: &ProbeTarget) -> Result<Box<dyn Attachment>, AttachError>;

    fn open_stream(&mut self, capacity_bytes: usize) -> Result<Self::Stream, StreamOpenError>;
}
