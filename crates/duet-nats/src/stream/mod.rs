//! JetStream job streams, the durable publisher and the consumer group.
//!
//! Jobs travel on three work-queue streams:
//!
//! - **control** - graphs for the control plane's executor
//! - **worker** - graphs handed off to the worker plane
//! - **info** - capability collection requests

mod job_stream;
mod stream_pub;
mod stream_sub;

pub use job_stream::StreamKind;
pub use stream_pub::JobPublisher;
pub use stream_sub::ConsumerGroup;
