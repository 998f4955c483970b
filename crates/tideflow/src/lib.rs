// tideflow: concurrent workflow runtime and multi-threaded BGZF line
// streaming for large genomic text files.

pub mod bgzf;
pub mod bgzstream;
pub mod buffer;
pub mod monitor;
pub mod ordered;
pub mod pipeline;
pub mod pool;
pub mod queue;
pub mod stream;
pub mod task;
pub mod tidal;
pub mod types;
pub mod unordered;

pub use bgzstream::{BgzStream, BgzStreamState};
pub use buffer::StreamBuffer;
pub use monitor::{QueueGauge, QueueMonitor};
pub use ordered::OrderedWorkflow;
pub use pipeline::Pipeline;
pub use pool::ThreadPool;
pub use queue::{MtQueue, WorkQueue};
pub use stream::{open_stream, LineStream};
pub use task::{Task, TaskHandle};
pub use tidal::{Tide, TidalQueue};
pub use types::{LineRecord, StreamError};
pub use unordered::{BoundedWorkflow, FlowState, UnboundedWorkflow, UnorderedWorkflow};
