//! The dispatch core: priority queue, bounded concurrency, lifecycle
//! control, and the adapter that binds a source to it.

mod dispatcher;
mod request;
mod source_adapter;

pub use dispatcher::{DispatchHooks, Dispatcher, DispatcherStatus, NoopHooks};
pub use request::{
    DispatchCallbacks, DispatchRequest, MessageResponse, Sender, Source, generate_request_id,
};
pub use source_adapter::SourceAdapter;
