// Client internals: handle, flush timer, socket client.
pub use reqres::{ReqRes, ReqResCallback};
pub use socket::Client;

pub(crate) mod flush_timer;
mod reqres;
mod socket;
