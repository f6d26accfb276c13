// Wire helpers for keel framing over byte streams.
pub(crate) use self::frame_io::{read_response, write_request};

mod frame_io;
