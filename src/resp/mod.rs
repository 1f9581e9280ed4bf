pub mod parser;
pub mod stream;
pub mod types;
pub mod writer;

pub use parser::{parse_reply, parse_slice, ReplyReader, ReplySource, SliceSource};
pub use stream::{read_streamed, MultiBulkIter, Streamed};
pub use types::Reply;
pub use writer::encode_command;
