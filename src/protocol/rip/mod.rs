mod codec;
mod engine;

pub use codec::{
    assemble, disassemble, Command, ParseError, RipEntry, RipMessage, MAX_RECORDS, RIP_VERSION,
};
pub use engine::{Outbound, RipConfig, UpdateEngine};
