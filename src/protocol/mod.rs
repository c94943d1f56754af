//! 协议层：单步文本编解码（thought / action / input 围栏块）与动作载荷子格式

pub mod payload;
pub mod step;

pub use payload::{parse_dir, parse_query, FilePayload, PayloadError};
pub use step::{
    decode_step, encode_step, ActionKind, MalformedStep, Proposal, Step, FENCE, STOP_SEQUENCES,
};
