pub mod buffer;
pub mod channel;
pub mod frame;
pub mod support;
