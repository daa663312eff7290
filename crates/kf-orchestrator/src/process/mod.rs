//! Process supervision for forward and relay legs

pub mod classifier;
pub mod command;
pub mod supervisor;
pub mod wrapper;

pub use classifier::{classify_line, detect_port_conflict, is_error_line, LineClass};
pub use command::{sweep_patterns, Invocation};
pub use supervisor::{ConflictHandler, HandlerRegistry, LogHandler, ProcessHandle, ProcessSupervisor};
pub use wrapper::WrapperSpec;
