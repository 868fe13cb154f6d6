pub mod options;
pub mod pipeline;
pub mod probe;
pub mod process;
pub mod progress;
pub mod transcoder;
