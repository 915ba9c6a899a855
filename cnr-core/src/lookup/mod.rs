mod assembler;
mod engine;
mod progress;

pub use assembler::ResultAssembler;
pub use engine::{LookupEngine, LookupError};
pub use progress::{progress_channel, ProgressEvent, ProgressSender};
