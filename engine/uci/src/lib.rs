//! UCI front-end: line protocol, options registry and the engine
//! controller gluing the GUI to the search core.

pub mod engine;
pub mod options;
pub mod protocol;

pub use engine::{run_stdin_loop, EngineController, OutputSink};
pub use options::{OptionValue, Options, OptionsError};
pub use protocol::{format_bestmove, format_info, format_options, ProtocolError, UciCommand};
