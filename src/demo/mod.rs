//! Sample components used by the CLI and the integration tests.

pub mod counter;

pub use counter::{
    parse_line, Counter, CounterCmd, CounterMsg, DelayResolver, LineProgress, ParseLineError,
};
