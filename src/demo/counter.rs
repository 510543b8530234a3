//! Counter component driven by text lines.
//!
//! Lines understood by [`parse_line`]:
//! - `+` / `-`: increment or decrement
//! - `set N`: replace the value
//! - `later N MS`: set the value to `N` after `MS` milliseconds
//! - `reset`: back to zero

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::component::{Env, Initial, Resolver, Snapshot, TracingInterceptor, Update};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CounterMsg {
    Increment,
    Decrement,
    Set { value: i64 },
    Later { value: i64, delay_ms: u64 },
    Delivered { value: i64 },
    Reset,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counter {
    pub value: i64,
    /// Deliveries scheduled with `later` that have not fired yet.
    pub pending: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CounterCmd {
    Deliver { value: i64, delay_ms: u64 },
}

pub fn update(message: &CounterMsg, state: &Counter) -> anyhow::Result<Update<Counter, CounterCmd>> {
    let next = match message {
        CounterMsg::Increment => Counter {
            value: checked(state.value.checked_add(1))?,
            ..state.clone()
        },
        CounterMsg::Decrement => Counter {
            value: checked(state.value.checked_sub(1))?,
            ..state.clone()
        },
        CounterMsg::Set { value } => Counter {
            value: *value,
            ..state.clone()
        },
        CounterMsg::Later { value, delay_ms } => {
            return Ok(Update::with_commands(
                Counter {
                    pending: state.pending + 1,
                    ..state.clone()
                },
                vec![CounterCmd::Deliver {
                    value: *value,
                    delay_ms: *delay_ms,
                }],
            ))
        }
        CounterMsg::Delivered { value } => Counter {
            value: *value,
            pending: state.pending.saturating_sub(1),
        },
        CounterMsg::Reset => Counter::default(),
    };
    Ok(Update::new(next))
}

fn checked(value: Option<i64>) -> anyhow::Result<i64> {
    value.ok_or_else(|| anyhow::anyhow!("counter overflow"))
}

/// Resolves deliveries by sleeping for their delay.
#[derive(Debug, Clone, Copy, Default)]
pub struct DelayResolver;

#[async_trait]
impl Resolver<CounterCmd, CounterMsg> for DelayResolver {
    async fn resolve(&self, command: CounterCmd) -> anyhow::Result<Vec<CounterMsg>> {
        match command {
            CounterCmd::Deliver { value, delay_ms } => {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                Ok(vec![CounterMsg::Delivered { value }])
            }
        }
    }
}

/// Counter starting from zero, logging every snapshot.
pub fn env() -> Env<CounterMsg, Counter, CounterCmd> {
    Env::new(Initial::new(Counter::default()), DelayResolver, update)
        .with_interceptor(TracingInterceptor::new("counter"))
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseLineError {
    #[error("empty line")]
    Empty,

    #[error("unknown command: {0}")]
    Unknown(String),

    #[error("usage: {0}")]
    Usage(&'static str),
}

/// Parse one input line into a counter message.
pub fn parse_line(line: &str) -> Result<CounterMsg, ParseLineError> {
    let mut words = line.split_whitespace();
    let Some(command) = words.next() else {
        return Err(ParseLineError::Empty);
    };
    let args: Vec<&str> = words.collect();

    match (command, args.as_slice()) {
        ("+", []) => Ok(CounterMsg::Increment),
        ("-", []) => Ok(CounterMsg::Decrement),
        ("reset", []) => Ok(CounterMsg::Reset),
        ("set", [value]) => value
            .parse()
            .map(|value| CounterMsg::Set { value })
            .map_err(|_| ParseLineError::Usage("set N")),
        ("set", _) => Err(ParseLineError::Usage("set N")),
        ("later", [value, delay_ms]) => match (value.parse::<i64>(), delay_ms.parse::<u64>()) {
            (Ok(value), Ok(delay_ms)) => Ok(CounterMsg::Later { value, delay_ms }),
            _ => Err(ParseLineError::Usage("later N MS")),
        },
        ("later", _) => Err(ParseLineError::Usage("later N MS")),
        ("+" | "-" | "reset", _) => Err(ParseLineError::Usage("+ | - | reset take no arguments")),
        (other, _) => Err(ParseLineError::Unknown(other.to_string())),
    }
}

/// Decides when a stdin-driven counter run has nothing left to do.
///
/// Every applied message other than a delivery is taken to be a line read
/// from stdin. That only holds while stdin is the sole source of messages, so
/// a run that also follows a remote debugger never finishes on its own.
#[derive(Debug, Clone, Default)]
pub struct LineProgress {
    follows_remote: bool,
    applied: usize,
    total: Option<usize>,
    pending: u32,
}

impl LineProgress {
    pub fn new(follows_remote: bool) -> Self {
        Self {
            follows_remote,
            ..Self::default()
        }
    }

    pub fn observe(&mut self, snapshot: &Snapshot<CounterMsg, Counter, CounterCmd>) {
        if let Snapshot::Regular(regular) = snapshot {
            if !matches!(regular.message, CounterMsg::Delivered { .. }) {
                self.applied += 1;
            }
        }
        self.pending = snapshot.current_state().pending;
    }

    /// Stdin closed after `total` messages were sent.
    pub fn input_closed(&mut self, total: usize) {
        self.total = Some(total);
    }

    pub fn is_done(&self) -> bool {
        !self.follows_remote
            && self.total.is_some_and(|total| self.applied >= total)
            && self.pending == 0
    }
}
