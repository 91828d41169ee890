//! Injected latency between computing a balance and persisting it.
//!
//! The pause is the lever that widens the race window, so it is a trait
//! object: tests plug in barriers or scripted waits, the CLI uses
//! [`DelayPolicy`].

use crate::core::WorkerContext;
use async_trait::async_trait;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

#[async_trait]
pub trait Delay: Send + Sync {
    /// Suspend the calling worker.
    async fn pause(&self, ctx: &WorkerContext);

    /// Serializable form, needed to hand the delay to a child process.
    fn policy(&self) -> Option<DelayPolicy> {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DelayPolicy {
    None,
    Fixed { millis: u64 },
    /// Uniform pick from the set on every pause.
    Choice { millis: Vec<u64> },
    /// Worker `i` pauses `millis[i]`; workers past the end don't pause.
    PerWorker { millis: Vec<u64> },
}

impl DelayPolicy {
    pub fn fixed(duration: Duration) -> Self {
        Self::Fixed {
            millis: duration.as_millis() as u64,
        }
    }

    /// Short random pause (100, 200 or 500 ms).
    pub fn random() -> Self {
        Self::Choice {
            millis: vec![100, 200, 500],
        }
    }

    /// Long random pause (0.5, 1 or 2 s).
    pub fn big_random() -> Self {
        Self::Choice {
            millis: vec![500, 1000, 2000],
        }
    }

    pub fn duration_for(&self, ctx: &WorkerContext) -> Duration {
        let millis = match self {
            Self::None => 0,
            Self::Fixed { millis } => *millis,
            Self::Choice { millis } => millis.choose(&mut rand::thread_rng()).copied().unwrap_or(0),
            Self::PerWorker { millis } => millis.get(ctx.index()).copied().unwrap_or(0),
        };
        Duration::from_millis(millis)
    }
}

impl Default for DelayPolicy {
    fn default() -> Self {
        Self::random()
    }
}

#[async_trait]
impl Delay for DelayPolicy {
    async fn pause(&self, ctx: &WorkerContext) {
        let duration = self.duration_for(ctx);
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }

    fn policy(&self) -> Option<DelayPolicy> {
        Some(self.clone())
    }
}

fn parse_millis(list: &str) -> Result<Vec<u64>, String> {
    list.split(',')
        .map(|part| {
            part.trim()
                .parse::<u64>()
                .map_err(|_| format!("Invalid milliseconds '{}'", part.trim()))
        })
        .collect()
}

fn join_millis(millis: &[u64]) -> String {
    millis
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Parses `none`, `random`, `big-random`, `fixed:MS`, `choice:A,B,..` and
/// `worker:A,B,..`.
impl FromStr for DelayPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "none" | "0" => return Ok(Self::None),
            "random" => return Ok(Self::random()),
            "big-random" => return Ok(Self::big_random()),
            _ => {}
        }

        let (kind, args) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| format!("Unknown delay policy '{}'", s))?;

        match kind {
            "fixed" => {
                let millis = args
                    .trim()
                    .parse::<u64>()
                    .map_err(|_| format!("Invalid milliseconds '{}'", args))?;
                Ok(Self::Fixed { millis })
            }
            "choice" => {
                let millis = parse_millis(args)?;
                if millis.is_empty() {
                    return Err("choice needs at least one value".to_string());
                }
                Ok(Self::Choice { millis })
            }
            "worker" => Ok(Self::PerWorker {
                millis: parse_millis(args)?,
            }),
            other => Err(format!("Unknown delay policy '{}'", other)),
        }
    }
}

impl fmt::Display for DelayPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Fixed { millis } => write!(f, "fixed:{}", millis),
            Self::Choice { millis } => write!(f, "choice:{}", join_millis(millis)),
            Self::PerWorker { millis } => write!(f, "worker:{}", join_millis(millis)),
        }
    }
}
