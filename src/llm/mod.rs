pub mod client;
#[cfg(feature = "http")]
pub mod openai;
pub mod parser;
pub mod prompts;
pub mod types;
pub mod utils;

pub use client::*;
#[cfg(feature = "http")]
pub use openai::*;
pub use parser::{parse, ResponseShape, RevenueDistribution};
pub use prompts::{PromptBuilder, PromptKind, TeamBrief};
pub use types::*;
