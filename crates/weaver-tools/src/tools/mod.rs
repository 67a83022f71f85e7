//! Built-in capability providers.
//!
//! The deterministic providers here back the test-suite and local
//! development; real deployments register operator-supplied providers (and
//! the LLM gateway adapter) next to them.

mod classifier;
mod echo;
mod geocoder;
mod scripted;

pub use classifier::KeywordClassifier;
pub use echo::EchoTool;
pub use geocoder::StaticGeocoder;
pub use scripted::{ScriptedBehavior, ScriptedTool};
