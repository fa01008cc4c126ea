//! Context construction for one trigger.
//!
//! | Step | Type | Output |
//! |------|------|--------|
//! | 1. Collect | [`HistoryCollector`] | chronological, deduplicated window |
//! | 2. Stops | [`StopSet`] | backend stop sequence and local trim set |
//! | 3. Render | [`PromptRenderer`] | template-specific prompt string |

pub mod history;
pub mod render;
pub mod stops;

pub use history::{DEFAULT_HISTORY_LIMIT, HistoryCollector, MAX_REPLY_HOPS};
pub use render::PromptRenderer;
pub use stops::{StopSet, author_stop};
