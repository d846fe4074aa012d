//! Fire detection core: per-frame filtering, temporal confirmation, alerting, and
//! the HTTP surface that exposes the annotated stream and live status.
//!
//! - `filter`: size and saturation heuristics over raw detector candidates.
//! - `confirmation`: debounced "confirmed fire" state with alert re-arming.
//! - `status`: snapshot shared between the loop and status readers.
//! - `alert`: notification, alert log, and dashboard delivery.
//! - `publisher`: latest-frame broadcast feeding MJPEG subscribers.
//! - `pipeline`: the detection loop and process wiring.
//! - `server`: Actix Web endpoints.

pub mod alert;
mod annotation;
pub mod config;
pub mod confirmation;
pub mod filter;
pub mod location;
pub mod pipeline;
pub mod publisher;
pub mod server;
pub mod status;
pub mod telemetry;

/// Re-export the CLI surface so the binary only depends on this crate root.
pub use config::{WatchArgs, WatchConfig};
pub use pipeline::run;
