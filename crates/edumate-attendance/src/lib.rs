//! Edumate Attendance — headless-browser extraction of attendance and OD
//! percentages, driven by a per-chat conversation flow.

pub mod conversation;
pub mod extraction;
pub mod registry;
pub mod renderer;
pub mod transport;
pub mod types;

pub use conversation::{Coordinator, SessionStore};
pub use extraction::{ExtractionConfig, ExtractionEngine, ExtractionTimeouts, Extractor};
pub use registry::{JsonFileRegistry, MemoryRegistry, UserRegistry};
pub use renderer::chromium::{find_chromium, ChromiumRenderer};
pub use renderer::{RenderContext, Renderer, UrlPattern};
pub use transport::{ChatTransport, TextFormat};
pub use types::*;
