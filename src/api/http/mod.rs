//! REST + SSE endpoints

pub mod memory;
pub mod refine;
pub mod router;

pub use router::{router, AppState};
