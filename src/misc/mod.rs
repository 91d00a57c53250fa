//! Shared helpers: observables, file loading and `.env` containers

pub mod environment_texture_tools;
pub mod file_tools;
pub mod observable;

pub use observable::{EventState, Observable, ObserverHandle};
