mod compat;
mod loader;

pub use loader::{load_model, LoadedModel};
