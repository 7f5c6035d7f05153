//! Remote model catalog lookup for OpenAI-compatible endpoints.

pub mod resolver;

pub use resolver::{
    parse_models, reconcile_selection, CatalogEntry, CatalogResolver, SelectionUpdate,
};
