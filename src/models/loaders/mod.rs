pub mod toml_loader;

pub use toml_loader::{load_all_filing_requests, load_filing_request, load_selector_overrides};
