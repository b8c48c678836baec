pub mod company;
pub mod loaders;
pub mod package;
pub mod progress;
pub mod request;
pub mod result;
pub mod state;

pub use company::CompanyInfo;
pub use loaders::{load_all_filing_requests, load_filing_request};
pub use package::FilingPackage;
pub use progress::{Metadata, ProgressEntry, ProgressLog};
pub use request::{Director, FilingRequest, Shareholder};
pub use result::{FilingResult, Submission};
pub use state::WorkflowState;
