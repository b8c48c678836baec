pub mod clock;
pub mod logging;
pub mod url;

pub use clock::{Clock, FixedClock, SystemClock};
