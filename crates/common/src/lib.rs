pub mod body;
pub mod correlation;
pub mod logging;
pub mod runtime;

pub use body::{empty_body, full_body, BoxBody};
pub use correlation::{correlation_header_name, extract_or_mint, CORRELATION_ID_HEADER, REQUEST_ID_HEADER};
pub use logging::init_tracing;
