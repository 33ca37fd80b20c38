pub mod job;
pub mod request;
pub mod result;

pub use job::*;
pub use request::*;
pub use result::*;
