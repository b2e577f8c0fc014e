//! Brings the crate's traits into scope without their names.
//!
//! ```
//! use dataflash::prelude::*;
//! ```

pub use crate::transport::WaitPolicy as _;
