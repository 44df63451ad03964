//! Domain layer - value types and port definitions
//!
//! Holds the RAID and capacity vocabulary shared by every planner, and the
//! ports that adapters implement.

pub mod ports;
pub mod quantity;
pub mod raid;

pub use ports::*;
pub use quantity::*;
pub use raid::*;
