pub mod announcement;
pub mod cooldown;
pub mod policy;
pub mod tenant;
pub mod types;

pub use announcement::*;
pub use cooldown::*;
pub use policy::*;
pub use tenant::*;
pub use types::*;
