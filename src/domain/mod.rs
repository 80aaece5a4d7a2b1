pub mod authorization;
pub mod charging_profile;
pub mod session;
pub mod types;

pub use authorization::*;
pub use charging_profile::*;
pub use session::*;
pub use types::*;
