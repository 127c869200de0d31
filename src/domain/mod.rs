pub mod billing;
pub mod energy;
pub mod sample;
pub mod scope;
pub mod snapshot;
pub mod tariff;
pub mod types;

pub use billing::*;
pub use energy::*;
pub use sample::*;
pub use scope::*;
pub use snapshot::*;
pub use tariff::*;
pub use types::*;
