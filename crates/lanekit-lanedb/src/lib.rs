pub mod error;
pub mod model;
pub mod registry;

pub use error::{RegistryError, RegistryResult};
pub use model::{LaneRecord, LaneRegistration};
pub use registry::LaneRegistry;
