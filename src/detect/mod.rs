mod backend;
mod backends;
mod registry;
mod result;

pub use backend::{DetectorBackend, SharedBackend};
pub use backends::{HttpBackend, LabelFileBackend, StubBackend};
pub use registry::BackendRegistry;
pub use result::Detection;
