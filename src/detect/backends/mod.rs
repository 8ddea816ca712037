pub mod http;
pub mod labels;
pub mod stub;

pub use http::HttpBackend;
pub use labels::LabelFileBackend;
pub use stub::StubBackend;
