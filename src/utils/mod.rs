pub mod sanitize;
pub mod wwwroot;

pub use sanitize::strip_tags;
pub use wwwroot::{is_valid_wwwroot, normalize_wwwroot, wwwroot_host, wwwroot_port};
