pub mod device;
pub mod device_class;
pub mod errors;
pub mod settings;
pub mod validation;
