pub mod device_service;
pub mod token_service;

pub use device_service::{AuthorizeDeviceRequest, DeviceService};
pub use token_service::TokenService;
