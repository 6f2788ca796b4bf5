pub mod dispatch;
pub mod driver;
pub mod error;
pub mod message;
pub mod mock;

pub use dispatch::{ChannelDelivery, dispatch_to_channels, resolve_channels};
pub use driver::{DeliveryReceipt, DriverRegistry, NotificationMessage, NotifyDriver};
pub use error::NotifyError;
pub use message::build_message;
