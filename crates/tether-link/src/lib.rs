pub mod controller;
pub mod link;
pub mod mock;
pub mod processor;
pub mod relay;
pub mod retry;
pub mod sender;
pub mod ws;

pub use controller::ConnectionController;
pub use link::LinkState;
pub use processor::{HttpProcessor, MessageProcessor};
pub use relay::{InboundBatch, InboundRelay};
pub use retry::RetryPolicy;
pub use sender::OutboundSender;
pub use ws::WsProtocolClient;
