pub mod address;
pub mod credentials;
pub mod errors;
pub mod messages;
pub mod protocol;
pub mod state;

pub use credentials::{CredentialDelta, CredentialSet};
pub use errors::{ConnectionError, ProcessorError, ProtocolError, SendError};
pub use state::{ConnectionState, Phase, StatusSnapshot};
